//! XML melting - flatten record streams into relational tables
//!
//! This module turns parsed records into one delimited table per record kind
//! plus one file per relation label.
//!
//! ## Two passes
//!
//! A corpus is read twice. The first pass builds a [`TablePlan`] (columns,
//! array flags, types); the second writes rows against the frozen plan, so no
//! row is emitted before every column's type is known.

pub mod converter;
pub mod plan;
pub mod relations;
pub mod writer;

pub use converter::{ConversionSummary, Converter};
pub use plan::{Column, Discovery, KindPlan, RelationPlan, TablePlan};
pub use relations::{RelationExtractor, RelationMapping, RelationSink, RelationTally};
pub use writer::{
    annotated_header, decode_array, encode_array, OutputFile, OutputLayout, TableWriter,
};
