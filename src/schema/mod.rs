//! Schema discovery
//!
//! This module covers everything that decides what the output tables look
//! like: the advisory grammar catalog, per-kind column discovery, and
//! corpus-wide type inference.

pub mod catalog;
pub mod columns;
pub mod inference;

pub use catalog::{EntityTable, GrammarField, SchemaCatalog};
pub use columns::{ColumnAggregator, ObservedColumn};
pub use inference::{ScalarType, TypeInferencer};
