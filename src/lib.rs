//! # xmlmelt - XML Corpus to Table Converter
//!
//! Converts a large, DTD-described XML corpus (DBLP style: a root element
//! whose children are records such as `article`, `book`, `phdthesis`) into one
//! delimited table per record kind, with optional relation files for graph
//! database import.
//!
//! ## Modules
//!
//! - **schema**: DTD catalog, per-kind column discovery, type inference
//! - **parser**: streaming record reconstruction on top of `quick-xml`
//! - **melt**: relation extraction, the frozen table plan, table writing and
//!   the two-pass converter
//!
//! ## Quick Start
//!
//! ```rust
//! use xmlmelt::melt::{Converter, TableWriter};
//! use xmlmelt::{ConvertConfig, SchemaCatalog};
//!
//! # fn main() -> xmlmelt::Result<()> {
//! let corpus: &[u8] = br#"<dblp>
//!     <article><author>A. Smith</author><year>1999</year></article>
//!     <article><author>B. Lee</author><author>C. Wu</author><year>2001</year></article>
//! </dblp>"#;
//!
//! let converter = Converter::new(SchemaCatalog::empty(), ConvertConfig::default())?;
//! let plan = converter.discover(corpus)?;
//! assert!(plan.kind("article").unwrap().column("author").unwrap().is_array);
//!
//! let mut writer = TableWriter::with_opener(&plan, converter.config(), |_| Ok(Vec::<u8>::new()))?;
//! converter.emit_to(corpus, &plan, &mut writer)?;
//!
//! let (_, table) = writer.into_inner()?.remove(0);
//! assert_eq!(
//!     String::from_utf8(table).unwrap(),
//!     "id;author;year\n0;[A. Smith];1999\n1;[B. Lee|C. Wu];2001\n"
//! );
//! # Ok(())
//! # }
//! ```
//!
//! Files on disk go through [`convert`], which loads the grammar and derives
//! every output path from one pattern.

use std::path::Path;

pub mod error;
pub mod melt;
pub mod parser;
pub mod schema;
pub mod types;

// Re-export commonly used types for convenience
pub use error::{Error, Result};
pub use melt::{ConversionSummary, Converter, OutputLayout, RelationMapping, TablePlan, TableWriter};
pub use parser::{CorpusSource, RecordParser};
pub use schema::{ScalarType, SchemaCatalog};
pub use types::{ConvertConfig, FieldValue, Record, RecordId};

/// Main entry point: convert a corpus file into tables.
///
/// `pattern` names the outputs, either with a `{name}` placeholder
/// (`out/{name}.csv`) or as a template file (`out/dblp.csv` becomes
/// `out/dblp_article.csv`, `out/dblp_book.csv`, ...).
///
/// Files written before a failure are left in place.
pub fn convert(
    corpus: impl AsRef<Path>,
    grammar: impl AsRef<Path>,
    pattern: &str,
    config: ConvertConfig,
) -> Result<ConversionSummary> {
    let catalog = SchemaCatalog::load(grammar)?;
    let converter = Converter::new(catalog, config)?;
    converter.run(corpus.as_ref(), &OutputLayout::new(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_convert_files() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("dblp.xml");
        let grammar = dir.path().join("dblp.dtd");
        fs::write(
            &corpus,
            "<dblp><book><title>Types</title><year>2002</year></book></dblp>",
        )
        .unwrap();
        fs::write(
            &grammar,
            "<!ELEMENT dblp (book)*>\n<!ELEMENT book (title, year)>\n\
             <!ELEMENT title (#PCDATA)>\n<!ELEMENT year (#PCDATA)>\n",
        )
        .unwrap();

        let pattern = dir.path().join("out").join("dblp.csv");
        let summary = convert(
            &corpus,
            &grammar,
            pattern.to_str().unwrap(),
            ConvertConfig::default(),
        )
        .unwrap();

        assert_eq!(summary.records, 1);
        let table = fs::read_to_string(dir.path().join("out").join("dblp_book.csv")).unwrap();
        assert_eq!(table, "id;title;year\n0;Types;2002\n");
    }

    #[test]
    fn test_missing_grammar() {
        let err = convert("missing.xml", "missing.dtd", "out.csv", ConvertConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::SchemaRead { .. }));
    }
}
