//! Two-pass conversion driver
//!
//! Pass 1 discovers every table and column and freezes a [`TablePlan`].
//! Pass 2 re-reads the same corpus and writes rows against that plan. The
//! passes are never fused: no row is written before every column is typed.

use crate::error::{Error, Result};
use crate::melt::plan::{Discovery, TablePlan};
use crate::melt::relations::RelationExtractor;
use crate::melt::writer::{write_plan, OutputFile, OutputLayout, TableWriter};
use crate::parser::{CorpusSource, RecordParser};
use crate::schema::SchemaCatalog;
use crate::types::ConvertConfig;
use serde::Serialize;
use std::io::Write;
use std::time::Instant;
use tracing::info;

/// What a finished conversion produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConversionSummary {
    /// Rows written across all kind tables
    pub records: u64,
    /// Records dropped for having no fields
    pub skipped: u64,
    /// Tuples written across all relation files
    pub relation_rows: u64,
    pub kinds: usize,
}

/// Drives discovery and emission for one grammar and config
pub struct Converter {
    catalog: SchemaCatalog,
    config: ConvertConfig,
    relations: RelationExtractor,
}

impl Converter {
    pub fn new(catalog: SchemaCatalog, config: ConvertConfig) -> Result<Self> {
        if matches!(config.delimiter, b'"' | b'\n' | b'\r') {
            return Err(Error::config(format!(
                "{:?} cannot be used as a delimiter",
                config.delimiter as char
            )));
        }
        let relations = RelationExtractor::new(&config.relations)?;
        Ok(Converter {
            catalog,
            config,
            relations,
        })
    }

    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    /// Pass 1: scan the corpus and freeze the table plan
    pub fn discover<S: CorpusSource + ?Sized>(&self, source: &S) -> Result<TablePlan> {
        let start = Instant::now();
        info!(source = %source.describe(), "pass 1: discovering tables");

        let parser = RecordParser::new(self.catalog.entities());
        let mut discovery = Discovery::new(&self.catalog, &self.relations);
        let stats = parser.parse(source.open()?, |record| discovery.observe(record))?;

        let plan = discovery.freeze();
        info!(
            records = stats.records,
            skipped = stats.skipped,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "pass 1 complete"
        );
        Ok(plan)
    }

    /// Pass 2: create the output files of `plan` and fill them
    pub fn emit<S: CorpusSource + ?Sized>(
        &self,
        source: &S,
        plan: &TablePlan,
        layout: &OutputLayout,
    ) -> Result<ConversionSummary> {
        let mut writer = TableWriter::create(plan, layout, &self.config)?;
        if self.config.writes_metadata() {
            write_plan(plan, &layout.path(&OutputFile::Metadata))?;
        }
        self.emit_to(source, plan, &mut writer)
    }

    /// Pass 2 against an existing writer
    pub fn emit_to<S, W>(
        &self,
        source: &S,
        plan: &TablePlan,
        writer: &mut TableWriter<W>,
    ) -> Result<ConversionSummary>
    where
        S: CorpusSource + ?Sized,
        W: Write,
    {
        let start = Instant::now();
        info!(source = %source.describe(), "pass 2: writing tables");

        let parser = RecordParser::new(self.catalog.entities());
        let stats = parser.parse(source.open()?, |mut record| {
            self.relations.extract(&mut record, &mut *writer)?;
            writer.write_row(&record)
        })?;
        writer.flush()?;

        if stats.records != plan.records {
            return Err(Error::drift(format!(
                "discovery saw {} records but the second pass produced {}",
                plan.records, stats.records
            )));
        }
        let planned_tuples: u64 = plan.relations.iter().map(|r| r.rows).sum();
        if writer.relation_rows() != planned_tuples {
            return Err(Error::drift(format!(
                "discovery saw {} relation tuples but the second pass produced {}",
                planned_tuples,
                writer.relation_rows()
            )));
        }

        let summary = ConversionSummary {
            records: writer.rows(),
            skipped: stats.skipped,
            relation_rows: writer.relation_rows(),
            kinds: plan.kinds.len(),
        };
        info!(
            records = summary.records,
            relation_rows = summary.relation_rows,
            kinds = summary.kinds,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "pass 2 complete"
        );
        Ok(summary)
    }

    /// Discover, then emit
    pub fn run<S: CorpusSource + ?Sized>(
        &self,
        source: &S,
        layout: &OutputLayout,
    ) -> Result<ConversionSummary> {
        let plan = self.discover(source)?;
        self.emit(source, &plan, layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melt::relations::RelationMapping;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    const CORPUS: &[u8] = br#"<?xml version="1.0"?>
<dblp>
  <article key="a1"><author>A. Smith</author><year>1999</year></article>
  <article key="a2"><author>B. Lee</author><author>C. Wu</author><year>2001</year></article>
  <www/>
  <book key="b1"><author>C. Wu</author><title>Types</title><year>n.d.</year></book>
</dblp>"#;

    fn convert_in_memory(
        config: ConvertConfig,
        corpus: &[u8],
    ) -> Result<(ConversionSummary, BTreeMap<String, String>)> {
        let converter = Converter::new(SchemaCatalog::empty(), config)?;
        let plan = converter.discover(corpus)?;
        let mut writer = TableWriter::with_opener(&plan, converter.config(), |_| Ok(Vec::<u8>::new()))?;
        let summary = converter.emit_to(corpus, &plan, &mut writer)?;
        let files = writer
            .into_inner()?
            .into_iter()
            .map(|(file, bytes)| (file.name(), String::from_utf8(bytes).unwrap()))
            .collect();
        Ok((summary, files))
    }

    #[test]
    fn test_tables_per_kind() {
        let (summary, files) = convert_in_memory(ConvertConfig::default(), CORPUS).unwrap();

        assert_eq!(
            summary,
            ConversionSummary {
                records: 3,
                skipped: 1,
                relation_rows: 0,
                kinds: 2,
            }
        );
        assert_eq!(
            files["article"],
            "id;key;author;year\n0;a1;[A. Smith];1999\n1;a2;[B. Lee|C. Wu];2001\n"
        );
        assert_eq!(files["book"], "id;key;author;title;year\n2;b1;C. Wu;Types;n.d.\n");
    }

    #[test]
    fn test_relations_are_split_off() {
        let config = ConvertConfig::default()
            .with_relation(RelationMapping::new("author", "WROTE"))
            .with_annotate(true);
        let (summary, files) = convert_in_memory(config, CORPUS).unwrap();

        assert_eq!(summary.relation_rows, 4);
        assert_eq!(files["article"], "id;key;year\n0;a1;1999\n1;a2;2001\n");
        assert_eq!(files["article_header"], "id:integer;key:string;year:integer\n");
        assert_eq!(files["book_header"], "id:integer;key:string;title:string;year:string\n");
        assert_eq!(
            files["WROTE_relation"],
            "parent_id;value\n0;A. Smith\n1;B. Lee\n1;C. Wu\n2;C. Wu\n"
        );
    }

    #[test]
    fn test_changed_corpus_is_drift() {
        let converter = Converter::new(SchemaCatalog::empty(), ConvertConfig::default()).unwrap();
        let plan = converter.discover(CORPUS).unwrap();

        let changed: &[u8] =
            b"<dblp><article key=\"a1\"><author>A</author><pages>1-2</pages></article></dblp>";
        let mut writer =
            TableWriter::with_opener(&plan, converter.config(), |_| Ok(Vec::<u8>::new())).unwrap();
        let err = converter.emit_to(changed, &plan, &mut writer).unwrap_err();
        assert!(matches!(err, Error::SchemaDrift { .. }));

        let shorter: &[u8] = b"<dblp><article key=\"a1\"><author>A</author></article></dblp>";
        let mut writer =
            TableWriter::with_opener(&plan, converter.config(), |_| Ok(Vec::<u8>::new())).unwrap();
        let err = converter.emit_to(shorter, &plan, &mut writer).unwrap_err();
        assert!(matches!(err, Error::SchemaDrift { .. }));
    }

    #[test]
    fn test_invalid_config() {
        let config = ConvertConfig::default().with_delimiter(b'"');
        assert!(matches!(
            Converter::new(SchemaCatalog::empty(), config),
            Err(Error::Config { .. })
        ));

        let config = ConvertConfig::default()
            .with_relation(RelationMapping::new("author", "A"))
            .with_relation(RelationMapping::new("author", "B"));
        assert!(matches!(
            Converter::new(SchemaCatalog::empty(), config),
            Err(Error::Config { .. })
        ));
    }
}
