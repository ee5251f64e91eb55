//! Discovery pass and the frozen table plan
//!
//! Pass 1 feeds every record through a [`Discovery`], which tracks columns,
//! types and relation counts. [`Discovery::freeze`] turns that into a
//! [`TablePlan`]: an immutable description of every output file that the
//! writing pass follows without making any further decisions.

use crate::error::Result;
use crate::melt::relations::{RelationExtractor, RelationTally};
use crate::schema::{ColumnAggregator, ScalarType, SchemaCatalog, TypeInferencer};
use crate::types::{Record, ID_COLUMN};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// One column of a record kind's table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub is_array: bool,
    #[serde(rename = "type")]
    pub scalar_type: ScalarType,
}

/// Pre-computed layout of one record kind's table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPlan {
    pub kind: String,
    /// Records of this kind seen during discovery
    pub records: u64,
    /// Columns after the leading `id`, in first-observed order
    pub columns: Vec<Column>,
}

impl KindPlan {
    /// Header row: `id` then every column name
    pub fn header(&self) -> Vec<&str> {
        std::iter::once(ID_COLUMN)
            .chain(self.columns.iter().map(|c| c.name.as_str()))
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// One relation file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationPlan {
    pub label: String,
    /// Tuples seen during discovery
    pub rows: u64,
}

/// Complete output plan derived from the discovery pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePlan {
    /// Record kinds in first-observed order
    pub kinds: Vec<KindPlan>,
    pub relations: Vec<RelationPlan>,
    /// Records across all kinds
    pub records: u64,
}

impl TablePlan {
    pub fn kind(&self, kind: &str) -> Option<&KindPlan> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    pub fn relation(&self, label: &str) -> Option<&RelationPlan> {
        self.relations.iter().find(|r| r.label == label)
    }
}

/// Pass 1 accumulator
pub struct Discovery<'a> {
    catalog: &'a SchemaCatalog,
    extractor: &'a RelationExtractor,
    columns: ColumnAggregator,
    types: TypeInferencer,
    relations: RelationTally,
    records: u64,
    reported: HashSet<(String, String)>,
}

impl<'a> Discovery<'a> {
    pub fn new(catalog: &'a SchemaCatalog, extractor: &'a RelationExtractor) -> Self {
        Discovery {
            catalog,
            extractor,
            columns: ColumnAggregator::new(),
            types: TypeInferencer::new(),
            relations: RelationTally::new(),
            records: 0,
            reported: HashSet::new(),
        }
    }

    /// Fold one record into the running statistics
    pub fn observe(&mut self, mut record: Record) -> Result<()> {
        self.extractor.extract(&mut record, &mut self.relations)?;

        self.records += 1;
        self.columns.observe_record(&record.kind);
        self.check_kind(&record.kind);

        for (field, value) in record.fields() {
            self.check_field(&record.kind, field, value.is_repeated());
            self.columns.observe(&record.kind, field, value.is_repeated());
            for raw in value.iter() {
                self.types.observe(&record.kind, field, raw);
            }
        }
        Ok(())
    }

    /// Resolve every column and snapshot the result
    pub fn freeze(self) -> TablePlan {
        let mut kinds = Vec::new();
        for kind in self.columns.kinds() {
            let columns: Vec<Column> = self
                .columns
                .finalize(kind)
                .into_iter()
                .map(|observed| Column {
                    scalar_type: self.types.resolve(kind, &observed.name),
                    name: observed.name,
                    is_array: observed.is_array,
                })
                .collect();

            if let Some(declared) = self.catalog.fields(kind) {
                for field in declared {
                    if !self.columns.contains(kind, &field.name) {
                        debug!(kind, field = %field.name, "declared field never observed, dropping");
                    }
                }
            }

            kinds.push(KindPlan {
                kind: kind.to_string(),
                records: self.columns.records(kind),
                columns,
            });
        }

        for kind in self.catalog.record_kinds() {
            if self.columns.records(kind) == 0 {
                debug!(kind, "declared record kind never observed");
            }
        }

        let relations: Vec<RelationPlan> = self
            .extractor
            .labels()
            .into_iter()
            .map(|label| RelationPlan {
                rows: self.relations.count(&label),
                label,
            })
            .collect();

        info!(
            records = self.records,
            kinds = kinds.len(),
            relation_rows = self.relations.total(),
            "table plan frozen"
        );

        TablePlan {
            kinds,
            relations,
            records: self.records,
        }
    }

    fn check_kind(&mut self, kind: &str) {
        if self.catalog.root().is_none() || self.catalog.is_record_kind(kind) {
            return;
        }
        if self.reported.insert((kind.to_string(), String::new())) {
            info!(kind, "record kind not declared by the grammar, treating as ad hoc");
        }
    }

    fn check_field(&mut self, kind: &str, field: &str, repeated: bool) {
        if !self.catalog.is_record_kind(kind) {
            return;
        }
        match self.catalog.field(kind, field) {
            None => {
                if self.reported.insert((kind.to_string(), field.to_string())) {
                    warn!(kind, field, "field not declared by the grammar");
                }
            }
            Some(declared) if repeated && !declared.repeatable => {
                if self.reported.insert((kind.to_string(), field.to_string())) {
                    warn!(kind, field, "field repeats but the grammar allows one occurrence");
                }
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melt::relations::RelationMapping;
    use crate::types::RecordId;

    const DTD: &str = r#"
        <!ELEMENT dblp (article|book)*>
        <!ELEMENT article (author*, title, year?)>
        <!ATTLIST article key CDATA #REQUIRED>
        <!ELEMENT book (author*, title, isbn?)>
        <!ELEMENT author (#PCDATA)>
        <!ELEMENT title (#PCDATA)>
        <!ELEMENT year (#PCDATA)>
        <!ELEMENT isbn (#PCDATA)>
    "#;

    fn record(kind: &str, id: u64, fields: &[(&str, &str)]) -> Record {
        let mut record = Record::new(kind).with_id(RecordId(id));
        for (field, value) in fields {
            record.push(*field, *value);
        }
        record
    }

    fn discover(extractor: &RelationExtractor, records: Vec<Record>) -> TablePlan {
        let catalog = SchemaCatalog::parse(DTD).unwrap();
        let mut discovery = Discovery::new(&catalog, extractor);
        for record in records {
            discovery.observe(record).unwrap();
        }
        discovery.freeze()
    }

    #[test]
    fn test_plan_from_records() {
        let extractor = RelationExtractor::default();
        let plan = discover(
            &extractor,
            vec![
                record("article", 0, &[("author", "A. Smith"), ("year", "1999")]),
                record("article", 1, &[("author", "B. Lee"), ("author", "C. Wu"), ("year", "2001")]),
                record("book", 2, &[("title", "Rust"), ("isbn", "978-1")]),
            ],
        );

        assert_eq!(plan.records, 3);
        assert_eq!(plan.kinds.len(), 2);

        let article = plan.kind("article").unwrap();
        assert_eq!(article.records, 2);
        assert_eq!(article.header(), vec!["id", "author", "year"]);
        assert!(article.column("author").unwrap().is_array);
        assert_eq!(article.column("year").unwrap().scalar_type, ScalarType::Integer);

        let book = plan.kind("book").unwrap();
        assert_eq!(book.header(), vec!["id", "title", "isbn"]);
        assert_eq!(book.column("isbn").unwrap().scalar_type, ScalarType::String);
        // Declared but never seen
        assert!(book.column("author").is_none());
    }

    #[test]
    fn test_ad_hoc_kinds_and_fields_are_kept() {
        let extractor = RelationExtractor::default();
        let plan = discover(
            &extractor,
            vec![
                record("gadget", 0, &[("name", "x")]),
                record("article", 1, &[("title", "t"), ("title", "u"), ("pages", "1-2")]),
            ],
        );

        assert_eq!(
            plan.kinds.iter().map(|k| k.kind.as_str()).collect::<Vec<_>>(),
            vec!["gadget", "article"]
        );
        let article = plan.kind("article").unwrap();
        assert!(article.column("title").unwrap().is_array);
        assert!(article.column("pages").is_some());
    }

    #[test]
    fn test_relation_fields_leave_the_table() {
        let extractor = RelationExtractor::new(&[RelationMapping::new("author", "WROTE")]).unwrap();
        let plan = discover(
            &extractor,
            vec![
                record("article", 0, &[("author", "A"), ("author", "B"), ("title", "t")]),
                record("book", 1, &[("author", "C")]),
            ],
        );

        assert_eq!(plan.kind("article").unwrap().header(), vec!["id", "title"]);
        // A record left without fields still counts and still gets a row
        assert_eq!(plan.kind("book").unwrap().header(), vec!["id"]);
        assert_eq!(plan.kind("book").unwrap().records, 1);
        assert_eq!(
            plan.relations,
            vec![RelationPlan {
                label: "WROTE".to_string(),
                rows: 3
            }]
        );
    }

    #[test]
    fn test_plan_serializes() {
        let extractor = RelationExtractor::default();
        let plan = discover(&extractor, vec![record("article", 0, &[("year", "1999")])]);

        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["kinds"][0]["columns"][0]["type"], "integer");
        let back: TablePlan = serde_json::from_value(json).unwrap();
        assert_eq!(back, plan);
    }
}
