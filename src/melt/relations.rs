//! Relation extraction
//!
//! Selected fields are pulled out of their record and streamed as
//! `(label, parent id, value)` tuples, the same way nested arrays are split
//! off into child tables with a parent reference. A field that is extracted
//! never reaches the record's own table.

use crate::error::{Error, Result};
use crate::types::{Record, RecordId};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Route a field into a relation file with the given label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMapping {
    pub field: String,
    pub label: String,
}

impl RelationMapping {
    pub fn new(field: impl Into<String>, label: impl Into<String>) -> Self {
        RelationMapping {
            field: field.into(),
            label: label.into(),
        }
    }
}

impl FromStr for RelationMapping {
    type Err = Error;

    /// Parse `field:label`
    fn from_str(s: &str) -> Result<Self> {
        let (field, label) = s
            .split_once(':')
            .ok_or_else(|| Error::config(format!("relation {s:?} is not of the form field:label")))?;
        let (field, label) = (field.trim(), label.trim());
        if field.is_empty() || label.is_empty() {
            return Err(Error::config(format!(
                "relation {s:?} needs both a field and a label"
            )));
        }
        Ok(RelationMapping::new(field, label))
    }
}

impl fmt::Display for RelationMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.label)
    }
}

/// Receives relation tuples as they are extracted
pub trait RelationSink {
    fn emit(&mut self, label: &str, parent: RecordId, value: &str) -> Result<()>;
}

/// Counts tuples per label without keeping them
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelationTally {
    counts: BTreeMap<String, u64>,
}

impl RelationTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, label: &str) -> u64 {
        self.counts.get(label).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

impl RelationSink for RelationTally {
    fn emit(&mut self, label: &str, _parent: RecordId, _value: &str) -> Result<()> {
        *self.counts.entry(label.to_string()).or_default() += 1;
        Ok(())
    }
}

/// Removes configured fields from records and emits them to a sink
#[derive(Debug, Clone, Default)]
pub struct RelationExtractor {
    /// field -> label
    mappings: BTreeMap<String, String>,
}

impl RelationExtractor {
    /// Build from mappings; the same field may not carry two labels
    pub fn new(mappings: &[RelationMapping]) -> Result<Self> {
        let mut by_field: BTreeMap<String, String> = BTreeMap::new();
        for mapping in mappings {
            match by_field.get(&mapping.field) {
                Some(label) if *label != mapping.label => {
                    return Err(Error::config(format!(
                        "field {:?} is mapped to both {:?} and {:?}",
                        mapping.field, label, mapping.label
                    )));
                }
                Some(_) => {}
                None => {
                    by_field.insert(mapping.field.clone(), mapping.label.clone());
                }
            }
        }
        Ok(RelationExtractor { mappings: by_field })
    }

    /// Distinct labels, sorted
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.mappings.values().cloned().collect();
        labels.sort();
        labels.dedup();
        labels
    }

    /// Strip every mapped field out of `record`, emitting one tuple per value.
    ///
    /// Returns the number of tuples emitted.
    pub fn extract(&self, record: &mut Record, sink: &mut dyn RelationSink) -> Result<usize> {
        let mut emitted = 0;
        for (field, label) in &self.mappings {
            let Some(values) = record.remove(field) else {
                continue;
            };
            for value in values.iter() {
                sink.emit(label, record.id, value)?;
                emitted += 1;
            }
        }
        Ok(emitted)
    }
}
