//! Per-kind column discovery
//!
//! Only fields that actually occur become columns. Order is the order in which
//! fields were first seen during the scan, which keeps output reproducible.

use std::collections::HashMap;

/// A finalized column: its name and whether any record repeated it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedColumn {
    pub name: String,
    pub is_array: bool,
}

#[derive(Debug, Default)]
struct KindColumns {
    columns: Vec<ObservedColumn>,
    index: HashMap<String, usize>,
    records: u64,
}

/// Accumulates observed fields for every record kind
#[derive(Debug, Default)]
pub struct ColumnAggregator {
    kinds: HashMap<String, KindColumns>,
    order: Vec<String>,
}

impl ColumnAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn kind_mut(&mut self, kind: &str) -> &mut KindColumns {
        if !self.kinds.contains_key(kind) {
            self.order.push(kind.to_string());
        }
        self.kinds.entry(kind.to_string()).or_default()
    }

    /// Count one record of a kind, creating the kind on first sight
    pub fn observe_record(&mut self, kind: &str) {
        self.kind_mut(kind).records += 1;
    }

    /// Note that a record of `kind` carried `field`.
    ///
    /// Once a field has been repeated within a single record it stays an
    /// array column for the rest of the run.
    pub fn observe(&mut self, kind: &str, field: &str, repeated: bool) {
        let entry = self.kind_mut(kind);
        match entry.index.get(field) {
            Some(&i) => entry.columns[i].is_array |= repeated,
            None => {
                entry.index.insert(field.to_string(), entry.columns.len());
                entry.columns.push(ObservedColumn {
                    name: field.to_string(),
                    is_array: repeated,
                });
            }
        }
    }

    /// Columns of a kind in first-observed order
    pub fn finalize(&self, kind: &str) -> Vec<ObservedColumn> {
        self.kinds
            .get(kind)
            .map(|k| k.columns.clone())
            .unwrap_or_default()
    }

    pub fn records(&self, kind: &str) -> u64 {
        self.kinds.get(kind).map_or(0, |k| k.records)
    }

    /// Kinds in first-observed order
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn contains(&self, kind: &str, field: &str) -> bool {
        self.kinds
            .get(kind)
            .is_some_and(|k| k.index.contains_key(field))
    }
}
