use crate::melt::relations::RelationMapping;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the generated identifier column written first in every table
pub const ID_COLUMN: &str = "id";

/// Joins a child element name and one of its attributes into a column name
pub const ATTRIBUTE_SEPARATOR: &str = "-";

/// Identifies one record across the whole corpus.
///
/// Assigned by the parser in scan order, so both passes agree on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The text collected for one field of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Single(String),
    /// Document order; only ever holds two or more values
    Repeated(Vec<String>),
}

impl FieldValue {
    /// Append another occurrence, turning a single value into a sequence
    pub fn push(&mut self, value: String) {
        match self {
            FieldValue::Single(first) => {
                let first = std::mem::take(first);
                *self = FieldValue::Repeated(vec![first, value]);
            }
            FieldValue::Repeated(values) => values.push(value),
        }
    }

    pub fn is_repeated(&self) -> bool {
        matches!(self, FieldValue::Repeated(_))
    }

    /// Iterate the values in document order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            FieldValue::Single(value) => std::slice::from_ref(value),
            FieldValue::Repeated(values) => values,
        };
        values.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        match self {
            FieldValue::Single(_) => 1,
            FieldValue::Repeated(values) => values.len(),
        }
    }
}

/// One top-level element of the corpus - becomes one row in its kind's table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The record kind (table name), e.g. "article", "phdthesis"
    pub kind: String,

    pub id: RecordId,

    /// Fields in first-occurrence order
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new(kind: impl Into<String>) -> Self {
        Record {
            kind: kind.into(),
            id: RecordId(0),
            fields: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = id;
        self
    }

    /// Add a value, appending to the field if it already occurred
    pub fn push(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some((_, existing)) => existing.push(value),
            None => self.fields.push((field, FieldValue::Single(value))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Remove a field and return its values
    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        let index = self.fields.iter().position(|(name, _)| name == field)?;
        Some(self.fields.remove(index).1)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Configuration for the conversion process
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Write one annotated header file (`name:type`) per record kind
    pub annotate: bool,

    /// Format annotated headers for graph bulk import; implies `annotate`
    pub graph_export: bool,

    /// Fields routed into relation files instead of table columns
    pub relations: Vec<RelationMapping>,

    /// Field delimiter for every delimited file
    pub delimiter: u8,

    /// Write the frozen column/type plan as JSON next to the tables
    pub write_metadata: bool,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        ConvertConfig {
            annotate: false,
            graph_export: false,
            relations: vec![],
            delimiter: b';',
            write_metadata: false,
        }
    }
}

impl ConvertConfig {
    pub fn with_annotate(mut self, annotate: bool) -> Self {
        self.annotate = annotate;
        self
    }

    pub fn with_graph_export(mut self, graph_export: bool) -> Self {
        self.graph_export = graph_export;
        self
    }

    pub fn with_relation(mut self, mapping: RelationMapping) -> Self {
        self.relations.push(mapping);
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_metadata(mut self, write_metadata: bool) -> Self {
        self.write_metadata = write_metadata;
        self
    }

    /// Whether annotated header files are produced
    pub fn annotates(&self) -> bool {
        self.annotate || self.graph_export
    }

    /// Whether the plan is written as JSON
    pub fn writes_metadata(&self) -> bool {
        self.write_metadata || self.graph_export
    }
}
