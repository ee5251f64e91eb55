use crate::error::{Error, Result};
use crate::melt::plan::{KindPlan, TablePlan};
use crate::melt::relations::RelationSink;
use crate::types::{ConvertConfig, Record, RecordId, ID_COLUMN};
use csv::{QuoteStyle, WriterBuilder};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const NAME_PLACEHOLDER: &str = "{name}";

/// One file produced by a conversion
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum OutputFile {
    /// Rows of a record kind
    Table(String),
    /// Annotated header of a record kind
    Header(String),
    /// Tuples of a relation label
    Relation(String),
    /// Annotated header of a relation label
    RelationHeader(String),
    /// The frozen plan as JSON
    Metadata,
}

impl OutputFile {
    /// The name substituted into the output pattern
    pub fn name(&self) -> String {
        match self {
            OutputFile::Table(kind) => kind.clone(),
            OutputFile::Header(kind) => format!("{kind}_header"),
            OutputFile::Relation(label) => format!("{label}_relation"),
            OutputFile::RelationHeader(label) => format!("{label}_relation_header"),
            OutputFile::Metadata => "schema".to_string(),
        }
    }
}

/// Maps output files to paths.
///
/// A pattern containing `{name}` is substituted directly. Any other path is
/// treated as a template file name: `out/dblp.csv` yields `out/dblp_article.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pattern: String,
}

impl OutputLayout {
    pub fn new(pattern: impl Into<String>) -> Self {
        OutputLayout {
            pattern: pattern.into(),
        }
    }

    pub fn path(&self, file: &OutputFile) -> PathBuf {
        let name = file.name();
        let path = if self.pattern.contains(NAME_PLACEHOLDER) {
            PathBuf::from(self.pattern.replace(NAME_PLACEHOLDER, &name))
        } else {
            let template = Path::new(&self.pattern);
            let stem = template
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut file_name = if stem.is_empty() {
                name
            } else {
                format!("{stem}_{name}")
            };
            if let Some(extension) = template.extension() {
                file_name.push('.');
                file_name.push_str(&extension.to_string_lossy());
            }
            template.with_file_name(file_name)
        };

        match file {
            OutputFile::Metadata => path.with_extension("json"),
            _ => path,
        }
    }
}

/// Encode the values of an array column as `[v1|v2|...]`.
///
/// Backslashes and pipes inside a value are escaped so that
/// [`decode_array`] recovers the values exactly.
pub fn encode_array<'v, I>(values: I) -> String
where
    I: IntoIterator<Item = &'v str>,
{
    let mut encoded = String::from("[");
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            encoded.push('|');
        }
        for c in value.chars() {
            if c == '\\' || c == '|' {
                encoded.push('\\');
            }
            encoded.push(c);
        }
    }
    encoded.push(']');
    encoded
}

/// Reverse [`encode_array`]; `None` if `text` is not bracketed
pub fn decode_array(text: &str) -> Option<Vec<String>> {
    let inner = text.strip_prefix('[')?.strip_suffix(']')?;

    let mut values = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => current.push(chars.next().unwrap_or('\\')),
            '|' => values.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    values.push(current);
    Some(values)
}

/// `name:type` row for a kind; arrays get a `[]` suffix
pub fn annotated_header(plan: &KindPlan, graph_export: bool) -> Vec<String> {
    let id = if graph_export {
        format!("{ID_COLUMN}:ID")
    } else {
        format!("{ID_COLUMN}:integer")
    };

    std::iter::once(id)
        .chain(plan.columns.iter().map(|column| {
            let type_name = if graph_export {
                column.scalar_type.graph_name()
            } else {
                column.scalar_type.as_str()
            };
            let suffix = if column.is_array { "[]" } else { "" };
            format!("{}:{}{}", column.name, type_name, suffix)
        }))
        .collect()
}

/// Header row of a relation file, plain or annotated
pub fn relation_header(label: &str, annotate: bool, graph_export: bool) -> [String; 2] {
    if graph_export {
        [":START_ID".to_string(), format!(":END_ID({label})")]
    } else if annotate {
        ["parent_id:integer".to_string(), "value:string".to_string()]
    } else {
        ["parent_id".to_string(), "value".to_string()]
    }
}

/// Write the frozen plan as pretty JSON
pub fn write_plan(plan: &TablePlan, path: &Path) -> Result<()> {
    let file = create_file(path)?;
    serde_json::to_writer_pretty(file, plan)?;
    Ok(())
}

/// Every file a [`TableWriter`] opens for `plan`, in opening order
pub fn planned_outputs(plan: &TablePlan, config: &ConvertConfig) -> Vec<OutputFile> {
    let mut outputs = Vec::new();
    for kind in &plan.kinds {
        outputs.push(OutputFile::Table(kind.kind.clone()));
        if config.annotates() {
            outputs.push(OutputFile::Header(kind.kind.clone()));
        }
    }
    for relation in &plan.relations {
        outputs.push(OutputFile::Relation(relation.label.clone()));
        if config.annotates() {
            outputs.push(OutputFile::RelationHeader(relation.label.clone()));
        }
    }
    outputs
}

/// Fail if two outputs map to the same key.
///
/// Kind and label names are free text, so `a_header` as a kind lands on the
/// annotated header name of kind `a`.
fn ensure_distinct<K, I>(outputs: I) -> Result<()>
where
    K: Eq + Hash + Debug,
    I: IntoIterator<Item = (OutputFile, K)>,
{
    let mut seen: HashMap<K, OutputFile> = HashMap::new();
    for (file, key) in outputs {
        if let Some(previous) = seen.get(&key) {
            return Err(Error::config(format!(
                "outputs {previous:?} and {file:?} would both be written to {key:?}"
            )));
        }
        seen.insert(key, file);
    }
    Ok(())
}

fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| Error::Output {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    File::create(path).map_err(|source| Error::Output {
        path: path.to_path_buf(),
        source,
    })
}

struct KindTable<W: Write> {
    writer: csv::Writer<W>,
    plan: KindPlan,
    /// column name -> position in the row (0 is `id`)
    index: HashMap<String, usize>,
    row: Vec<String>,
}

/// Writes records to one delimited file per kind and tuples to one file per
/// relation label, following a frozen [`TablePlan`]
pub struct TableWriter<W: Write> {
    tables: BTreeMap<String, KindTable<W>>,
    relations: BTreeMap<String, csv::Writer<W>>,
    headers: Vec<(OutputFile, W)>,
    rows: u64,
    relation_rows: u64,
}

impl TableWriter<File> {
    /// Create every output file of the plan and write its header rows.
    ///
    /// Paths are checked for collisions, including the metadata file when the
    /// config writes one, before any file is created.
    pub fn create(plan: &TablePlan, layout: &OutputLayout, config: &ConvertConfig) -> Result<Self> {
        let mut outputs = planned_outputs(plan, config);
        if config.writes_metadata() {
            outputs.push(OutputFile::Metadata);
        }
        ensure_distinct(outputs.into_iter().map(|file| {
            let path = layout.path(&file);
            (file, path)
        }))?;

        Self::with_opener(plan, config, |file| {
            let path = layout.path(file);
            debug!(path = %path.display(), "creating output file");
            create_file(&path)
        })
    }
}

impl<W: Write> TableWriter<W> {
    /// Build a writer whose outputs come from `open`.
    ///
    /// Annotated header files are opened, written and kept only when the
    /// config asks for annotation. Nothing is opened if two outputs share a
    /// name.
    pub fn with_opener<F>(plan: &TablePlan, config: &ConvertConfig, mut open: F) -> Result<Self>
    where
        F: FnMut(&OutputFile) -> Result<W>,
    {
        ensure_distinct(planned_outputs(plan, config).into_iter().map(|file| {
            let name = file.name();
            (file, name)
        }))?;

        let builder = writer_builder(config.delimiter);
        let mut tables = BTreeMap::new();
        let mut relations = BTreeMap::new();
        let mut headers = Vec::new();

        for kind in &plan.kinds {
            let file = OutputFile::Table(kind.kind.clone());
            let mut writer = builder.from_writer(open(&file)?);
            writer
                .write_record(kind.header())
                .map_err(|e| Error::write(&kind.kind, e))?;

            if config.annotates() {
                let file = OutputFile::Header(kind.kind.clone());
                let out = write_single_row(
                    &builder,
                    open(&file)?,
                    &annotated_header(kind, config.graph_export),
                    &kind.kind,
                )?;
                headers.push((file, out));
            }

            let index = kind
                .columns
                .iter()
                .enumerate()
                .map(|(i, column)| (column.name.clone(), i + 1))
                .collect();
            tables.insert(
                kind.kind.clone(),
                KindTable {
                    writer,
                    plan: kind.clone(),
                    index,
                    row: vec![String::new(); kind.columns.len() + 1],
                },
            );
        }

        for relation in &plan.relations {
            let label = &relation.label;
            let mut writer = builder.from_writer(open(&OutputFile::Relation(label.clone()))?);
            writer
                .write_record(relation_header(label, false, false))
                .map_err(|e| Error::write(label, e))?;

            if config.annotates() {
                let file = OutputFile::RelationHeader(label.clone());
                let out = write_single_row(
                    &builder,
                    open(&file)?,
                    &relation_header(label, true, config.graph_export),
                    label,
                )?;
                headers.push((file, out));
            }

            relations.insert(label.clone(), writer);
        }

        Ok(TableWriter {
            tables,
            relations,
            headers,
            rows: 0,
            relation_rows: 0,
        })
    }

    /// Write one record as a row of its kind's table
    pub fn write_row(&mut self, record: &Record) -> Result<()> {
        let table = self.tables.get_mut(&record.kind).ok_or_else(|| {
            Error::drift(format!(
                "record kind {:?} was not seen during discovery",
                record.kind
            ))
        })?;

        for cell in table.row.iter_mut() {
            cell.clear();
        }
        table.row[0] = record.id.to_string();

        for (field, value) in record.fields() {
            let position = *table.index.get(field).ok_or_else(|| {
                Error::drift(format!(
                    "field {:?} of {:?} was not seen during discovery",
                    field, record.kind
                ))
            })?;
            let column = &table.plan.columns[position - 1];

            table.row[position] = if column.is_array {
                encode_array(value.iter())
            } else if value.is_repeated() {
                return Err(Error::drift(format!(
                    "field {:?} of {:?} repeats but was discovered as a scalar",
                    field, record.kind
                )));
            } else {
                value.iter().next().unwrap_or_default().to_string()
            };
        }

        table
            .writer
            .write_record(&table.row)
            .map_err(|e| Error::write(&record.kind, e))?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written to kind tables so far
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Tuples written to relation files so far
    pub fn relation_rows(&self) -> u64 {
        self.relation_rows
    }

    pub fn flush(&mut self) -> Result<()> {
        for table in self.tables.values_mut() {
            table.writer.flush()?;
        }
        for writer in self.relations.values_mut() {
            writer.flush()?;
        }
        for (_, out) in self.headers.iter_mut() {
            out.flush()?;
        }
        Ok(())
    }

    /// Flush and hand back every underlying output
    pub fn into_inner(self) -> Result<Vec<(OutputFile, W)>> {
        let mut outputs = Vec::new();
        for (kind, table) in self.tables {
            let out = table.writer.into_inner().map_err(unwrap_failed)?;
            outputs.push((OutputFile::Table(kind), out));
        }
        for (label, writer) in self.relations {
            let out = writer.into_inner().map_err(unwrap_failed)?;
            outputs.push((OutputFile::Relation(label), out));
        }
        outputs.extend(self.headers);
        outputs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(outputs)
    }
}

impl<W: Write> RelationSink for TableWriter<W> {
    fn emit(&mut self, label: &str, parent: RecordId, value: &str) -> Result<()> {
        let writer = self.relations.get_mut(label).ok_or_else(|| {
            Error::drift(format!("relation {label:?} was not seen during discovery"))
        })?;
        writer
            .write_record([parent.to_string().as_str(), value])
            .map_err(|e| Error::write(label, e))?;
        self.relation_rows += 1;
        Ok(())
    }
}

fn writer_builder(delimiter: u8) -> WriterBuilder {
    let mut builder = WriterBuilder::new();
    builder.delimiter(delimiter).quote_style(QuoteStyle::Necessary);
    builder
}

fn write_single_row<W: Write>(
    builder: &WriterBuilder,
    out: W,
    row: &[String],
    target: &str,
) -> Result<W> {
    let mut writer = builder.from_writer(out);
    writer
        .write_record(row)
        .map_err(|e| Error::write(target, e))?;
    writer.into_inner().map_err(unwrap_failed)
}

fn unwrap_failed<W>(e: csv::IntoInnerError<W>) -> Error {
    Error::Io(std::io::Error::new(e.error().kind(), e.error().to_string()))
}
