//! Streaming record parser
//!
//! Turns the `quick-xml` event stream into one [`Record`] per child of the
//! document root without ever holding more than the current record:
//!
//! - depth 1: the document element, ignored apart from being required
//! - depth 2: a record; its attributes become fields
//! - depth 3: a field; its text is the value, its attributes become
//!   `field-attribute` fields
//! - deeper: inline markup (`<i>`, `<sub>`, ...) whose text is folded into the
//!   enclosing field
//!
//! Parsing the same bytes twice yields the same records with the same ids,
//! which is what lets the converter discover a schema in one pass and write
//! rows in a second.

use crate::error::{Error, Result};
use crate::schema::EntityTable;
use crate::types::{Record, RecordId, ATTRIBUTE_SEPARATOR, ID_COLUMN};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Something that can be scanned more than once
pub trait CorpusSource {
    /// Open a fresh reader positioned at the start of the corpus
    fn open(&self) -> Result<Box<dyn BufRead + '_>>;

    /// Human-readable name for logs
    fn describe(&self) -> String;
}

impl CorpusSource for Path {
    fn open(&self) -> Result<Box<dyn BufRead + '_>> {
        let file = File::open(self).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", self.display(), e),
            ))
        })?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn describe(&self) -> String {
        self.display().to_string()
    }
}

impl CorpusSource for PathBuf {
    fn open(&self) -> Result<Box<dyn BufRead + '_>> {
        self.as_path().open()
    }

    fn describe(&self) -> String {
        self.as_path().describe()
    }
}

impl CorpusSource for [u8] {
    fn open(&self) -> Result<Box<dyn BufRead + '_>> {
        Ok(Box::new(self))
    }

    fn describe(&self) -> String {
        format!("<{} bytes in memory>", self.len())
    }
}

/// Counters reported after a scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Records handed to the callback
    pub records: u64,
    /// Records dropped because they carried no fields
    pub skipped: u64,
}

/// A field element that has been opened but not yet closed
#[derive(Debug)]
struct OpenField {
    name: String,
    text: String,
    attributes: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct ScanState {
    depth: usize,
    root: Option<String>,
    record: Option<Record>,
    field: Option<OpenField>,
    stats: ParseStats,
}

/// Reconstructs records from a corpus, resolving entities from the grammar
pub struct RecordParser<'a> {
    entities: &'a EntityTable,
}

impl<'a> RecordParser<'a> {
    pub fn new(entities: &'a EntityTable) -> Self {
        RecordParser { entities }
    }

    /// Scan `input` once, calling `on_record` for every finished record.
    ///
    /// An error from the callback stops the scan and is returned unchanged.
    pub fn parse<R, F>(&self, input: R, mut on_record: F) -> Result<ParseStats>
    where
        R: BufRead,
        F: FnMut(Record) -> Result<()>,
    {
        let mut reader = Reader::from_reader(input);
        let mut buf = Vec::new();
        let mut state = ScanState::default();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| Error::parse(reader.buffer_position() as u64, e))?;
            let position = reader.buffer_position() as u64;

            match event {
                Event::Start(start) => {
                    state.depth += 1;
                    self.open_element(&start, &mut state, position)?;
                }
                Event::Empty(start) => {
                    state.depth += 1;
                    self.open_element(&start, &mut state, position)?;
                    close_element(&mut state, &mut on_record)?;
                    state.depth -= 1;
                }
                Event::End(_) => {
                    close_element(&mut state, &mut on_record)?;
                    state.depth = state.depth.saturating_sub(1);
                }
                Event::Text(text) => {
                    if let Some(field) = state.field.as_mut() {
                        let text = text
                            .unescape_with(|name| self.entities.resolve(name))
                            .map_err(|e| Error::parse(position, e))?;
                        field.text.push_str(&text);
                    }
                }
                Event::CData(data) => {
                    if let Some(field) = state.field.as_mut() {
                        let text = std::str::from_utf8(&data).map_err(|e| Error::parse(position, e))?;
                        field.text.push_str(text);
                    }
                }
                Event::Eof => {
                    if state.depth > 0 {
                        return Err(Error::parse(
                            position,
                            format!("unexpected end of document with {} unclosed element(s)", state.depth),
                        ));
                    }
                    if state.root.is_none() {
                        return Err(Error::parse(position, "document has no root element"));
                    }
                    break;
                }
                _ => {}
            }
            buf.clear();
        }

        debug!(
            records = state.stats.records,
            skipped = state.stats.skipped,
            "corpus scan complete"
        );
        Ok(state.stats)
    }

    fn open_element(&self, start: &BytesStart, state: &mut ScanState, position: u64) -> Result<()> {
        match state.depth {
            1 => {
                state.root = Some(element_name(start, position)?);
            }
            2 => {
                let kind = element_name(start, position)?;
                let mut record = Record::new(kind.as_str());
                for (name, value) in self.attributes(start, position)? {
                    if name == ID_COLUMN {
                        let root = state.root.clone().unwrap_or_default();
                        return Err(Error::reserved(name, kind, root));
                    }
                    record.push(name, value);
                }
                state.record = Some(record);
            }
            3 => {
                let name = element_name(start, position)?;
                if name == ID_COLUMN {
                    let parent = state.record.as_ref().map(|r| r.kind.clone()).unwrap_or_default();
                    return Err(Error::reserved(ID_COLUMN, name, parent));
                }
                state.field = Some(OpenField {
                    name,
                    text: String::new(),
                    attributes: self.attributes(start, position)?,
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn attributes(&self, start: &BytesStart, position: u64) -> Result<Vec<(String, String)>> {
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| Error::parse(position, e))?;
            let name = std::str::from_utf8(attribute.key.as_ref())
                .map_err(|e| Error::parse(position, e))?
                .to_string();
            let value = attribute
                .unescape_value_with(|entity| self.entities.resolve(entity))
                .map_err(|e| Error::parse(position, e))?;
            attributes.push((name, value.into_owned()));
        }
        Ok(attributes)
    }
}

fn close_element<F>(state: &mut ScanState, on_record: &mut F) -> Result<()>
where
    F: FnMut(Record) -> Result<()>,
{
    match state.depth {
        3 => {
            let (Some(field), Some(record)) = (state.field.take(), state.record.as_mut()) else {
                return Ok(());
            };
            let text = field.text.trim();
            // Empty elements such as <ee/> contribute nothing, not even attributes
            if text.is_empty() {
                return Ok(());
            }
            record.push(field.name.as_str(), text);
            for (attribute, value) in field.attributes {
                record.push(
                    format!("{}{}{}", field.name, ATTRIBUTE_SEPARATOR, attribute),
                    value,
                );
            }
        }
        2 => {
            let Some(record) = state.record.take() else {
                return Ok(());
            };
            if record.is_empty() {
                state.stats.skipped += 1;
                debug!(kind = %record.kind, "skipping record without fields");
                return Ok(());
            }
            let record = record.with_id(RecordId(state.stats.records));
            state.stats.records += 1;
            on_record(record)?;
        }
        _ => {}
    }
    Ok(())
}

fn element_name(start: &BytesStart, position: u64) -> Result<String> {
    let name = start.name();
    std::str::from_utf8(name.as_ref())
        .map(str::to_string)
        .map_err(|e| Error::parse(position, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;

    fn parse_all(xml: &str) -> Result<Vec<Record>> {
        let entities = EntityTable::new();
        let parser = RecordParser::new(&entities);
        let mut records = Vec::new();
        parser.parse(xml.as_bytes(), |record| {
            records.push(record);
            Ok(())
        })?;
        Ok(records)
    }

    #[test]
    fn test_records_and_fields() {
        let xml = r#"<?xml version="1.0"?>
            <!DOCTYPE dblp SYSTEM "dblp.dtd">
            <dblp>
                <article key="journals/x/Smith99" mdate="2020-01-01">
                    <author>A. Smith</author>
                    <title>On Things</title>
                    <year>1999</year>
                </article>
                <book key="books/y/Lee01">
                    <author>B. Lee</author>
                    <author>C. Wu</author>
                </book>
            </dblp>"#;

        let records = parse_all(xml).unwrap();
        assert_eq!(records.len(), 2);

        let article = &records[0];
        assert_eq!(article.kind, "article");
        assert_eq!(article.id, RecordId(0));
        let names: Vec<_> = article.field_names().collect();
        assert_eq!(names, vec!["key", "mdate", "author", "title", "year"]);
        assert_eq!(
            article.get("title"),
            Some(&FieldValue::Single("On Things".to_string()))
        );

        let book = &records[1];
        assert_eq!(book.id, RecordId(1));
        assert_eq!(
            book.get("author"),
            Some(&FieldValue::Repeated(vec![
                "B. Lee".to_string(),
                "C. Wu".to_string()
            ]))
        );
    }

    #[test]
    fn test_child_attributes_follow_their_field() {
        let xml = r#"<dblp><article>
            <ee type="oa">https://a</ee>
            <ee>https://b</ee>
            <ee type="closed">https://c</ee>
            <ee type="ignored"/>
        </article></dblp>"#;

        let records = parse_all(xml).unwrap();
        let article = &records[0];
        assert_eq!(article.get("ee").unwrap().len(), 3);
        assert_eq!(
            article.get("ee-type").unwrap().iter().collect::<Vec<_>>(),
            vec!["oa", "closed"]
        );

        // Only children carrying the attribute contribute, so values are not
        // aligned with the child's positions
        let xml = r#"<dblp><article><author>A</author><author orcid="Y">B</author></article></dblp>"#;
        let records = parse_all(xml).unwrap();
        assert_eq!(
            records[0].get("author"),
            Some(&FieldValue::Repeated(vec!["A".to_string(), "B".to_string()]))
        );
        assert_eq!(
            records[0].get("author-orcid"),
            Some(&FieldValue::Single("Y".to_string()))
        );
    }

    #[test]
    fn test_inline_markup_is_flattened() {
        let xml = "<dblp><article><title>The <i>Real</i> H<sub>2</sub>O  </title></article></dblp>";
        let records = parse_all(xml).unwrap();
        assert_eq!(
            records[0].get("title"),
            Some(&FieldValue::Single("The Real H2O".to_string()))
        );
        assert!(records[0].get("i").is_none());
    }

    #[test]
    fn test_grammar_entities_are_resolved() {
        let mut entities = EntityTable::new();
        entities.insert("uuml", "ü");
        let parser = RecordParser::new(&entities);

        let xml = r#"<dblp><article note="M&uuml;ller"><author>J&uuml;rgen &amp; Co &#233;</author></article></dblp>"#;
        let mut records = Vec::new();
        parser
            .parse(xml.as_bytes(), |r| {
                records.push(r);
                Ok(())
            })
            .unwrap();

        assert_eq!(
            records[0].get("author"),
            Some(&FieldValue::Single("Jürgen & Co é".to_string()))
        );
        assert_eq!(
            records[0].get("note"),
            Some(&FieldValue::Single("Müller".to_string()))
        );
    }

    #[test]
    fn test_unknown_entity_is_a_parse_error() {
        let err = parse_all("<dblp><article><title>&bogus;</title></article></dblp>").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_unknown_kinds_are_ad_hoc() {
        let records = parse_all("<dblp><gadget><name>x</name></gadget></dblp>").unwrap();
        assert_eq!(records[0].kind, "gadget");
    }

    #[test]
    fn test_records_without_fields_are_skipped() {
        let entities = EntityTable::new();
        let parser = RecordParser::new(&entities);
        let xml = "<dblp><article/><article><ee/></article><book><year>2001</year></book></dblp>";

        let mut ids = Vec::new();
        let stats = parser
            .parse(xml.as_bytes(), |r| {
                ids.push(r.id);
                Ok(())
            })
            .unwrap();

        assert_eq!(stats, ParseStats { records: 1, skipped: 2 });
        assert_eq!(ids, vec![RecordId(0)]);
    }

    #[test]
    fn test_reserved_id_name() {
        let err = parse_all("<dblp><article id=\"7\"><year>1</year></article></dblp>").unwrap_err();
        assert!(matches!(err, Error::ReservedName { .. }));

        let err = parse_all("<dblp><article><id>7</id></article></dblp>").unwrap_err();
        match err {
            Error::ReservedName { tag, parent, .. } => {
                assert_eq!(tag, "id");
                assert_eq!(parent, "article");
            }
            other => panic!("Expected ReservedName, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_markup() {
        let err = parse_all("<dblp><article><title>x</year></article></dblp>").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));

        let err = parse_all("<dblp><article><title>x</title>").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));

        let err = parse_all("   ").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_callback_error_stops_the_scan() {
        let entities = EntityTable::new();
        let parser = RecordParser::new(&entities);
        let xml = "<dblp><a><x>1</x></a><a><x>2</x></a></dblp>";

        let mut seen = 0;
        let err = parser
            .parse(xml.as_bytes(), |_| {
                seen += 1;
                Err(Error::drift("stop"))
            })
            .unwrap_err();

        assert_eq!(seen, 1);
        assert!(matches!(err, Error::SchemaDrift { .. }));
    }

    #[test]
    fn test_two_scans_agree() {
        let xml = "<dblp><a><x>1</x></a><b><y>2</y><y>3</y></b><a><x>4</x></a></dblp>";
        assert_eq!(parse_all(xml).unwrap(), parse_all(xml).unwrap());
    }
}
