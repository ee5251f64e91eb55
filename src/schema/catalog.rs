//! Grammar catalog loaded from a DTD
//!
//! Only what the converter needs is extracted: which record kinds the root
//! element admits, which children and attributes each kind may carry, and the
//! general entities the corpus uses to spell non-ASCII characters.
//!
//! The catalog is advisory. The parser never rejects a record because the
//! grammar does not mention it.

use crate::error::{Error, Result};
use crate::types::ATTRIBUTE_SEPARATOR;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

static COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static PARAMETER_ENTITY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<!ENTITY\s+%\s+([^\s"']+)\s+(?:"([^"]*)"|'([^']*)')\s*>"#).unwrap()
});

static PARAMETER_REFERENCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%([^\s;%]+);").unwrap());

static GENERAL_ENTITY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<!ENTITY\s+([^\s%"']+)\s+(?:"([^"]*)"|'([^']*)')\s*>"#).unwrap()
});

static ELEMENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!ELEMENT\s+([^\s>]+)\s+([^>]*)>").unwrap());

static ATTLIST_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!ATTLIST\s+([^\s>]+)([^>]*)>").unwrap());

static ATTRIBUTE_DEF_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"([^\s()|"']+)\s+(?:NOTATION\s*)?(?:\([^)]*\)|[A-Z]+)\s+(?:#REQUIRED|#IMPLIED|(?:#FIXED\s+)?(?:"[^"]*"|'[^']*'))"#,
    )
    .unwrap()
});

static CHAR_REF_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").unwrap());

/// Parameter entities may reference each other; stop expanding after this many rounds
const MAX_EXPANSION_ROUNDS: usize = 8;

/// A field the grammar allows for a record kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarField {
    pub name: String,
    pub repeatable: bool,
}

impl GrammarField {
    fn new(name: impl Into<String>, repeatable: bool) -> Self {
        GrammarField {
            name: name.into(),
            repeatable,
        }
    }
}

/// What the grammar says about one element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ElementDecl {
    children: Vec<GrammarField>,
    attributes: Vec<String>,
}

/// Named entities available when unescaping corpus text
#[derive(Debug, Clone, Default)]
pub struct EntityTable {
    entities: HashMap<String, String>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entities.insert(name.into(), value.into());
    }

    /// Resolve an entity name; the five XML entities always win
    pub fn resolve(&self, name: &str) -> Option<&str> {
        predefined_entity(name).or_else(|| self.entities.get(name).map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn predefined_entity(name: &str) -> Option<&'static str> {
    match name {
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "apos" => Some("'"),
        "quot" => Some("\""),
        _ => None,
    }
}

/// Record kinds and their legal fields, as declared by the grammar
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    root: Option<String>,
    kinds: BTreeMap<String, Vec<GrammarField>>,
    entities: EntityTable,
}

impl SchemaCatalog {
    /// A catalog that declares nothing; every record kind becomes ad hoc
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load and parse a DTD file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| Error::SchemaRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&String::from_utf8_lossy(&bytes))
    }

    /// Parse DTD text
    pub fn parse(text: &str) -> Result<Self> {
        let text = COMMENT_REGEX.replace_all(text, "");
        let text = expand_parameter_entities(&text);

        let mut entities = EntityTable::new();
        for caps in GENERAL_ENTITY_REGEX.captures_iter(&text) {
            let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            entities.insert(&caps[1], decode_char_refs(value));
        }

        let mut declared = Vec::new();
        let mut elements: BTreeMap<String, ElementDecl> = BTreeMap::new();
        let element_matches: Vec<Captures> = ELEMENT_REGEX.captures_iter(&text).collect();
        check_terminated(&text, "ELEMENT", element_matches.len())?;

        for caps in element_matches {
            let name = caps[1].to_string();
            let children = parse_content_model(&name, &caps[2])?;
            let decl = elements.entry(name.clone()).or_default();
            decl.children = children;
            declared.push(name);
        }

        let attlist_matches: Vec<Captures> = ATTLIST_REGEX.captures_iter(&text).collect();
        check_terminated(&text, "ATTLIST", attlist_matches.len())?;

        for caps in attlist_matches {
            let decl = elements.entry(caps[1].to_string()).or_default();
            for def in ATTRIBUTE_DEF_REGEX.captures_iter(&caps[2]) {
                let attribute = def[1].to_string();
                if !decl.attributes.contains(&attribute) {
                    decl.attributes.push(attribute);
                }
            }
        }

        if declared.is_empty() {
            return Err(Error::schema("grammar declares no elements"));
        }

        let referenced: HashSet<&str> = elements
            .values()
            .flat_map(|decl| decl.children.iter().map(|child| child.name.as_str()))
            .collect();
        let root = declared
            .iter()
            .find(|name| !referenced.contains(name.as_str()))
            .cloned();

        let mut kinds = BTreeMap::new();
        if let Some(root_decl) = root.as_ref().and_then(|r| elements.get(r)) {
            for kind in &root_decl.children {
                kinds.insert(kind.name.clone(), kind_fields(&elements, &kind.name));
            }
        }

        debug!(
            elements = elements.len(),
            kinds = kinds.len(),
            entities = entities.len(),
            root = root.as_deref().unwrap_or("<none>"),
            "grammar loaded"
        );

        Ok(SchemaCatalog {
            root,
            kinds,
            entities,
        })
    }

    /// The document element, if the grammar has an unreferenced element
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// Record kinds admitted by the root element, sorted by name
    pub fn record_kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    pub fn is_record_kind(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Legal fields of a record kind
    pub fn fields(&self, kind: &str) -> Option<&[GrammarField]> {
        self.kinds.get(kind).map(Vec::as_slice)
    }

    pub fn field(&self, kind: &str, field: &str) -> Option<&GrammarField> {
        self.fields(kind)?.iter().find(|f| f.name == field)
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }
}

/// Children, own attributes, and `child-attribute` columns of a record kind
fn kind_fields(elements: &BTreeMap<String, ElementDecl>, kind: &str) -> Vec<GrammarField> {
    let Some(decl) = elements.get(kind) else {
        return Vec::new();
    };

    let mut fields: Vec<GrammarField> = decl
        .attributes
        .iter()
        .map(|attribute| GrammarField::new(attribute.as_str(), false))
        .collect();

    for child in &decl.children {
        fields.push(child.clone());
        if let Some(child_decl) = elements.get(&child.name) {
            for attribute in &child_decl.attributes {
                fields.push(GrammarField::new(
                    format!("{}{}{}", child.name, ATTRIBUTE_SEPARATOR, attribute),
                    child.repeatable,
                ));
            }
        }
    }

    fields
}

fn expand_parameter_entities(text: &str) -> String {
    let mut parameters: HashMap<String, String> = HashMap::new();
    for caps in PARAMETER_ENTITY_REGEX.captures_iter(text) {
        let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        parameters.insert(caps[1].to_string(), value.to_string());
    }

    let mut expanded = PARAMETER_ENTITY_REGEX.replace_all(text, "").into_owned();
    for _ in 0..MAX_EXPANSION_ROUNDS {
        if !PARAMETER_REFERENCE_REGEX.is_match(&expanded) {
            break;
        }
        expanded = PARAMETER_REFERENCE_REGEX
            .replace_all(&expanded, |caps: &Captures| match parameters.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    // External parameter entities (PUBLIC/SYSTEM) are not fetched
                    warn!(entity = &caps[1], "ignoring unresolved parameter entity");
                    String::new()
                }
            })
            .into_owned();
    }
    expanded
}

fn check_terminated(text: &str, keyword: &str, matched: usize) -> Result<()> {
    let opened = text.matches(&format!("<!{keyword}")).count();
    if opened != matched {
        return Err(Error::schema(format!(
            "{} of {} <!{} declarations are malformed or unterminated",
            opened - matched.min(opened),
            opened,
            keyword
        )));
    }
    Ok(())
}

/// Collect child element names from a content model such as
/// `(author|editor|title)*` or `(title, chapter+, note?)`.
fn parse_content_model(element: &str, model: &str) -> Result<Vec<GrammarField>> {
    let model = model.trim();
    if model == "EMPTY" || model == "ANY" {
        return Ok(Vec::new());
    }
    if !model.starts_with('(') {
        return Err(Error::schema(format!(
            "element {element}: unsupported content model {model:?}"
        )));
    }

    let unbalanced = || Error::schema(format!("element {element}: unbalanced parentheses"));

    let mut groups: Vec<Vec<(String, bool)>> = vec![Vec::new()];
    let mut chars = model.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '(' => groups.push(Vec::new()),
            ')' => {
                if groups.len() < 2 {
                    return Err(unbalanced());
                }
                let Some(group) = groups.pop() else {
                    return Err(unbalanced());
                };
                let repeats = matches!(chars.peek(), Some('*' | '+'));
                if matches!(chars.peek(), Some('*' | '+' | '?')) {
                    chars.next();
                }
                if let Some(parent) = groups.last_mut() {
                    parent.extend(group.into_iter().map(|(name, r)| (name, r || repeats)));
                }
            }
            c if is_name_char(c) || c == '#' => {
                let mut name = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !is_name_char(next) {
                        break;
                    }
                    name.push(next);
                    chars.next();
                }
                let repeats = matches!(chars.peek(), Some('*' | '+'));
                if matches!(chars.peek(), Some('*' | '+' | '?')) {
                    chars.next();
                }
                if name != "#PCDATA" {
                    if let Some(group) = groups.last_mut() {
                        group.push((name, repeats));
                    }
                }
            }
            '|' | ',' => {}
            c if c.is_whitespace() => {}
            other => {
                return Err(Error::schema(format!(
                    "element {element}: unexpected {other:?} in content model"
                )))
            }
        }
    }

    if groups.len() != 1 {
        return Err(unbalanced());
    }

    // A name listed twice can occur twice
    let mut fields: Vec<GrammarField> = Vec::new();
    for (name, repeats) in groups.into_iter().flatten() {
        match fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.repeatable = true,
            None => fields.push(GrammarField::new(name, repeats)),
        }
    }
    Ok(fields)
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

fn decode_char_refs(value: &str) -> String {
    CHAR_REF_REGEX
        .replace_all(value, |caps: &Captures| {
            let code = &caps[1];
            let parsed = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => code.parse::<u32>().ok(),
            };
            parsed
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
