//! Column type inference with a streaming accumulator
//!
//! Each (record kind, field) pair keeps a tiny lattice state that is widened
//! as values arrive. Nothing is resolved until the whole corpus has been seen,
//! so every row of a column shares one type.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

static INTEGER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?[0-9]+$").unwrap());

/// The resolved type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Integer,
    Float,
    Boolean,
    String,
}

impl ScalarType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarType::Integer => "integer",
            ScalarType::Float => "float",
            ScalarType::Boolean => "boolean",
            ScalarType::String => "string",
        }
    }

    /// Type name understood by graph bulk importers
    pub fn graph_name(self) -> &'static str {
        match self {
            ScalarType::Integer => "long",
            ScalarType::Float => "double",
            ScalarType::Boolean => "boolean",
            ScalarType::String => "string",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single raw value looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenClass {
    Integer,
    Float,
    Boolean,
    Other,
}

impl TokenClass {
    fn of(raw: &str) -> Self {
        if INTEGER_REGEX.is_match(raw) {
            // Too wide for i64: keep the digits rather than round through f64
            return if raw.parse::<i64>().is_ok() {
                TokenClass::Integer
            } else {
                TokenClass::Other
            };
        }

        if raw.bytes().any(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse::<f64>() {
                if n.is_finite() {
                    return TokenClass::Float;
                }
            }
        }

        if raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("false") {
            return TokenClass::Boolean;
        }

        TokenClass::Other
    }
}

/// Running state of one column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ColumnState {
    #[default]
    Unconstrained,
    Integer,
    Float,
    Boolean,
    String,
}

impl ColumnState {
    fn widen(self, token: TokenClass) -> Self {
        use ColumnState as S;
        use TokenClass as T;

        match (self, token) {
            (S::String, _) | (_, T::Other) => S::String,
            (S::Unconstrained, T::Integer) => S::Integer,
            (S::Unconstrained, T::Float) => S::Float,
            (S::Unconstrained, T::Boolean) => S::Boolean,
            (S::Integer, T::Integer) => S::Integer,
            (S::Integer | S::Float, T::Integer | T::Float) => S::Float,
            (S::Boolean, T::Boolean) => S::Boolean,
            _ => S::String,
        }
    }

    fn resolve(self) -> ScalarType {
        match self {
            ColumnState::Integer => ScalarType::Integer,
            ColumnState::Float => ScalarType::Float,
            ColumnState::Boolean => ScalarType::Boolean,
            ColumnState::Unconstrained | ColumnState::String => ScalarType::String,
        }
    }
}

/// Accumulates per-kind, per-field type evidence
#[derive(Debug, Default)]
pub struct TypeInferencer {
    kinds: HashMap<String, HashMap<String, ColumnState>>,
}

impl TypeInferencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one raw value into its column's state
    pub fn observe(&mut self, kind: &str, field: &str, raw: &str) {
        let token = TokenClass::of(raw);
        if let Some(state) = self.kinds.get_mut(kind).and_then(|c| c.get_mut(field)) {
            *state = state.widen(token);
            return;
        }

        let state = self
            .kinds
            .entry(kind.to_string())
            .or_default()
            .entry(field.to_string())
            .or_default();
        *state = state.widen(token);
    }

    /// The narrowest type consistent with every observed value.
    ///
    /// Columns that were never observed resolve to `String`.
    pub fn resolve(&self, kind: &str, field: &str) -> ScalarType {
        self.kinds
            .get(kind)
            .and_then(|columns| columns.get(field))
            .copied()
            .unwrap_or_default()
            .resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infer(values: &[&str]) -> ScalarType {
        let mut inferencer = TypeInferencer::new();
        for value in values {
            inferencer.observe("article", "field", value);
        }
        inferencer.resolve("article", "field")
    }

    #[test]
    fn test_all_integers() {
        assert_eq!(infer(&["1999", "2001", "2003"]), ScalarType::Integer);
        assert_eq!(infer(&["-4", "+7", "0"]), ScalarType::Integer);
    }

    #[test]
    fn test_integers_and_floats_widen_to_float() {
        assert_eq!(infer(&["1", "2.5", "3"]), ScalarType::Float);
        assert_eq!(infer(&["1e3", "0.5"]), ScalarType::Float);
    }

    #[test]
    fn test_booleans() {
        assert_eq!(infer(&["true", "FALSE", "True"]), ScalarType::Boolean);
    }

    #[test]
    fn test_fallback_to_string() {
        assert_eq!(infer(&["1999", "n.d."]), ScalarType::String);
        assert_eq!(infer(&["true", "1"]), ScalarType::String);
        assert_eq!(infer(&["n.d.", "1999"]), ScalarType::String);
        assert_eq!(infer(&["inf"]), ScalarType::String);
        assert_eq!(infer(&["NaN", "1.0"]), ScalarType::String);
    }

    #[test]
    fn test_oversized_integer_stays_string() {
        assert_eq!(infer(&["99999999999999999999999"]), ScalarType::String);
    }

    #[test]
    fn test_unobserved_column_is_string() {
        let inferencer = TypeInferencer::new();
        assert_eq!(inferencer.resolve("article", "year"), ScalarType::String);
    }

    #[test]
    fn test_resolution_is_per_kind() {
        let mut inferencer = TypeInferencer::new();
        inferencer.observe("article", "year", "1999");
        inferencer.observe("book", "year", "n.d.");

        assert_eq!(inferencer.resolve("article", "year"), ScalarType::Integer);
        assert_eq!(inferencer.resolve("book", "year"), ScalarType::String);
        // Idempotent
        assert_eq!(inferencer.resolve("article", "year"), ScalarType::Integer);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ScalarType::Integer.to_string(), "integer");
        assert_eq!(ScalarType::Float.graph_name(), "double");
        assert_eq!(
            serde_json::to_string(&ScalarType::Boolean).unwrap(),
            "\"boolean\""
        );
    }
}
