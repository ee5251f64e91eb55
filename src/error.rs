//! Error types for xmlmelt
//!
//! Every fallible operation in the library returns `Result<T, Error>`.
//! Nothing here is retryable: a failure aborts the conversion and whatever
//! files were already written are left on disk.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for xmlmelt
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Grammar errors
    // ========================================================================
    #[error("Failed to read grammar {path}: {source}")]
    SchemaRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed grammar: {message}")]
    Schema { message: String },

    // ========================================================================
    // Corpus errors
    // ========================================================================
    #[error("Malformed corpus at byte {position}: {message}")]
    Parse { position: u64, message: String },

    #[error("Invalid name {name:?} found in tag {tag:?} within element {parent:?}")]
    ReservedName {
        name: String,
        tag: String,
        parent: String,
    },

    #[error("Corpus changed between passes: {message}")]
    SchemaDrift { message: String },

    // ========================================================================
    // Configuration errors
    // ========================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ========================================================================
    // Output errors
    // ========================================================================
    #[error("Failed to open output {path}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {target}: {source}")]
    Write { target: String, source: csv::Error },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize metadata: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a grammar error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a corpus parse error at a byte offset
    pub fn parse(position: u64, message: impl ToString) -> Self {
        Self::Parse {
            position,
            message: message.to_string(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a drift error
    pub fn drift(message: impl Into<String>) -> Self {
        Self::SchemaDrift {
            message: message.into(),
        }
    }

    /// Create a reserved-name error
    pub fn reserved(
        name: impl Into<String>,
        tag: impl Into<String>,
        parent: impl Into<String>,
    ) -> Self {
        Self::ReservedName {
            name: name.into(),
            tag: tag.into(),
            parent: parent.into(),
        }
    }

    /// Create a CSV write error for a kind, label or path
    pub fn write(target: impl Into<String>, source: csv::Error) -> Self {
        Self::Write {
            target: target.into(),
            source,
        }
    }
}

/// Result type alias for xmlmelt
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::schema("unbalanced parentheses");
        assert_eq!(err.to_string(), "Malformed grammar: unbalanced parentheses");

        let err = Error::parse(42, "unexpected end of input");
        assert_eq!(
            err.to_string(),
            "Malformed corpus at byte 42: unexpected end of input"
        );

        let err = Error::reserved("id", "id", "article");
        assert_eq!(
            err.to_string(),
            "Invalid name \"id\" found in tag \"id\" within element \"article\""
        );
    }
}
