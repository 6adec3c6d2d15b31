//! Error types for the audit log pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type shared across crates.
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors (10-19)
    #[error("{kind} entry is missing required field '{field}'")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("{kind} entry completed at {completed} before it started at {started}")]
    InvertedTiming {
        kind: &'static str,
        started: String,
        completed: String,
    },

    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    // Configuration errors (20-29)
    #[error("configuration error: {0}")]
    Config(String),

    // Schema errors (30-39)
    #[error("schema error: {0}")]
    Schema(String),

    // Pipeline errors (40-49)
    #[error("sink error: {0}")]
    Sink(String),

    #[error("pipeline is shut down")]
    Closed,

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    /// Used for detailed error reporting in JSON output.
    pub fn code(&self) -> u32 {
        match self {
            Error::MissingField { .. } => 10,
            Error::InvertedTiming { .. } => 11,
            Error::InvalidEntry(_) => 12,
            Error::Config(_) => 20,
            Error::Schema(_) => 30,
            Error::Sink(_) => 40,
            Error::Closed => 41,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Whether this error was raised by entry validation.
    pub fn is_validation(&self) -> bool {
        (10..20).contains(&self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_codes() {
        let err = Error::MissingField {
            kind: "audit",
            field: "event_name",
        };
        assert_eq!(err.code(), 10);
        assert!(err.is_validation());
        assert!(!Error::Closed.is_validation());
    }

    #[test]
    fn test_display_mentions_field() {
        let err = Error::MissingField {
            kind: "log",
            field: "command_name",
        };
        assert_eq!(
            err.to_string(),
            "log entry is missing required field 'command_name'"
        );
    }
}
