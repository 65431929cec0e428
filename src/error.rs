//! Error types for sigtrace
//!
//! Instrumentation failures never cross the boundary of a traced call; these
//! errors surface only from explicit operations (opening a context, replaying
//! or exporting streams, loading configuration).

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while recording, replaying or exporting traces
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode record: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid exclusion pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid extension for {path}: expected .{expected}")]
    InvalidExtension { path: PathBuf, expected: String },

    #[error("Corrupted frame at offset {offset}: {reason}")]
    CorruptFrame { offset: usize, reason: String },

    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Array not found: {0}")]
    ArrayNotFound(String),
}

/// Result type for sigtrace operations
pub type Result<T> = std::result::Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_extension_message() {
        let err = TraceError::InvalidExtension {
            path: PathBuf::from("run.json"),
            expected: "msgpack".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid extension for run.json: expected .msgpack"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TraceError = io.into();
        assert!(matches!(err, TraceError::Io(_)));
    }
}
