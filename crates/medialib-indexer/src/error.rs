//! Indexer error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during indexing operations.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watcher error
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// Path not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// Path exists but cannot be used as a scan root
    #[error("Invalid directory: {0}")]
    InvalidDirectory(PathBuf),

    /// Scan requested before any root was configured
    #[error("No scan directory configured")]
    NoDirectory,

    /// Ignore pattern could not be compiled
    #[error("Invalid ignore pattern {pattern}: {message}")]
    Pattern { pattern: String, message: String },
}

impl From<notify::Error> for IndexerError {
    fn from(e: notify::Error) -> Self {
        IndexerError::Watcher(e.to_string())
    }
}

impl From<ignore::Error> for IndexerError {
    fn from(e: ignore::Error) -> Self {
        IndexerError::Pattern {
            pattern: String::new(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexerError::NotFound(PathBuf::from("/data/media"));
        assert!(err.to_string().contains("/data/media"));

        let err = IndexerError::InvalidDirectory(PathBuf::from("/etc/passwd"));
        assert!(err.to_string().starts_with("Invalid directory"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: IndexerError = io_err.into();
        assert!(matches!(err, IndexerError::Io(_)));
    }
}
