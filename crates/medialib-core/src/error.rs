//! Core error types for medialib.

use medialib_indexer::IndexerError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Scan directory missing, not a directory, or unreadable
    #[error("Invalid directory: {0}")]
    InvalidDirectory(String),

    /// No scan directory has been configured yet
    #[error("No scan directory configured")]
    NoDirectory,

    /// Rejected configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A scan is already running
    #[error("Scan already in progress")]
    ScanInProgress,

    /// Indexing failure that is not a directory problem
    #[error("Indexer error: {0}")]
    Indexer(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<IndexerError> for CoreError {
    fn from(e: IndexerError) -> Self {
        match e {
            IndexerError::NotFound(path) => {
                CoreError::InvalidDirectory(format!("Directory does not exist: {}", path.display()))
            }
            IndexerError::InvalidDirectory(path) => {
                CoreError::InvalidDirectory(format!("Not a readable directory: {}", path.display()))
            }
            IndexerError::NoDirectory => CoreError::NoDirectory,
            IndexerError::Pattern { pattern, message } => {
                CoreError::Config(format!("ignore pattern {pattern}: {message}"))
            }
            other => CoreError::Indexer(other.to_string()),
        }
    }
}

/// Why a requested media file could not be handed out.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    /// Path escapes the scan root, is a symlink, or is not servable media
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Nothing at that path
    #[error("File not found: {0}")]
    NotFound(String),

    /// Path exists but is not a regular file
    #[error("Not a file: {}", .0.display())]
    NotAFile(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexer_errors_map_to_invalid_directory() {
        let err: CoreError = IndexerError::NotFound(PathBuf::from("/nope")).into();
        assert!(matches!(err, CoreError::InvalidDirectory(ref m) if m.contains("/nope")));

        let err: CoreError = IndexerError::NoDirectory.into();
        assert!(matches!(err, CoreError::NoDirectory));

        let err: CoreError = IndexerError::Watcher("inotify limit".into()).into();
        assert!(matches!(err, CoreError::Indexer(_)));
    }

    #[test]
    fn test_access_error_display() {
        let err = AccessError::Forbidden("../../etc/passwd".into());
        assert_eq!(err.to_string(), "Access denied: ../../etc/passwd");
    }
}
