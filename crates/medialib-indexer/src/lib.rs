//! Medialib Indexer
//!
//! This crate provides the media indexing engine for medialib, including:
//! - Classification of files into images and videos, by extension or signature
//! - A thread-safe, newest-first in-memory index
//! - Full and incremental directory scans on a bounded worker pool
//! - File watching with size-aware settle delays

pub mod classifier;
pub mod debounce;
mod error;
pub mod index;
pub mod record;
pub mod scanner;
pub mod watcher;

pub use classifier::{Classifier, KindRule, DEFAULT_IMAGE_EXTENSIONS, DEFAULT_VIDEO_EXTENSIONS};
pub use debounce::SettleTimers;
pub use error::IndexerError;
pub use index::MediaIndex;
pub use record::{epoch_seconds, path_key, MediaCounts, MediaFilter, MediaKind, MediaRecord, UnknownFilter};
pub use scanner::{
    validate_root, ScanMode, ScanOptions, ScanOutcome, ScanPermit, ScanReport, ScanSettings, Scanner,
    Walker, DEFAULT_IGNORE_PATTERNS,
};
pub use watcher::{ChangeKind, ChangeSink, ChangeWatcher, FileChange, SettleRange, WatcherOptions};
