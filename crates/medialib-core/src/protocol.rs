//! Wire types for the live-update channel and the HTTP API.
//!
//! All payloads are JSON.

use chrono::{DateTime, Utc};
use medialib_indexer::{MediaCounts, MediaFilter, MediaKind, MediaRecord};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Prefix under which media files are served.
pub const MEDIA_URL_PREFIX: &str = "/media/";

/// Message pushed from server to a live-update client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when a client connects
    Init {
        total_count: usize,
        image_count: usize,
        video_count: usize,
    },

    /// Index changed
    MediaUpdated {
        total_count: usize,
        image_count: usize,
        video_count: usize,
        timestamp: f64,
    },

    /// Reply to `ping`
    Pong { timestamp: f64 },

    /// Reply to `filter_media`
    FilteredMedia { media_type: MediaFilter, count: usize },

    /// Client sent something we could not act on
    Error { message: String },
}

impl ServerMessage {
    pub fn init(counts: MediaCounts) -> Self {
        ServerMessage::Init {
            total_count: counts.total,
            image_count: counts.image,
            video_count: counts.video,
        }
    }

    pub fn media_updated(counts: MediaCounts, timestamp: f64) -> Self {
        ServerMessage::MediaUpdated {
            total_count: counts.total,
            image_count: counts.image,
            video_count: counts.video,
            timestamp,
        }
    }
}

/// Message sent by a live-update client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness check
    Ping,

    /// Ask for the count of one kind
    FilterMedia {
        #[serde(default)]
        media_type: String,
    },
}

/// One media file as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub name: String,
    /// Path relative to the scan root
    pub path: String,
    pub url: String,
    pub size: u64,
    pub media_type: MediaKind,
    pub last_modified: f64,
}

impl From<&MediaRecord> for MediaItem {
    fn from(record: &MediaRecord) -> Self {
        Self {
            name: record.name.clone(),
            path: record.relative_path.clone(),
            url: media_url(&record.relative_path),
            size: record.size_bytes,
            media_type: record.kind,
            last_modified: record.modified_at,
        }
    }
}

/// URL for a relative path, each segment percent-encoded.
pub fn media_url(relative_path: &str) -> String {
    let encoded: Vec<String> = relative_path
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{MEDIA_URL_PREFIX}{}", encoded.join("/"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

/// Response for a media listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaList {
    pub media: Vec<MediaItem>,
    pub total_count: usize,
    pub filtered_count: usize,
    pub image_count: usize,
    pub video_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub pagination: Pagination,
}

/// Random pick response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomMedia {
    pub url: String,
    pub name: String,
    pub size: u64,
    pub media_type: MediaKind,
    pub last_modified: f64,
}

impl From<&MediaRecord> for RandomMedia {
    fn from(record: &MediaRecord) -> Self {
        Self {
            url: media_url(&record.relative_path),
            name: record.name.clone(),
            size: record.size_bytes,
            media_type: record.kind,
            last_modified: record.modified_at,
        }
    }
}

/// Scan trigger request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanRequest {
    pub path: Option<PathBuf>,
    pub image_max_mb: Option<f64>,
    pub video_max_mb: Option<f64>,
}

/// Scan trigger response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub status: String,
    pub message: String,
    pub directory: Option<PathBuf>,
    pub total_count: usize,
    pub image_count: usize,
    pub video_count: usize,
    /// Records dropped because their file is gone or no longer qualifies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pruned: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Cleanup response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub removed: usize,
    pub total_count: usize,
    pub image_count: usize,
    pub video_count: usize,
}

/// Service status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub watcher_running: bool,
    pub scan_in_progress: bool,
    pub directory: Option<PathBuf>,
    pub total_count: usize,
    pub image_count: usize,
    pub video_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub image_max_mb: f64,
    pub video_max_mb: f64,
    pub subscribers: usize,
}

/// Directory validation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    pub path: String,
}

/// Directory validation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
