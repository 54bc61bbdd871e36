//! Media records and the small value types around them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Classification of a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// All kinds, in display order.
    pub const ALL: [MediaKind; 2] = [MediaKind::Image, MediaKind::Video];

    /// Lower-case name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind filter for reads: everything, or one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFilter {
    #[default]
    All,
    Image,
    Video,
}

impl MediaFilter {
    /// Whether a record of `kind` passes this filter.
    pub fn accepts(&self, kind: MediaKind) -> bool {
        match self {
            MediaFilter::All => true,
            MediaFilter::Image => kind == MediaKind::Image,
            MediaFilter::Video => kind == MediaKind::Video,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFilter::All => "all",
            MediaFilter::Image => "image",
            MediaFilter::Video => "video",
        }
    }
}

impl From<MediaKind> for MediaFilter {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => MediaFilter::Image,
            MediaKind::Video => MediaFilter::Video,
        }
    }
}

/// Returned when a filter string is not one of `all`, `image`, `video`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown media type: {0}")]
pub struct UnknownFilter(pub String);

impl FromStr for MediaFilter {
    type Err = UnknownFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(MediaFilter::All),
            "image" => Ok(MediaFilter::Image),
            "video" => Ok(MediaFilter::Video),
            _ => Err(UnknownFilter(s.to_string())),
        }
    }
}

/// One indexed media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    /// Canonical absolute path; unique key within the index
    pub absolute_path: PathBuf,
    /// Path relative to the scan root, forward slashes
    pub relative_path: String,
    /// Base file name
    pub name: String,
    /// File size in bytes
    pub size_bytes: u64,
    /// Image or video
    pub kind: MediaKind,
    /// Last modification time, seconds since the epoch
    pub modified_at: f64,
}

impl MediaRecord {
    /// Build a record for `path` found under `root`.
    ///
    /// Returns `None` if `path` is not inside `root`.
    pub fn new(
        root: &Path,
        path: &Path,
        kind: MediaKind,
        size_bytes: u64,
        modified_at: f64,
    ) -> Option<Self> {
        let rel = path.strip_prefix(root).ok()?;
        let relative_path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if relative_path.is_empty() {
            return None;
        }
        let name = path.file_name()?.to_string_lossy().into_owned();

        Some(Self {
            absolute_path: path.to_path_buf(),
            relative_path,
            name,
            size_bytes,
            kind,
            modified_at,
        })
    }

    /// Key under which this record is stored.
    pub fn key(&self) -> String {
        path_key(&self.absolute_path)
    }
}

/// Aggregate counts taken from one consistent view of the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCounts {
    pub total: usize,
    pub image: usize,
    pub video: usize,
}

impl MediaCounts {
    /// Count matching `filter`.
    pub fn for_filter(&self, filter: MediaFilter) -> usize {
        match filter {
            MediaFilter::All => self.total,
            MediaFilter::Image => self.image,
            MediaFilter::Video => self.video,
        }
    }
}

/// Normalised lookup key for a path.
///
/// Windows file systems are case-insensitive, so keys are case-folded there.
pub fn path_key(path: &Path) -> String {
    let text = path.to_string_lossy();
    if cfg!(windows) {
        text.replace('/', "\\").to_lowercase()
    } else {
        text.into_owned()
    }
}

/// Seconds since the epoch, with sub-second precision.
pub fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
