//! Configuration for the medialib server.
//!
//! Stored as JSON. Every field has a serde default so older or hand-edited
//! files keep loading; a file that cannot be parsed at all falls back to
//! defaults with a warning.

use crate::CoreError;
use chrono::{DateTime, Utc};
use medialib_indexer::classifier::normalize_extension;
use medialib_indexer::{
    Classifier, KindRule, MediaCounts, MediaKind, ScanSettings, Walker, DEFAULT_IGNORE_PATTERNS,
    DEFAULT_IMAGE_EXTENSIONS, DEFAULT_VIDEO_EXTENSIONS,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current on-disk format version.
pub const CONFIG_VERSION: u32 = 1;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Library configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Root of the media library
    #[serde(default)]
    pub scan_directory: Option<PathBuf>,

    /// Per-kind extensions and size ceilings
    #[serde(default)]
    pub media: MediaConfig,

    /// Glob patterns skipped during scans
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Let file signatures override extensions
    #[serde(default)]
    pub sniff_content: bool,

    /// CORS origins; empty allows any
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// HTTP listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Totals from the last scan or cleanup
    #[serde(default)]
    pub stats: LibraryStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_image")]
    pub image: KindConfig,
    #[serde(default = "default_video")]
    pub video: KindConfig,
}

/// Extensions and ceiling for one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindConfig {
    pub extensions: Vec<String>,
    /// Ceiling in MB; 0 means unlimited
    pub max_size_mb: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub total_count: usize,
    pub image_count: usize,
    pub video_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Partial update accepted at runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub image_extensions: Option<Vec<String>>,
    pub video_extensions: Option<Vec<String>>,
    pub image_max_mb: Option<f64>,
    pub video_max_mb: Option<f64>,
    pub ignore_patterns: Option<Vec<String>>,
    pub allowed_origins: Option<Vec<String>>,
    pub sniff_content: Option<bool>,
}

fn default_config_version() -> u32 {
    CONFIG_VERSION
}

fn default_ignore_patterns() -> Vec<String> {
    DEFAULT_IGNORE_PATTERNS.iter().map(|s| s.to_string()).collect()
}

fn default_listen() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_image() -> KindConfig {
    KindConfig {
        extensions: DEFAULT_IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        max_size_mb: 5.0,
    }
}

fn default_video() -> KindConfig {
    KindConfig {
        extensions: DEFAULT_VIDEO_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        max_size_mb: 100.0,
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            video: default_video(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            scan_directory: None,
            media: MediaConfig::default(),
            ignore_patterns: default_ignore_patterns(),
            sniff_content: false,
            allowed_origins: Vec::new(),
            listen: default_listen(),
            log_level: default_log_level(),
            stats: LibraryStats::default(),
        }
    }
}

impl KindConfig {
    /// Ceiling in bytes (0 = unlimited).
    pub fn max_size_bytes(&self) -> u64 {
        mb_to_bytes(self.max_size_mb)
    }
}

impl LibraryConfig {
    pub fn kind(&self, kind: MediaKind) -> &KindConfig {
        match kind {
            MediaKind::Image => &self.media.image,
            MediaKind::Video => &self.media.video,
        }
    }

    fn kind_mut(&mut self, kind: MediaKind) -> &mut KindConfig {
        match kind {
            MediaKind::Image => &mut self.media.image,
            MediaKind::Video => &mut self.media.video,
        }
    }

    /// Build a classifier from the current settings.
    pub fn classifier(&self) -> Classifier {
        Classifier::new(
            KindRule::new(&self.media.image.extensions, self.media.image.max_size_bytes()),
            KindRule::new(&self.media.video.extensions, self.media.video.max_size_bytes()),
        )
        .with_sniffing(self.sniff_content)
    }

    /// Scanner settings, if a scan directory is configured.
    pub fn scan_settings(&self) -> Option<ScanSettings> {
        self.scan_directory.as_ref().map(|root| ScanSettings {
            root: root.clone(),
            classifier: self.classifier(),
            ignore_patterns: self.ignore_patterns.clone(),
        })
    }

    /// Bring hand-edited values into canonical form.
    ///
    /// Extensions become `.lowercase` and are deduplicated; an empty list or
    /// an unusable ceiling falls back to the kind's default.
    pub fn normalize(&mut self) {
        for kind in MediaKind::ALL {
            let fallback = match kind {
                MediaKind::Image => default_image(),
                MediaKind::Video => default_video(),
            };
            let rule = self.kind_mut(kind);
            rule.extensions = normalize_extensions(&rule.extensions);
            if rule.extensions.is_empty() {
                rule.extensions = fallback.extensions;
            }
            if validate_size(rule.max_size_mb).is_err() {
                warn!(kind = %kind, value = rule.max_size_mb, "Invalid size ceiling, using default");
                rule.max_size_mb = fallback.max_size_mb;
            }
        }
    }

    /// Apply a patch after validating every field in it.
    pub fn apply(&mut self, patch: ConfigPatch) -> Result<(), CoreError> {
        let image_extensions = patch
            .image_extensions
            .map(|e| non_empty_extensions(MediaKind::Image, &e))
            .transpose()?;
        let video_extensions = patch
            .video_extensions
            .map(|e| non_empty_extensions(MediaKind::Video, &e))
            .transpose()?;
        if let Some(mb) = patch.image_max_mb {
            validate_size(mb)?;
        }
        if let Some(mb) = patch.video_max_mb {
            validate_size(mb)?;
        }
        if let Some(patterns) = &patch.ignore_patterns {
            Walker::new(Path::new("/"), patterns)?;
        }

        if let Some(exts) = image_extensions {
            self.media.image.extensions = exts;
        }
        if let Some(exts) = video_extensions {
            self.media.video.extensions = exts;
        }
        if let Some(mb) = patch.image_max_mb {
            self.media.image.max_size_mb = mb;
        }
        if let Some(mb) = patch.video_max_mb {
            self.media.video.max_size_mb = mb;
        }
        if let Some(patterns) = patch.ignore_patterns {
            self.ignore_patterns = patterns;
        }
        if let Some(origins) = patch.allowed_origins {
            self.allowed_origins = origins;
        }
        if let Some(sniff) = patch.sniff_content {
            self.sniff_content = sniff;
        }
        Ok(())
    }
}

fn mb_to_bytes(mb: f64) -> u64 {
    if mb.is_finite() && mb > 0.0 {
        (mb * BYTES_PER_MB).round() as u64
    } else {
        0
    }
}

/// A ceiling must be a finite, non-negative number of MB.
pub fn validate_size(mb: f64) -> Result<(), CoreError> {
    if mb.is_finite() && mb >= 0.0 {
        Ok(())
    } else {
        Err(CoreError::Config(format!("size limit must be a non-negative number, got {mb}")))
    }
}

fn normalize_extensions(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for ext in raw.iter().filter_map(|e| normalize_extension(e)) {
        if !out.contains(&ext) {
            out.push(ext);
        }
    }
    out
}

fn non_empty_extensions(kind: MediaKind, raw: &[String]) -> Result<Vec<String>, CoreError> {
    let exts = normalize_extensions(raw);
    if exts.is_empty() {
        return Err(CoreError::Config(format!("{kind} extension list cannot be empty")));
    }
    Ok(exts)
}

/// Shared, persisted configuration.
///
/// Guarded by its own lock, independent of the media index.
pub struct ConfigStore {
    path: PathBuf,
    config: RwLock<LibraryConfig>,
    /// One writer at a time on the temp file
    save_lock: Mutex<()>,
}

impl ConfigStore {
    /// `~/.medialib/config.json`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".medialib")
            .join("config.json")
    }

    /// Load from `path`, falling back to defaults when missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut config = if path.exists() {
            match Self::read_file(&path) {
                Ok(config) => {
                    debug!(path = ?path, "Loaded config");
                    config
                }
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to load config, using defaults");
                    LibraryConfig::default()
                }
            }
        } else {
            info!(path = ?path, "No config file, using defaults");
            LibraryConfig::default()
        };
        config.normalize();

        Self {
            path,
            config: RwLock::new(config),
            save_lock: Mutex::new(()),
        }
    }

    /// Wrap an existing config; `save` writes to `path`.
    pub fn with_config(path: impl Into<PathBuf>, mut config: LibraryConfig) -> Self {
        config.normalize();
        Self {
            path: path.into(),
            config: RwLock::new(config),
            save_lock: Mutex::new(()),
        }
    }

    fn read_file(path: &Path) -> Result<LibraryConfig, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current config.
    pub fn get(&self) -> LibraryConfig {
        self.config.read().clone()
    }

    /// Read a value without cloning the whole config.
    pub fn read<R>(&self, f: impl FnOnce(&LibraryConfig) -> R) -> R {
        f(&self.config.read())
    }

    pub fn scan_directory(&self) -> Option<PathBuf> {
        self.config.read().scan_directory.clone()
    }

    pub fn classifier(&self) -> Classifier {
        self.config.read().classifier()
    }

    pub fn scan_settings(&self) -> Option<ScanSettings> {
        self.config.read().scan_settings()
    }

    /// Write the config atomically: temp file, then rename over the target.
    pub fn save(&self) -> Result<(), CoreError> {
        let _saving = self.save_lock.lock();
        // Read inside the lock: the last save writes the newest state
        let json = serde_json::to_string_pretty(&*self.config.read())?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = ?self.path, "Saved config");
        Ok(())
    }

    /// Set and persist the scan directory.
    pub fn set_scan_directory(&self, dir: PathBuf) -> Result<(), CoreError> {
        self.config.write().scan_directory = Some(dir);
        self.save()
    }

    /// Set and persist size ceilings. Returns whether anything changed.
    pub fn set_size_limits(&self, image_mb: Option<f64>, video_mb: Option<f64>) -> Result<bool, CoreError> {
        for mb in [image_mb, video_mb].into_iter().flatten() {
            validate_size(mb)?;
        }
        let changed = {
            let mut config = self.config.write();
            let mut changed = false;
            for (kind, value) in [(MediaKind::Image, image_mb), (MediaKind::Video, video_mb)] {
                let Some(mb) = value else { continue };
                let rule = config.kind_mut(kind);
                if rule.max_size_mb != mb {
                    rule.max_size_mb = mb;
                    changed = true;
                }
            }
            changed
        };
        if changed {
            self.save()?;
        }
        Ok(changed)
    }

    /// Validate and apply a patch, persist it, and return the new config.
    pub fn update(&self, patch: ConfigPatch) -> Result<LibraryConfig, CoreError> {
        let updated = {
            let mut config = self.config.write();
            config.apply(patch)?;
            config.clone()
        };
        self.save()?;
        Ok(updated)
    }

    /// Store the latest totals with the current time and persist them.
    pub fn record_stats(&self, counts: MediaCounts) -> Result<(), CoreError> {
        {
            let mut config = self.config.write();
            config.stats = LibraryStats {
                total_count: counts.total,
                image_count: counts.image,
                video_count: counts.video,
                last_updated: Some(Utc::now()),
            };
        }
        self.save()
    }
}
