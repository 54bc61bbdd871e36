//! The media service: one object owning the index, scanner, watcher and hub.
//!
//! Every mutation of the index is followed, on the same task, by persisting
//! the new totals and broadcasting them, so subscribers never see counts from
//! before the mutation that notified them.

use crate::access::resolve_media_path;
use crate::config::{validate_size, ConfigPatch, ConfigStore, LibraryConfig};
use crate::error::{AccessError, CoreError};
use crate::hub::SubscriberHub;
use crate::protocol::{
    CleanupSummary, MediaItem, MediaList, Pagination, RandomMedia, ScanRequest, ScanSummary, StatusReport,
    ValidateResponse,
};
use async_trait::async_trait;
use medialib_indexer::{
    validate_root, ChangeSink, ChangeWatcher, MediaCounts, MediaFilter, MediaIndex, ScanMode,
    ScanOptions, ScanOutcome, Scanner, UnknownFilter, Walker, WatcherOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State shared with the watcher's dispatch task.
struct Library {
    config: Arc<ConfigStore>,
    index: Arc<MediaIndex>,
    scanner: Scanner,
    hub: SubscriberHub,
}

impl Library {
    /// Persist the current totals and push them to subscribers.
    async fn publish(&self) -> MediaCounts {
        let counts = self.index.counts();
        let config = self.config.clone();
        match tokio::task::spawn_blocking(move || config.record_stats(counts)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to persist library stats"),
            Err(e) => warn!(error = %e, "Stats writer task failed"),
        }
        self.hub.broadcast();
        counts
    }
}

#[async_trait]
impl ChangeSink for Library {
    fn is_media(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| self.config.classifier().classify_name(n))
            .is_some()
    }

    async fn file_removed(&self, path: &Path) {
        if self.index.remove(path) {
            info!(path = ?path, "Media removed");
            self.publish().await;
        }
    }

    async fn file_settled(&self, path: &Path) {
        debug!(path = ?path, "Change settled, running incremental scan");
        let mut changed = match self.scanner.scan(ScanMode::Incremental).await {
            Ok(ScanOutcome::Completed(report)) => {
                if report.found > 0 {
                    info!(found = report.found, "Picked up changed media");
                }
                true
            }
            Ok(ScanOutcome::Busy) => false,
            Err(e) => {
                warn!(error = %e, "Incremental scan failed");
                false
            }
        };

        // Renamed or moved-in files keep an mtime older than the checkpoint
        match self.scanner.index_file(path).await {
            Ok(Some(record)) => {
                debug!(path = ?record.relative_path, "Indexed settled file");
                changed = true;
            }
            Ok(None) => {}
            Err(e) => warn!(path = ?path, error = %e, "Failed to index settled file"),
        }

        if changed {
            self.publish().await;
        }
    }
}

/// The media library service.
pub struct MediaService {
    library: Arc<Library>,
    watcher: ChangeWatcher,
}

impl MediaService {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self::with_options(config, ScanOptions::default(), WatcherOptions::default())
    }

    pub fn with_options(config: Arc<ConfigStore>, scan: ScanOptions, watch: WatcherOptions) -> Self {
        let index = Arc::new(MediaIndex::new());
        let library = Arc::new(Library {
            config,
            index: index.clone(),
            scanner: Scanner::with_options(index.clone(), scan),
            hub: SubscriberHub::new(index),
        });
        let watcher = ChangeWatcher::with_options(library.clone(), watch);
        Self { library, watcher }
    }

    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.library.config
    }

    pub fn index(&self) -> &Arc<MediaIndex> {
        &self.library.index
    }

    pub fn hub(&self) -> &SubscriberHub {
        &self.library.hub
    }

    pub fn scanner(&self) -> &Scanner {
        &self.library.scanner
    }

    pub fn counts(&self) -> MediaCounts {
        self.library.index.counts()
    }

    /// Initial full scan of the configured directory, then start watching it.
    ///
    /// An unusable directory is logged and leaves the service running empty.
    pub async fn start(&self) -> Result<(), CoreError> {
        let Some(settings) = self.library.config.scan_settings() else {
            info!("No scan directory configured, waiting for one");
            return Ok(());
        };
        let root = settings.root.clone();
        self.library.scanner.configure(settings);

        match self.library.scanner.scan(ScanMode::Full).await {
            Ok(ScanOutcome::Completed(report)) => {
                info!(total = report.counts.total, duration_ms = report.duration_ms, "Initial scan complete");
                self.library.publish().await;
            }
            Ok(ScanOutcome::Busy) => {}
            Err(e) => {
                warn!(path = ?root, error = %e, "Initial scan failed");
                return Ok(());
            }
        }

        if let Err(e) = self.watcher.start(&root).await {
            warn!(path = ?root, error = %e, "Failed to start watcher");
        }
        Ok(())
    }

    /// Stop watching; the index stays as is.
    pub async fn shutdown(&self) {
        self.watcher.stop().await;
    }

    /// Filtered, paginated listing. `limit == 0` returns everything.
    pub fn list(&self, filter: MediaFilter, limit: usize, offset: usize) -> MediaList {
        let (records, counts) = self.library.index.page(filter, limit, offset);
        let filtered = counts.for_filter(filter);
        let last_updated = self.library.config.read(|c| c.stats.last_updated);

        MediaList {
            media: records.iter().map(MediaItem::from).collect(),
            total_count: counts.total,
            filtered_count: filtered,
            image_count: counts.image,
            video_count: counts.video,
            last_updated,
            pagination: Pagination {
                total: filtered,
                limit,
                offset,
                has_more: limit > 0 && offset + records.len() < filtered,
            },
        }
    }

    /// One record at random, or `None` if nothing matches.
    pub fn random(&self, filter: MediaFilter) -> Option<RandomMedia> {
        self.library
            .index
            .pick_random(filter)
            .map(|record| RandomMedia::from(&record))
    }

    /// Absolute path for a client-supplied relative path, re-validated
    /// against the current root.
    pub fn resolve_file(&self, relative: &str) -> Result<PathBuf, AccessError> {
        let Some(settings) = self.library.config.scan_settings() else {
            return Err(AccessError::NotFound(relative.to_string()));
        };
        resolve_media_path(&settings, relative)
    }

    /// Drop records whose file is gone or is no longer a file, and records
    /// the current extensions, ignore patterns or size ceilings reject.
    pub async fn cleanup(&self) -> Result<CleanupSummary, CoreError> {
        let classifier = self.library.config.classifier();
        let settings = self.library.config.scan_settings();
        let index = self.library.index.clone();
        let removed = tokio::task::spawn_blocking(move || {
            let matcher = settings.and_then(|s| {
                let root = s.root.canonicalize().ok()?;
                Walker::new(&root, &s.ignore_patterns).ok()
            });
            index.prune(|record| {
                if matcher.as_ref().is_some_and(|m| m.is_ignored(&record.absolute_path)) {
                    return false;
                }
                if classifier.classify_name(&record.name).is_none() {
                    return false;
                }
                match std::fs::metadata(&record.absolute_path) {
                    Ok(meta) => meta.is_file() && classifier.within_limit(record.kind, meta.len()),
                    Err(_) => false,
                }
            })
        })
        .await
        .map_err(|e| CoreError::Indexer(e.to_string()))?;

        let counts = self.library.publish().await;
        info!(removed, remaining = counts.total, "Cleanup complete");
        Ok(CleanupSummary {
            removed,
            total_count: counts.total,
            image_count: counts.image,
            video_count: counts.video,
        })
    }

    /// Apply optional directory and limit overrides, then run a full scan.
    ///
    /// Fails with [`CoreError::ScanInProgress`] without touching anything if
    /// a scan is already running.
    pub async fn trigger_scan(&self, request: ScanRequest) -> Result<ScanSummary, CoreError> {
        let library = &self.library;
        let Some(permit) = library.scanner.try_begin() else {
            debug!("Scan requested while one is running");
            return Err(CoreError::ScanInProgress);
        };

        // Validate everything before changing anything
        let new_root = request.path.as_deref().map(validate_root).transpose()?;
        for mb in [request.image_max_mb, request.video_max_mb].into_iter().flatten() {
            validate_size(mb)?;
        }
        if new_root.is_none() && library.config.scan_directory().is_none() {
            return Err(CoreError::NoDirectory);
        }

        let mut directory_changed = false;
        if let Some(root) = new_root {
            if library.config.scan_directory().as_deref() != Some(root.as_path()) {
                info!(path = ?root, "Scan directory changed");
                library.config.set_scan_directory(root)?;
                library.index.clear();
                directory_changed = true;
            }
        }
        if library
            .config
            .set_size_limits(request.image_max_mb, request.video_max_mb)?
        {
            info!(image_max_mb = ?request.image_max_mb, video_max_mb = ?request.video_max_mb, "Size limits changed");
        }

        let settings = library.config.scan_settings().ok_or(CoreError::NoDirectory)?;
        let root = settings.root.clone();
        library.scanner.configure(settings);

        if directory_changed || !self.watcher.is_running().await {
            if let Err(e) = self.watcher.start(&root).await {
                warn!(path = ?root, error = %e, "Failed to start watcher");
            }
        }

        let report = match library.scanner.run(permit, ScanMode::Full).await {
            Ok(report) => report,
            Err(e) => {
                // The index was cleared; tell subscribers even though the scan failed
                if directory_changed {
                    library.publish().await;
                }
                return Err(e.into());
            }
        };

        let counts = library.publish().await;
        Ok(ScanSummary {
            status: "success".to_string(),
            message: format!("Scan complete: {} media files", counts.total),
            directory: Some(report.root),
            total_count: counts.total,
            image_count: counts.image,
            video_count: counts.video,
            pruned: Some(report.dropped),
            duration_ms: Some(report.duration_ms),
        })
    }

    pub async fn status(&self) -> StatusReport {
        let counts = self.library.index.counts();
        let (directory, last_updated, image_max_mb, video_max_mb) = self.library.config.read(|c| {
            (
                c.scan_directory.clone(),
                c.stats.last_updated,
                c.media.image.max_size_mb,
                c.media.video.max_size_mb,
            )
        });
        StatusReport {
            watcher_running: self.watcher.is_running().await,
            scan_in_progress: self.library.scanner.is_scanning(),
            directory,
            total_count: counts.total,
            image_count: counts.image,
            video_count: counts.video,
            last_updated,
            image_max_mb,
            video_max_mb,
            subscribers: self.library.hub.len(),
        }
    }

    /// Check a candidate directory without changing any state.
    pub fn validate_directory(&self, path: &str) -> ValidateResponse {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return ValidateResponse {
                valid: false,
                error: Some("Path is empty".to_string()),
            };
        }
        match validate_root(Path::new(trimmed)) {
            Ok(_) => ValidateResponse {
                valid: true,
                error: None,
            },
            Err(e) => ValidateResponse {
                valid: false,
                error: Some(CoreError::from(e).to_string()),
            },
        }
    }

    pub fn config(&self) -> LibraryConfig {
        self.library.config.get()
    }

    /// Apply and persist a config patch. Classifier changes apply from the next scan.
    pub fn update_config(&self, patch: ConfigPatch) -> Result<LibraryConfig, CoreError> {
        let updated = self.library.config.update(patch)?;
        if let Some(settings) = updated.scan_settings() {
            self.library.scanner.configure(settings);
        }
        Ok(updated)
    }

    /// Count for a client-supplied kind name, from one read of the index.
    pub fn filtered_count(&self, media_type: &str) -> Result<(MediaFilter, usize), UnknownFilter> {
        let filter: MediaFilter = media_type.parse()?;
        Ok((filter, self.library.index.counts().for_filter(filter)))
    }

    /// Removal path used by the watcher, exposed for callers that learn of
    /// deletions some other way.
    pub async fn file_removed(&self, path: &Path) {
        self.library.file_removed(path).await;
    }

    /// Settle path used by the watcher.
    pub async fn file_settled(&self, path: &Path) {
        self.library.file_settled(path).await;
    }
}
