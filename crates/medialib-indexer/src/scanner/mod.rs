//! Media scanner.
//!
//! Walks the scan root on one blocking thread and fans per-file stat and
//! classification work out to a bounded pool of blocking tasks. Results are
//! written into the shared [`MediaIndex`]. Only one scan runs at a time; a
//! request that arrives while a scan is in flight is dropped.

mod walker;

pub use walker::{Walker, DEFAULT_IGNORE_PATTERNS};

use crate::classifier::Classifier;
use crate::index::MediaIndex;
use crate::record::{epoch_seconds, MediaCounts, MediaRecord};
use crate::IndexerError;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Full walk with reconciliation, or a walk bounded by the last checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Full,
    Incremental,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Full => "full",
            ScanMode::Incremental => "incremental",
        }
    }
}

/// Tuning knobs for the worker pool.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Maximum concurrent per-file tasks
    pub parallelism: usize,
    /// How long to wait for one file before giving up on it
    pub task_timeout: Duration,
    /// Paths buffered between the walker and the pool
    pub queue_depth: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            parallelism: num_cpus(),
            task_timeout: Duration::from_secs(10),
            queue_depth: 256,
        }
    }
}

/// What to scan and how to judge files.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub root: PathBuf,
    pub classifier: Classifier,
    pub ignore_patterns: Vec<String>,
}

/// Summary of a completed scan.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub mode: ScanMode,
    /// Canonical root that was scanned
    pub root: PathBuf,
    /// Records produced by this walk
    pub found: usize,
    /// Files skipped (unclassified, over the ceiling, unchanged)
    pub skipped: usize,
    /// Files that errored or timed out
    pub failed: usize,
    /// Existing records dropped because the file is gone or no longer qualifies
    pub dropped: usize,
    pub duration_ms: u64,
    /// Index counts right after the merge
    pub counts: MediaCounts,
}

/// Result of asking for a scan.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Completed(ScanReport),
    /// Another scan was already running; this request was dropped.
    Busy,
}

/// Marks a scan as in flight until dropped.
pub struct ScanPermit<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ScanPermit<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
struct Checkpoint {
    root: PathBuf,
    started_at: f64,
}

enum FileOutcome {
    Record(MediaRecord),
    Skipped,
    Failed,
}

/// Scans the configured root into a [`MediaIndex`].
pub struct Scanner {
    index: Arc<MediaIndex>,
    options: ScanOptions,
    settings: RwLock<Option<ScanSettings>>,
    in_progress: AtomicBool,
    checkpoint: Mutex<Option<Checkpoint>>,
}

impl Scanner {
    /// Create a scanner with default options and no root.
    pub fn new(index: Arc<MediaIndex>) -> Self {
        Self::with_options(index, ScanOptions::default())
    }

    /// Create a scanner with custom options.
    pub fn with_options(index: Arc<MediaIndex>, options: ScanOptions) -> Self {
        Self {
            index,
            options,
            settings: RwLock::new(None),
            in_progress: AtomicBool::new(false),
            checkpoint: Mutex::new(None),
        }
    }

    /// Replace the scan settings. A different root invalidates the checkpoint.
    pub fn configure(&self, settings: ScanSettings) {
        let mut checkpoint = self.checkpoint.lock();
        if checkpoint
            .as_ref()
            .is_some_and(|c| !same_root(&c.root, &settings.root))
        {
            *checkpoint = None;
        }
        *self.settings.write() = Some(settings);
    }

    pub fn settings(&self) -> Option<ScanSettings> {
        self.settings.read().clone()
    }

    pub fn index(&self) -> &Arc<MediaIndex> {
        &self.index
    }

    pub fn is_scanning(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Start time of the last successful scan, seconds since the epoch.
    pub fn last_checkpoint(&self) -> Option<f64> {
        self.checkpoint.lock().as_ref().map(|c| c.started_at)
    }

    /// Claim the scan slot, or `None` if a scan is running.
    pub fn try_begin(&self) -> Option<ScanPermit<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ScanPermit {
                flag: &self.in_progress,
            })
    }

    /// Scan unless another scan is already running.
    pub async fn scan(&self, mode: ScanMode) -> Result<ScanOutcome, IndexerError> {
        match self.try_begin() {
            Some(permit) => self.run(permit, mode).await.map(ScanOutcome::Completed),
            None => {
                debug!(mode = mode.as_str(), "Scan already in progress, dropping request");
                Ok(ScanOutcome::Busy)
            }
        }
    }

    /// Run a scan while holding the slot.
    ///
    /// On an invalid root the index is left untouched.
    pub async fn run(&self, permit: ScanPermit<'_>, mode: ScanMode) -> Result<ScanReport, IndexerError> {
        let _permit = permit;
        let start = Instant::now();

        let settings = self.settings().ok_or(IndexerError::NoDirectory)?;
        let root = validate_root(&settings.root)?;
        let walker = Walker::new(&root, &settings.ignore_patterns)?;

        // Checkpoint is the start time, so files written mid-scan are seen next time.
        let started_at = epoch_seconds(SystemTime::now());
        let since = match mode {
            ScanMode::Full => None,
            ScanMode::Incremental => self
                .checkpoint
                .lock()
                .as_ref()
                .filter(|c| same_root(&c.root, &root))
                .map(|c| c.started_at),
        };

        info!(path = ?root, mode = mode.as_str(), since = ?since, "Starting scan");

        let matcher = walker.clone();
        let (tx, mut rx) = mpsc::channel::<PathBuf>(self.options.queue_depth.max(1));
        let walk = tokio::task::spawn_blocking(move || {
            walker.for_each_file(|path| tx.blocking_send(path).is_ok())
        });

        let classifier = Arc::new(settings.classifier);
        let semaphore = Arc::new(Semaphore::new(self.options.parallelism.max(1)));
        let mut tasks = JoinSet::new();

        while let Some(path) = rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let root = root.clone();
            let classifier = classifier.clone();
            let task_timeout = self.options.task_timeout;
            tasks.spawn(async move {
                let _permit = permit;
                let job_path = path.clone();
                let job = tokio::task::spawn_blocking(move || inspect(&root, &job_path, &classifier, since));
                match tokio::time::timeout(task_timeout, job).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => {
                        error!(path = ?path, error = %e, "File task panicked");
                        FileOutcome::Failed
                    }
                    Err(_) => {
                        warn!(path = ?path, "File task timed out, skipping");
                        FileOutcome::Failed
                    }
                }
            });
        }

        let walked = walk.await.unwrap_or_else(|e| {
            error!(error = %e, "Walker task failed");
            0
        });

        let mut records = Vec::new();
        let (mut skipped, mut failed) = (0, 0);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(FileOutcome::Record(record)) => records.push(record),
                Ok(FileOutcome::Skipped) => skipped += 1,
                Ok(FileOutcome::Failed) => failed += 1,
                Err(e) => {
                    error!(error = %e, "File task aborted");
                    failed += 1;
                }
            }
        }

        let found = records.len();
        let index = self.index.clone();
        let merged = tokio::task::spawn_blocking(move || {
            let dropped = match mode {
                // Records admitted under older settings are re-judged by the current ones
                ScanMode::Full => index.merge(records, |r| still_qualifies(&matcher, &classifier, r)),
                ScanMode::Incremental => {
                    index.upsert(records);
                    0
                }
            };
            (dropped, index.counts())
        })
        .await;
        let (dropped, counts) = match merged {
            Ok(merged) => merged,
            Err(e) => {
                error!(error = %e, "Index merge failed");
                return Err(IndexerError::Io(std::io::Error::other(e.to_string())));
            }
        };

        *self.checkpoint.lock() = Some(Checkpoint {
            root: root.clone(),
            started_at,
        });

        let duration = start.elapsed();
        info!(
            mode = mode.as_str(),
            walked,
            found,
            skipped,
            failed,
            dropped,
            total = counts.total,
            images = counts.image,
            videos = counts.video,
            duration_ms = duration.as_millis(),
            "Scan complete"
        );

        Ok(ScanReport {
            mode,
            root,
            found,
            skipped,
            failed,
            dropped,
            duration_ms: duration.as_millis() as u64,
            counts,
        })
    }

    /// Stat, classify and upsert a single file, whatever its mtime.
    ///
    /// Renames and moves keep the original mtime, so a checkpoint-bounded
    /// scan would never pick them up. Returns the record if one was stored.
    pub async fn index_file(&self, path: &Path) -> Result<Option<MediaRecord>, IndexerError> {
        let settings = self.settings().ok_or(IndexerError::NoDirectory)?;
        let root = validate_root(&settings.root)?;
        let walker = Walker::new(&root, &settings.ignore_patterns)?;
        if walker.is_ignored(path) {
            debug!(path = ?path, "Settled path is outside the library or ignored");
            return Ok(None);
        }

        let classifier = settings.classifier;
        let target = path.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || inspect(&root, &target, &classifier, None))
            .await
            .map_err(|e| IndexerError::Io(std::io::Error::other(e.to_string())))?;

        match outcome {
            FileOutcome::Record(record) => {
                self.index.upsert(vec![record.clone()]);
                Ok(Some(record))
            }
            FileOutcome::Skipped | FileOutcome::Failed => Ok(None),
        }
    }
}

/// Check the root exists, is a directory, and is listable. Returns it canonicalised.
pub fn validate_root(root: &Path) -> Result<PathBuf, IndexerError> {
    let canonical = root.canonicalize().map_err(|e| {
        warn!(path = ?root, error = %e, "Scan directory not found");
        IndexerError::NotFound(root.to_path_buf())
    })?;
    if !canonical.is_dir() {
        warn!(path = ?canonical, "Scan path is not a directory");
        return Err(IndexerError::InvalidDirectory(canonical));
    }
    if let Err(e) = std::fs::read_dir(&canonical) {
        warn!(path = ?canonical, error = %e, "Scan directory is not readable");
        return Err(IndexerError::InvalidDirectory(canonical));
    }
    Ok(canonical)
}

/// Stat and classify one file.
fn inspect(root: &Path, path: &Path, classifier: &Classifier, since: Option<f64>) -> FileOutcome {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return FileOutcome::Skipped;
    };
    if classifier.classify_name(name).is_none() {
        return FileOutcome::Skipped;
    }

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            debug!(path = ?path, error = %e, "Cannot stat file");
            return FileOutcome::Failed;
        }
    };
    let modified_at = metadata.modified().map(epoch_seconds).unwrap_or(0.0);
    if since.is_some_and(|since| modified_at <= since) {
        return FileOutcome::Skipped;
    }

    let Some(kind) = classifier.classify(path) else {
        return FileOutcome::Skipped;
    };
    let size = metadata.len();
    if !classifier.within_limit(kind, size) {
        debug!(path = ?path, size, max = classifier.rule(kind).max_size(), "Skipping file over size ceiling");
        return FileOutcome::Skipped;
    }

    match MediaRecord::new(root, path, kind, size, modified_at) {
        Some(record) => FileOutcome::Record(record),
        None => FileOutcome::Skipped,
    }
}

/// Whether an indexed record would still be admitted by a walk under `matcher` and `classifier`.
fn still_qualifies(matcher: &Walker, classifier: &Classifier, record: &MediaRecord) -> bool {
    !matcher.is_ignored(&record.absolute_path)
        && classifier.classify_name(&record.name).is_some()
        && classifier.within_limit(record.kind, record.size_bytes)
}

fn same_root(a: &Path, b: &Path) -> bool {
    crate::record::path_key(a) == crate::record::path_key(b)
}

/// Get the number of CPUs available.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KindRule;
    use crate::record::MediaFilter;
    use std::fs;
    use tempfile::tempdir;

    fn settings(root: &Path) -> ScanSettings {
        ScanSettings {
            root: root.to_path_buf(),
            classifier: Classifier::new(
                KindRule::new([".jpg", ".png"], 5 * 1024 * 1024),
                KindRule::new([".mp4"], 100 * 1024 * 1024),
            ),
            ignore_patterns: DEFAULT_IGNORE_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn scanner_for(root: &Path) -> Scanner {
        let scanner = Scanner::new(Arc::new(MediaIndex::new()));
        scanner.configure(settings(root));
        scanner
    }

    fn report(outcome: ScanOutcome) -> ScanReport {
        match outcome {
            ScanOutcome::Completed(report) => report,
            ScanOutcome::Busy => panic!("scan unexpectedly busy"),
        }
    }

    #[tokio::test]
    async fn test_scan_empty_directory() {
        let temp_dir = tempdir().unwrap();
        let scanner = scanner_for(temp_dir.path());

        let report = report(scanner.scan(ScanMode::Full).await.unwrap());
        assert_eq!(report.found, 0);
        assert_eq!(report.counts, MediaCounts::default());
        assert!(scanner.last_checkpoint().is_some());
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn test_scan_classifies_and_enforces_ceiling() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.jpg"), vec![0u8; 1024]).unwrap();
        fs::write(root.join("b.mp4"), vec![0u8; 1024]).unwrap();
        fs::write(root.join("c.txt"), vec![0u8; 1024]).unwrap();
        fs::write(root.join("d.jpg"), vec![0u8; 10 * 1024 * 1024]).unwrap();

        let scanner = scanner_for(root);
        let report = report(scanner.scan(ScanMode::Full).await.unwrap());

        assert_eq!(
            report.counts,
            MediaCounts {
                total: 2,
                image: 1,
                video: 1
            }
        );
        let images = scanner.index().snapshot(MediaFilter::Image, 0, 0);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "a.jpg");
    }

    #[tokio::test]
    async fn test_scan_missing_root_leaves_index_untouched() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().to_path_buf();
        fs::write(root.join("a.jpg"), b"x").unwrap();

        let scanner = scanner_for(&root);
        scanner.scan(ScanMode::Full).await.unwrap();
        assert_eq!(scanner.index().len(), 1);

        scanner.configure(settings(&root.join("missing")));
        let result = scanner.scan(ScanMode::Full).await;
        assert!(matches!(result, Err(IndexerError::NotFound(_))));
        assert_eq!(scanner.index().len(), 1);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn test_scan_without_settings() {
        let scanner = Scanner::new(Arc::new(MediaIndex::new()));
        assert!(matches!(
            scanner.scan(ScanMode::Full).await,
            Err(IndexerError::NoDirectory)
        ));
    }

    #[tokio::test]
    async fn test_scan_rejected_while_in_progress() {
        let temp_dir = tempdir().unwrap();
        let scanner = scanner_for(temp_dir.path());

        let permit = scanner.try_begin().unwrap();
        assert!(scanner.is_scanning());
        assert!(matches!(
            scanner.scan(ScanMode::Incremental).await.unwrap(),
            ScanOutcome::Busy
        ));

        drop(permit);
        assert!(!scanner.is_scanning());
        assert!(matches!(
            scanner.scan(ScanMode::Incremental).await.unwrap(),
            ScanOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_incremental_scan_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.jpg"), b"x").unwrap();
        fs::write(root.join("b.mp4"), b"x").unwrap();

        let scanner = scanner_for(root);
        scanner.scan(ScanMode::Full).await.unwrap();
        let before = scanner.index().snapshot(MediaFilter::All, 0, 0);

        let first = report(scanner.scan(ScanMode::Incremental).await.unwrap());
        let second = report(scanner.scan(ScanMode::Incremental).await.unwrap());

        assert_eq!(first.counts, second.counts);
        assert_eq!(second.found, 0);
        assert_eq!(scanner.index().snapshot(MediaFilter::All, 0, 0), before);
    }

    #[tokio::test]
    async fn test_incremental_scan_keeps_untouched_records() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.jpg"), b"x").unwrap();

        let scanner = scanner_for(root);
        scanner.scan(ScanMode::Full).await.unwrap();

        // Deleted without an event: incremental scans do not notice
        fs::remove_file(root.join("a.jpg")).unwrap();
        scanner.scan(ScanMode::Incremental).await.unwrap();
        assert_eq!(scanner.index().len(), 1);

        // A full scan reconciles
        scanner.scan(ScanMode::Full).await.unwrap();
        assert!(scanner.index().is_empty());
    }

    #[tokio::test]
    async fn test_configure_new_root_resets_checkpoint() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();

        let scanner = scanner_for(first.path());
        scanner.scan(ScanMode::Full).await.unwrap();
        assert!(scanner.last_checkpoint().is_some());

        scanner.configure(settings(second.path()));
        assert!(scanner.last_checkpoint().is_none());
    }

    #[tokio::test]
    async fn test_full_scan_applies_tightened_settings() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("big.jpg"), vec![0u8; 2 * 1024 * 1024]).unwrap();
        fs::write(root.join("small.png"), b"x").unwrap();
        fs::write(root.join("clip.mp4"), b"x").unwrap();

        let scanner = scanner_for(root);
        scanner.scan(ScanMode::Full).await.unwrap();
        assert_eq!(scanner.index().len(), 3);

        let mut tightened = settings(root);
        tightened.classifier = Classifier::new(
            KindRule::new([".jpg", ".png"], 1024 * 1024),
            KindRule::new([".mkv"], 100 * 1024 * 1024),
        );
        scanner.configure(tightened);

        let report = report(scanner.scan(ScanMode::Full).await.unwrap());
        assert_eq!(report.dropped, 2);
        let names: Vec<_> = scanner
            .index()
            .snapshot(MediaFilter::All, 0, 0)
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["small.png"]);
    }

    #[tokio::test]
    async fn test_index_file_ignores_checkpoint() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let scanner = scanner_for(&root);
        scanner.scan(ScanMode::Full).await.unwrap();

        // Moved in with an mtime far older than the checkpoint
        let moved = root.join("moved.jpg");
        fs::write(&moved, b"x").unwrap();
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        fs::File::options().write(true).open(&moved).unwrap().set_modified(old).unwrap();

        scanner.scan(ScanMode::Incremental).await.unwrap();
        assert!(scanner.index().is_empty());

        let record = scanner.index_file(&moved).await.unwrap().unwrap();
        assert_eq!(record.name, "moved.jpg");
        assert_eq!(scanner.index().len(), 1);

        fs::write(root.join(".hidden.jpg"), b"x").unwrap();
        fs::write(root.join("notes.txt"), b"x").unwrap();
        assert!(scanner.index_file(&root.join(".hidden.jpg")).await.unwrap().is_none());
        assert!(scanner.index_file(&root.join("notes.txt")).await.unwrap().is_none());
        assert_eq!(scanner.index().len(), 1);
    }

    #[test]
    fn test_validate_root_rejects_file() {
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("a.jpg");
        fs::write(&file, b"x").unwrap();

        assert!(matches!(validate_root(&file), Err(IndexerError::InvalidDirectory(_))));
        assert!(validate_root(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_scan_options_default() {
        let opts = ScanOptions::default();
        assert!(opts.parallelism >= 1);
        assert_eq!(opts.task_timeout, Duration::from_secs(10));
    }
}
