//! File system watcher for the scan root.
//!
//! Raw OS events are deduplicated by `notify-debouncer-full`, then dispatched
//! on a tokio task: deletions go straight to the sink, creations and
//! modifications wait for the file to settle before the sink hears about them.

use crate::debounce::SettleTimers;
use crate::IndexerError;
use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Assumed sustained write speed when estimating how long a copy takes.
const WRITE_BYTES_PER_SEC: f64 = 40.0 * 1024.0 * 1024.0;

/// File change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// A file system change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Receives settled changes from a [`ChangeWatcher`].
#[async_trait]
pub trait ChangeSink: Send + Sync + 'static {
    /// Whether `path` is worth waiting on. Called before any timer is set.
    fn is_media(&self, path: &Path) -> bool;

    /// `path` was deleted or renamed away.
    async fn file_removed(&self, path: &Path);

    /// `path` was created or written and has been quiet for its settle delay.
    async fn file_settled(&self, path: &Path);
}

/// Bounds for a size-proportional settle delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleRange {
    pub min: Duration,
    pub max: Duration,
}

impl SettleRange {
    pub const fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Delay for a file of `size` bytes: the minimum plus estimated write time, capped.
    pub fn delay_for(&self, size: u64) -> Duration {
        let writing = Duration::from_secs_f64(size as f64 / WRITE_BYTES_PER_SEC);
        (self.min + writing).min(self.max)
    }
}

/// Options for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Window used to merge raw OS events
    pub event_window: Duration,
    /// Settle delay for newly created files
    pub create_delay: SettleRange,
    /// Settle delay for modified files
    pub modify_delay: SettleRange,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            event_window: Duration::from_millis(250),
            create_delay: SettleRange::new(Duration::from_millis(1500), Duration::from_secs(10)),
            modify_delay: SettleRange::new(Duration::from_secs(1), Duration::from_secs(8)),
        }
    }
}

struct ActiveWatch {
    root: PathBuf,
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    dispatch: JoinHandle<()>,
    timers: Arc<SettleTimers>,
}

/// Watches one root at a time. Either stopped or running.
pub struct ChangeWatcher {
    options: WatcherOptions,
    sink: Arc<dyn ChangeSink>,
    active: Mutex<Option<ActiveWatch>>,
}

impl ChangeWatcher {
    pub fn new(sink: Arc<dyn ChangeSink>) -> Self {
        Self::with_options(sink, WatcherOptions::default())
    }

    pub fn with_options(sink: Arc<dyn ChangeSink>, options: WatcherOptions) -> Self {
        Self {
            options,
            sink,
            active: Mutex::new(None),
        }
    }

    /// Start watching `dir`, replacing any current watch.
    ///
    /// The previous watch is fully torn down before the new one starts.
    /// Returns the canonical root being watched.
    pub async fn start(&self, dir: &Path) -> Result<PathBuf, IndexerError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            shutdown(previous).await;
        }

        let root = dir
            .canonicalize()
            .map_err(|_| IndexerError::NotFound(dir.to_path_buf()))?;
        if !root.is_dir() {
            return Err(IndexerError::InvalidDirectory(root));
        }

        let (tx, rx) = mpsc::channel(1000);
        let mut debouncer = new_debouncer(
            self.options.event_window,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        for change in convert_event(&event.event) {
                            if tx.blocking_send(change).is_err() {
                                debug!("Change receiver gone, dropping event");
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "Watcher error");
                    }
                }
            },
        )?;
        debouncer.watch(&root, RecursiveMode::Recursive)?;

        let timers = Arc::new(SettleTimers::new());
        let dispatch = tokio::spawn(dispatch_loop(
            rx,
            self.sink.clone(),
            timers.clone(),
            self.options.clone(),
        ));

        info!(path = ?root, "Started watching");

        *active = Some(ActiveWatch {
            root: root.clone(),
            debouncer,
            dispatch,
            timers,
        });
        Ok(root)
    }

    /// Stop watching. Safe to call when already stopped.
    pub async fn stop(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            shutdown(previous).await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Root currently being watched.
    pub async fn root(&self) -> Option<PathBuf> {
        self.active.lock().await.as_ref().map(|a| a.root.clone())
    }
}

async fn shutdown(watch: ActiveWatch) {
    let ActiveWatch {
        root,
        debouncer,
        dispatch,
        timers,
    } = watch;

    // Drop the receiver first so the debouncer thread can never block on a full channel.
    dispatch.abort();
    let _ = dispatch.await;
    timers.cancel_all();

    if let Err(e) = tokio::task::spawn_blocking(move || debouncer.stop()).await {
        error!(error = %e, "Failed to stop debouncer");
    }
    info!(path = ?root, "Stopped watching");
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<FileChange>,
    sink: Arc<dyn ChangeSink>,
    timers: Arc<SettleTimers>,
    options: WatcherOptions,
) {
    while let Some(change) = rx.recv().await {
        debug!(path = ?change.path, kind = ?change.kind, "File change detected");
        match change.kind {
            ChangeKind::Deleted => {
                timers.cancel(&change.path);
                sink.file_removed(&change.path).await;
            }
            ChangeKind::Created | ChangeKind::Modified => {
                let range = if change.kind == ChangeKind::Created {
                    options.create_delay
                } else {
                    options.modify_delay
                };
                schedule_settle(change.path, range, &sink, &timers).await;
            }
        }
    }
}

async fn schedule_settle(
    path: PathBuf,
    range: SettleRange,
    sink: &Arc<dyn ChangeSink>,
    timers: &SettleTimers,
) {
    if !sink.is_media(&path) {
        return;
    }
    // Gone already, or a directory: nothing to wait for
    let size = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return,
        Err(e) => {
            debug!(path = ?path, error = %e, "Changed file vanished before stat");
            return;
        }
    };

    let delay = range.delay_for(size);
    debug!(path = ?path, size, delay_ms = delay.as_millis(), "Scheduling settle");

    let sink = sink.clone();
    let target = path.clone();
    timers.schedule(path, delay, move || async move {
        sink.file_settled(&target).await;
    });
}

/// Convert a notify event into zero or more changes.
///
/// Renames become a delete of the old path and a create of the new one.
pub fn convert_event(event: &Event) -> Vec<FileChange> {
    let change = |path: &PathBuf, kind| FileChange {
        path: path.clone(),
        kind,
    };
    let Some(first) = event.paths.first() else {
        return Vec::new();
    };

    match &event.kind {
        EventKind::Create(_) => vec![change(first, ChangeKind::Created)],
        EventKind::Remove(_) => vec![change(first, ChangeKind::Deleted)],
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both => {
                let mut changes = vec![change(first, ChangeKind::Deleted)];
                if let Some(to) = event.paths.get(1) {
                    changes.push(change(to, ChangeKind::Created));
                }
                changes
            }
            RenameMode::From => vec![change(first, ChangeKind::Deleted)],
            RenameMode::To => vec![change(first, ChangeKind::Created)],
            // Platform did not say which side: look at the disk
            _ => {
                let kind = if first.exists() {
                    ChangeKind::Created
                } else {
                    ChangeKind::Deleted
                };
                vec![change(first, kind)]
            }
        },
        EventKind::Modify(_) => vec![change(first, ChangeKind::Modified)],
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        Event {
            kind,
            paths: paths.iter().map(PathBuf::from).collect(),
            attrs: Default::default(),
        }
    }

    #[test]
    fn test_watcher_options_default() {
        let options = WatcherOptions::default();
        assert_eq!(options.create_delay.min, Duration::from_millis(1500));
        assert_eq!(options.create_delay.max, Duration::from_secs(10));
        assert_eq!(options.modify_delay.min, Duration::from_secs(1));
        assert_eq!(options.modify_delay.max, Duration::from_secs(8));
    }

    #[test]
    fn test_settle_delay_grows_with_size() {
        let range = WatcherOptions::default().create_delay;
        assert_eq!(range.delay_for(0), Duration::from_millis(1500));

        let medium = range.delay_for(80 * 1024 * 1024);
        assert!(medium > Duration::from_millis(3400) && medium < Duration::from_millis(3600));

        assert_eq!(range.delay_for(10 * 1024 * 1024 * 1024), Duration::from_secs(10));
    }

    #[test]
    fn test_convert_event_create() {
        let changes = convert_event(&event(EventKind::Create(CreateKind::File), &["a.jpg"]));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Created);
    }

    #[test]
    fn test_convert_event_modify() {
        let changes = convert_event(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["a.jpg"],
        ));
        assert_eq!(changes[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn test_convert_event_delete() {
        let changes = convert_event(&event(EventKind::Remove(RemoveKind::File), &["a.jpg"]));
        assert_eq!(changes[0].kind, ChangeKind::Deleted);
    }

    #[test]
    fn test_convert_event_rename_both() {
        let changes = convert_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["old.mp4", "new.mp4"],
        ));
        assert_eq!(
            changes,
            vec![
                FileChange {
                    path: PathBuf::from("old.mp4"),
                    kind: ChangeKind::Deleted
                },
                FileChange {
                    path: PathBuf::from("new.mp4"),
                    kind: ChangeKind::Created
                },
            ]
        );
    }

    #[test]
    fn test_convert_event_rename_halves() {
        let from = convert_event(&event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["old.mp4"]));
        assert_eq!(from[0].kind, ChangeKind::Deleted);

        let to = convert_event(&event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["new.mp4"]));
        assert_eq!(to[0].kind, ChangeKind::Created);
    }

    #[test]
    fn test_convert_event_ignored_kinds() {
        assert!(convert_event(&event(EventKind::Access(AccessKind::Read), &["a.jpg"])).is_empty());
        assert!(convert_event(&event(EventKind::Any, &["a.jpg"])).is_empty());
        assert!(convert_event(&event(EventKind::Create(CreateKind::File), &[])).is_empty());
    }
}
