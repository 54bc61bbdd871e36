//! Per-path cancellable timers.
//!
//! Scheduling a path that already has a pending timer aborts the old one and
//! starts over, so a burst of events for one file collapses into a single
//! callback once the burst goes quiet.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Set of pending per-path timers.
#[derive(Default)]
pub struct SettleTimers {
    pending: Arc<Mutex<HashMap<PathBuf, Pending>>>,
    next_generation: AtomicU64,
}

impl SettleTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire` once `delay` has passed without another `schedule` for `path`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, path: PathBuf, delay: Duration, fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let pending = self.pending.clone();
        let key = path.clone();

        // Held across spawn + insert so the timer can never look itself up
        // before its entry exists.
        let mut map = self.pending.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = pending.lock();
                match map.get(&key) {
                    Some(entry) if entry.generation == generation => {
                        map.remove(&key);
                    }
                    _ => return,
                }
            }
            fire().await;
        });

        if let Some(previous) = map.insert(path, Pending { generation, handle }) {
            trace!(delay_ms = delay.as_millis(), "Rescheduled settle timer");
            previous.handle.abort();
        }
    }

    /// Cancel the pending timer for `path`. Returns whether one was pending.
    pub fn cancel(&self, path: &Path) -> bool {
        match self.pending.lock().remove(path) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer.
    pub fn cancel_all(&self) {
        for (_, entry) in self.pending.lock().drain() {
            entry.handle.abort();
        }
    }

    /// Number of timers that have not fired yet.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for SettleTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
