//! Registry of live-update channels.

use crate::protocol::ServerMessage;
use medialib_indexer::{epoch_seconds, MediaIndex};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, error, trace};
use uuid::Uuid;

/// The peer is gone or its buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("channel closed")]
pub struct ChannelClosed;

/// An outbound connection that can receive pushed messages.
///
/// `send` must not block; a peer that cannot take the message right now
/// reports failure and is dropped.
pub trait Channel: Send + Sync {
    fn send(&self, payload: &str) -> Result<(), ChannelClosed>;

    fn is_closed(&self) -> bool;

    /// Called after the hub has dropped the channel.
    fn close(&self) {}
}

/// Opaque subscription handle.
pub type SubscriptionId = Uuid;

/// Fans index summaries out to every registered channel.
pub struct SubscriberHub {
    index: Arc<MediaIndex>,
    channels: RwLock<HashMap<SubscriptionId, Arc<dyn Channel>>>,
    /// Serializes broadcasts so a later summary never overtakes an earlier one
    gate: Mutex<()>,
}

impl SubscriberHub {
    pub fn new(index: Arc<MediaIndex>) -> Self {
        Self {
            index,
            channels: RwLock::new(HashMap::new()),
            gate: Mutex::new(()),
        }
    }

    pub fn subscribe(&self, channel: Arc<dyn Channel>) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.channels.write().insert(id, channel);
        debug!(%id, "Subscriber registered");
        id
    }

    /// Remove a subscription. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.channels.write().remove(&id).is_some();
        if removed {
            debug!(%id, "Subscriber removed");
        }
        removed
    }

    /// Push the current index counts to everyone. Returns the number reached.
    ///
    /// Counts are read once, after whatever mutation preceded this call.
    /// Channels that fail are dropped after the pass.
    pub fn broadcast(&self) -> usize {
        let _gate = self.gate.lock();
        let counts = self.index.counts();
        let message = ServerMessage::media_updated(counts, epoch_seconds(SystemTime::now()));
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to serialize update");
                return 0;
            }
        };

        let targets: Vec<(SubscriptionId, Arc<dyn Channel>)> = self
            .channels
            .read()
            .iter()
            .map(|(id, ch)| (*id, ch.clone()))
            .collect();

        let mut failed = Vec::new();
        for (id, channel) in &targets {
            if channel.send(&payload).is_err() {
                failed.push(*id);
            }
        }

        let delivered = targets.len() - failed.len();
        if !failed.is_empty() {
            self.drop_channels(&failed);
        }
        trace!(delivered, dropped = failed.len(), total = counts.total, "Broadcast update");
        delivered
    }

    /// Drop channels that report themselves closed. Returns how many went.
    pub fn reap(&self) -> usize {
        let dead: Vec<SubscriptionId> = self
            .channels
            .read()
            .iter()
            .filter(|(_, ch)| ch.is_closed())
            .map(|(id, _)| *id)
            .collect();
        if !dead.is_empty() {
            self.drop_channels(&dead);
            debug!(reaped = dead.len(), "Reaped closed subscribers");
        }
        dead.len()
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    fn drop_channels(&self, ids: &[SubscriptionId]) {
        let removed: Vec<Arc<dyn Channel>> = {
            let mut channels = self.channels.write();
            ids.iter().filter_map(|id| channels.remove(id)).collect()
        };
        for channel in removed {
            channel.close();
        }
    }
}
