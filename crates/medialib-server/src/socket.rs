//! WebSocket transport for live updates.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use medialib_core::{Channel, ChannelClosed, ClientMessage, MediaService, ServerMessage};
use medialib_indexer::epoch_seconds;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error};

use crate::routes::SharedService;

/// Messages buffered per connection before it counts as stalled.
pub const OUTBOUND_BUFFER: usize = 64;

/// Hub-facing side of one WebSocket connection.
pub struct SocketChannel {
    tx: mpsc::Sender<String>,
    shutdown: Arc<Notify>,
    closed: AtomicBool,
}

impl SocketChannel {
    pub fn new(tx: mpsc::Sender<String>, shutdown: Arc<Notify>) -> Self {
        Self {
            tx,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }
}

impl Channel for SocketChannel {
    fn send(&self, payload: &str) -> Result<(), ChannelClosed> {
        if self.is_closed() {
            return Err(ChannelClosed);
        }
        // Never wait on a slow peer
        self.tx.try_send(payload.to_string()).map_err(|_| ChannelClosed)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }
}

pub(crate) async fn ws_handler(
    State(service): State<SharedService>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(service, socket))
}

async fn handle_socket(service: SharedService, socket: WebSocket) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let shutdown = Arc::new(Notify::new());
    let channel = Arc::new(SocketChannel::new(tx.clone(), shutdown.clone()));

    let id = service.hub().subscribe(channel.clone());
    if let Some(init) = encode(&ServerMessage::init(service.counts())) {
        let _ = channel.send(&init);
    }

    let write_task = async {
        while let Some(msg) = rx.recv().await {
            if ws_sink.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    };

    let read_task = async {
        while let Some(Ok(msg)) = ws_stream.next().await {
            match msg {
                Message::Text(text) => {
                    if let Some(reply) = reply_to(&service, &text) {
                        if tx.try_send(reply).is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = write_task => {},
        _ = read_task => {},
        _ = shutdown.notified() => {
            debug!(%id, "Connection dropped by hub");
        },
    }

    service.hub().unsubscribe(id);
    channel.closed.store(true, Ordering::Release);
    debug!(%id, "Connection closed");
}

/// Answer one client message, if it calls for an answer.
pub(crate) fn reply_to(service: &MediaService, text: &str) -> Option<String> {
    let reply = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => ServerMessage::Pong {
            timestamp: epoch_seconds(SystemTime::now()),
        },
        Ok(ClientMessage::FilterMedia { media_type }) => match service.filtered_count(&media_type) {
            Ok((filter, count)) => ServerMessage::FilteredMedia {
                media_type: filter,
                count,
            },
            Err(e) => ServerMessage::Error { message: e.to_string() },
        },
        Err(e) => {
            debug!(error = %e, "Unrecognised client message");
            ServerMessage::Error {
                message: "Unrecognised message".to_string(),
            }
        }
    };
    encode(&reply)
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(e) => {
            error!(error = %e, "Failed to serialize message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medialib_core::{ConfigStore, LibraryConfig};
    use tempfile::tempdir;

    fn reply_json(service: &MediaService, text: &str) -> serde_json::Value {
        serde_json::from_str(&reply_to(service, text).unwrap()).unwrap()
    }

    #[test]
    fn test_socket_channel_full_buffer_fails() {
        let (tx, _rx) = mpsc::channel(2);
        let channel = SocketChannel::new(tx, Arc::new(Notify::new()));

        assert!(channel.send("a").is_ok());
        assert!(channel.send("b").is_ok());
        assert_eq!(channel.send("c"), Err(ChannelClosed));
        assert!(!channel.is_closed());
    }

    #[test]
    fn test_socket_channel_closed_when_receiver_gone() {
        let (tx, rx) = mpsc::channel(2);
        let channel = SocketChannel::new(tx, Arc::new(Notify::new()));
        drop(rx);

        assert!(channel.is_closed());
        assert!(channel.send("a").is_err());
    }

    #[tokio::test]
    async fn test_close_wakes_connection() {
        let (tx, _rx) = mpsc::channel(2);
        let shutdown = Arc::new(Notify::new());
        let channel = SocketChannel::new(tx, shutdown.clone());

        channel.close();
        shutdown.notified().await;
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_replies() {
        let temp_dir = tempdir().unwrap();
        let store = ConfigStore::with_config(temp_dir.path().join("config.json"), LibraryConfig::default());
        let service = MediaService::new(Arc::new(store));

        let pong = reply_json(&service, r#"{"type":"ping"}"#);
        assert_eq!(pong["type"], "pong");
        assert!(pong["timestamp"].as_f64().unwrap() > 0.0);

        let filtered = reply_json(&service, r#"{"type":"filter_media","media_type":"image"}"#);
        assert_eq!(filtered["type"], "filtered_media");
        assert_eq!(filtered["media_type"], "image");
        assert_eq!(filtered["count"], 0);

        let unknown_kind = reply_json(&service, r#"{"type":"filter_media","media_type":"audio"}"#);
        assert_eq!(unknown_kind["type"], "error");

        let garbage = reply_json(&service, "not json");
        assert_eq!(garbage["type"], "error");
    }
}
