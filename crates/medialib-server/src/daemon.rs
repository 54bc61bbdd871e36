//! Server lifecycle: start the service, serve HTTP, reap idle subscribers,
//! shut down cleanly.

use anyhow::{Context, Result};
use medialib_core::{ConfigStore, MediaService};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::routes;
use crate::signals;

/// How often closed subscribers are dropped.
pub const REAP_INTERVAL: Duration = Duration::from_secs(30);

/// The server process
pub struct Daemon {
    config: Arc<ConfigStore>,
    listen: String,
    shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
    pub fn new(config: Arc<ConfigStore>, listen: impl Into<String>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            listen: listen.into(),
            shutdown_tx,
        }
    }

    /// Sender that stops a running daemon.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind the listen address and serve until a shutdown signal.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen)
            .await
            .with_context(|| format!("Failed to bind {}", self.listen))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let service = Arc::new(MediaService::new(self.config.clone()));
        service
            .start()
            .await
            .context("Failed to start media service")?;

        let origins = self.config.read(|c| c.allowed_origins.clone());
        let app = routes::router(service.clone(), &origins);

        info!(
            addr = %listener.local_addr().context("Listener has no local address")?,
            config = %self.config.path().display(),
            "Server listening"
        );

        let reaper = tokio::spawn(reap_loop(service.clone(), REAP_INTERVAL));
        let shutdown_rx = self.shutdown_tx.subscribe();

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let reason = signals::shutdown_reason(shutdown_rx).await;
                info!(%reason, "Shutdown signal received");
            })
            .await
            .context("HTTP server error");

        info!("Shutting down...");
        reaper.abort();
        service.shutdown().await;
        info!("Shutdown complete");

        served
    }
}

async fn reap_loop(service: Arc<MediaService>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // First tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let reaped = service.hub().reap();
        if reaped > 0 {
            debug!(reaped, remaining = service.hub().len(), "Reaper tick");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medialib_core::{Channel, ChannelClosed, LibraryConfig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    struct Flagged(AtomicBool);

    impl Channel for Flagged {
        fn send(&self, _payload: &str) -> Result<(), ChannelClosed> {
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_drops_closed_channels_each_tick() {
        let temp_dir = tempdir().unwrap();
        let store = ConfigStore::with_config(temp_dir.path().join("config.json"), LibraryConfig::default());
        let service = Arc::new(MediaService::new(Arc::new(store)));

        let closed = Arc::new(Flagged(AtomicBool::new(true)));
        let open = Arc::new(Flagged(AtomicBool::new(false)));
        service.hub().subscribe(closed);
        service.hub().subscribe(open);

        let reaper = tokio::spawn(reap_loop(service.clone(), REAP_INTERVAL));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(service.hub().len(), 2);

        tokio::time::sleep(REAP_INTERVAL).await;
        assert_eq!(service.hub().len(), 1);
        reaper.abort();
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown_request() {
        let temp_dir = tempdir().unwrap();
        let store = ConfigStore::with_config(temp_dir.path().join("config.json"), LibraryConfig::default());
        let daemon = Arc::new(Daemon::new(Arc::new(store), "127.0.0.1:0"));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let handle = daemon.shutdown_handle();
        let running = {
            let daemon = daemon.clone();
            tokio::spawn(async move { daemon.serve(listener).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
