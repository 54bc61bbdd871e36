//! What ends a running server.

use std::fmt;
use tokio::sync::broadcast;

/// Why the server is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM, e.g. from a service manager
    Terminate,
    /// A [`crate::Daemon::shutdown_handle`] sender fired or was dropped
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownReason::Interrupt => "interrupt",
            ShutdownReason::Terminate => "terminate",
            ShutdownReason::Requested => "requested",
        })
    }
}

/// Resolve on the first of Ctrl+C, SIGTERM or a message on `requests`.
pub async fn shutdown_reason(mut requests: broadcast::Receiver<()>) -> ShutdownReason {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => ShutdownReason::Interrupt,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for Ctrl+C");
                // Still honour the other two
                tokio::select! {
                    _ = requests.recv() => ShutdownReason::Requested,
                    _ = terminated() => ShutdownReason::Terminate,
                }
            }
        },
        _ = requests.recv() => ShutdownReason::Requested,
        _ = terminated() => ShutdownReason::Terminate,
    }
}

#[cfg(unix)]
async fn terminated() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminated() {
    std::future::pending::<()>().await;
}
