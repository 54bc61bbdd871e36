//! Medialib Server
//!
//! HTTP API, live-update WebSocket and file streaming on top of the
//! medialib core service.

pub mod daemon;
pub mod routes;
pub mod signals;
pub mod socket;

pub use daemon::Daemon;
pub use routes::router;
