//! Medialib Core Components
//!
//! This crate provides the core functionality for the medialib server:
//! configuration, the live-update hub and its wire protocol, path-safe file
//! resolution, and the media service that ties the indexer together.

mod access;
pub mod config;
mod error;
pub mod hub;
pub mod protocol;
mod service;

pub use access::resolve_media_path;
pub use config::{ConfigPatch, ConfigStore, KindConfig, LibraryConfig, LibraryStats, MediaConfig};
pub use error::{AccessError, CoreError};
pub use hub::{Channel, ChannelClosed, SubscriberHub, SubscriptionId};
pub use protocol::{ClientMessage, ServerMessage};
pub use service::MediaService;
