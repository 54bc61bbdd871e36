//! medialib
//!
//! Local media-library server: indexes a directory of images and videos,
//! serves them over HTTP and pushes live count updates over WebSocket.

use anyhow::{Context, Result};
use clap::Parser;
use medialib_core::ConfigStore;
use medialib_indexer::validate_root;
use medialib_server::Daemon;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "medialib")]
#[command(about = "Serve a local media library over HTTP", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file path (default: ~/.medialib/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Media directory; replaces the configured one
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:8000
    #[arg(short, long)]
    listen: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(ConfigStore::default_path);
    let store = ConfigStore::load(config_path);

    let log_level = store.read(|c| c.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting medialib v{}", env!("CARGO_PKG_VERSION"));

    if let Some(dir) = cli.dir {
        let root = validate_root(&dir).with_context(|| format!("Invalid media directory {}", dir.display()))?;
        store
            .set_scan_directory(root)
            .context("Failed to save scan directory")?;
    }

    let listen = cli.listen.unwrap_or_else(|| store.read(|c| c.listen.clone()));
    let daemon = Daemon::new(Arc::new(store), listen);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(daemon.run())
}
