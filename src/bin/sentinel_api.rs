//! sentinel_api - API-only service for Road Sentinel
//!
//! This daemon:
//! 1. Opens the sentinel database
//! 2. Serves alerts, captures, users and chat endpoints
//! 3. Does NOT run a camera; /video_feed reports the camera as unavailable

use anyhow::Result;
use std::sync::mpsc;

use road_sentinel::api::ApiServer;
use road_sentinel::config::SentinelConfig;
use road_sentinel::{FrameHub, SqliteAlertStore};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = SentinelConfig::load()?;
    SqliteAlertStore::open(&cfg.db_path)?;

    // No pipeline publishes here; a closed hub makes /video_feed answer 503.
    let hub = FrameHub::new();
    hub.close();

    let api_handle = ApiServer::new(cfg.api_config(), hub).spawn()?;
    log::info!("api listening on {}", api_handle.addr);
    log::info!("sentinel_api running. serving {}", cfg.db_path);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("sentinel_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
