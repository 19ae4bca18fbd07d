//! sentineld - Road Sentinel daemon
//!
//! This daemon:
//! 1. Ingests frames from the configured camera source
//! 2. Runs the detector backend on each frame
//! 3. Scores vehicle distances and gates proximity alerts
//! 4. Persists fired alerts (JPEG capture + database row) off-thread
//! 5. Serves the MJPEG stream and the HTTP API

use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use road_sentinel::api::ApiServer;
use road_sentinel::config::SentinelConfig;
use road_sentinel::ingest::{ImageDirSource, SyntheticConfig, SyntheticSource};
use road_sentinel::{
    spawn_sink_worker, BackendRegistry, FrameHub, FrameSource, PipelineDriver, SqliteAlertSink,
    SqliteAlertStore, StubBackend,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = SentinelConfig::load()?;

    // Create the schema up front so the API never races the first alert.
    SqliteAlertStore::open(&cfg.db_path)?;

    let hub = FrameHub::new();
    let api_handle = ApiServer::new(cfg.api_config(), hub.clone()).spawn()?;
    log::info!("api listening on {}", api_handle.addr);
    log::info!("mjpeg stream at http://{}/video_feed", api_handle.addr);

    let sink = SqliteAlertSink::open(&cfg.db_path, &cfg.captures_dir)?;
    let sink_handle = spawn_sink_worker(Box::new(sink));

    let registry = build_registry(&cfg)?;
    if let Err(err) = registry.warm_up() {
        log::warn!("detector warm-up failed: {err:#}");
    }

    let source = open_source(&cfg)?;
    let mut driver = PipelineDriver::new(source, registry, sink_handle, cfg.pipeline_settings());

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })?;

    log::info!(
        "sentineld running. camera={} db={} captures={}",
        cfg.camera.device,
        cfg.db_path,
        cfg.captures_dir.display()
    );

    driver.run(&stop, &hub);

    log::info!(
        "pipeline stopped after {} frames, {} alerts",
        driver.frames_processed(),
        driver.alerts_fired()
    );
    drop(driver); // releases the capture device before the API goes down
    api_handle.stop()?;
    Ok(())
}

fn build_registry(cfg: &SentinelConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());

    #[cfg(feature = "backend-tract")]
    if let Some(model_path) = &cfg.detection.model_path {
        let backend = road_sentinel::detect::TractBackend::new(
            model_path,
            cfg.detection.input_size,
        )?
        .with_confidence_threshold(cfg.detection.confidence_threshold)
        .with_iou_threshold(cfg.detection.iou_threshold);
        registry.register(backend);
        registry.set_default("tract")?;
        log::info!("detector backend: tract ({model_path})");
    }

    #[cfg(not(feature = "backend-tract"))]
    if cfg.detection.model_path.is_some() {
        log::warn!("model_path configured but the backend-tract feature is not built; using stub");
    }

    Ok(registry)
}

/// Pick the frame source from the configured device string:
/// `stub://...` renders the synthetic scene, an existing directory replays
/// its JPEGs, and anything else is treated as a V4L2 device node.
fn open_source(cfg: &SentinelConfig) -> Result<Box<dyn FrameSource>> {
    let device = cfg.camera.device.as_str();
    if device.starts_with("stub://") {
        let source = SyntheticSource::new(SyntheticConfig {
            width: cfg.camera.width,
            height: cfg.camera.height,
            ..SyntheticConfig::default()
        });
        log::info!("frame source: synthetic scene ({device})");
        return Ok(Box::new(source));
    }

    if Path::new(device).is_dir() {
        let source = ImageDirSource::open(Path::new(device))?;
        log::info!("frame source: image directory {device}");
        return Ok(Box::new(source));
    }

    #[cfg(feature = "ingest-v4l2")]
    {
        let source = road_sentinel::V4l2Source::new(road_sentinel::ingest::V4l2Config {
            device: device.to_string(),
            target_fps: cfg.camera.target_fps,
            width: cfg.camera.width,
            height: cfg.camera.height,
        })?;
        log::info!("frame source: v4l2 device {device}");
        Ok(Box::new(source))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow!(
            "camera device '{device}' requires the ingest-v4l2 feature (or use stub:// / a frame directory)"
        ))
    }
}
