//! Road Sentinel
//!
//! This crate implements a driver-assistance proximity pipeline: frames from a
//! camera source run through an object detector, vehicle-class detections get a
//! pinhole-model distance estimate, and close passes are persisted as JPEG
//! captures plus rows in a local SQLite database. An HTTP layer serves the
//! annotated feed as an MJPEG stream along with alert/capture/user endpoints.
//!
//! # Architecture
//!
//! One pipeline driver owns one frame source and processes frames strictly in
//! capture order. The only cross-thread hand-offs are:
//!
//! 1. **Alert persistence**: fired alerts go over a bounded channel to a sink
//!    worker. A slow or failing store drops alerts (logged), never the stream.
//! 2. **Stream fan-out**: encoded frames are published to a [`hub::FrameHub`];
//!    each MJPEG subscriber has its own bounded queue.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (synthetic, image directory, V4L2)
//! - `detect`: detector backends behind a registry
//! - `distance`: pinhole distance estimation
//! - `annotate`: box/label/banner overlays + JPEG encoding
//! - `pipeline`: the per-source driver loop
//! - `sink` / `storage`: alert persistence and the SQLite store
//! - `api`: HTTP endpoints incl. the MJPEG stream
//! - `chat`: offline assistant responses

use anyhow::Result;
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod annotate;
pub mod api;
pub mod chat;
pub mod config;
pub mod detect;
pub mod distance;
pub mod frame;
pub mod hub;
pub mod ingest;
pub mod pipeline;
pub mod sink;
pub mod storage;

pub use annotate::FrameAnnotator;
pub use detect::{BackendRegistry, BoundingBox, Detection, DetectorBackend, StubBackend};
pub use distance::{estimate_distance, DistanceCalibration, FAR_DISTANCE_M};
pub use frame::CameraFrame;
pub use hub::FrameHub;
pub use ingest::{FrameSource, ImageDirSource, SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::{V4l2Config, V4l2Source};
pub use pipeline::{PipelineDriver, PipelineSettings};
pub use sink::{spawn_sink_worker, AlertSink, MemorySink, SinkHandle, SqliteAlertSink};
pub use storage::SqliteAlertStore;

/// Seconds since the unix epoch.
pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Seconds since the unix epoch, fractional. Used for cooldown arithmetic.
pub fn now_secs_f64() -> Result<f64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)?
        .as_secs_f64())
}

// -------------------- Alerts --------------------

/// A fired proximity alert, owned by the driver until handed to the sink.
/// Never mutated after creation.
#[derive(Clone, Debug)]
pub struct AlertEvent {
    /// Firing time, seconds since the unix epoch.
    pub fired_at_s: u64,
    /// Detector class label ("car", "truck", ...).
    pub label: String,
    /// Detector confidence, 0..=1.
    pub confidence: f32,
    /// Estimated distance in meters.
    pub distance_m: f32,
    /// Annotated frame, JPEG-encoded.
    pub image: Vec<u8>,
}

/// Alerting policy: which classes count, how close is too close, and how often
/// an alert may fire.
#[derive(Clone, Debug)]
pub struct AlertPolicy {
    pub proximity_threshold_m: f32,
    pub cooldown_s: f64,
    pub relevant_classes: BTreeSet<String>,
}

impl AlertPolicy {
    pub fn is_relevant(&self, label: &str) -> bool {
        self.relevant_classes.contains(label)
    }

    /// The proximity condition alone, without cooldown. Drives the on-frame
    /// warning banner, which is not rate-limited.
    pub fn is_proximate(&self, label: &str, distance_m: f32) -> bool {
        self.is_relevant(label) && distance_m < self.proximity_threshold_m
    }
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            proximity_threshold_m: 50.0,
            cooldown_s: 3.0,
            relevant_classes: ["car", "truck", "bus", "vehicle"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Cooldown gate. One instance per pipeline driver; admits at most one firing
/// per cooldown window process-wide, not per object or class.
///
/// `last_alert_at` starts at "never" and is advanced only by an approved
/// firing. The update happens before `should_fire` returns true, so a second
/// qualifying detection evaluated in the same frame is suppressed by the gate
/// it just lost to.
#[derive(Clone, Debug)]
pub struct CooldownGate {
    policy: AlertPolicy,
    last_alert_at_s: Option<f64>,
}

impl CooldownGate {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            policy,
            last_alert_at_s: None,
        }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Decide whether an alert fires for this detection at `now_s`.
    ///
    /// Returns true (and stamps `last_alert_at`) only when the class is
    /// relevant, the distance is under the proximity threshold, and the
    /// cooldown window has elapsed.
    pub fn should_fire(&mut self, now_s: f64, label: &str, distance_m: f32) -> bool {
        if !self.policy.is_proximate(label, distance_m) {
            return false;
        }
        if let Some(last) = self.last_alert_at_s {
            if now_s - last <= self.policy.cooldown_s {
                return false;
            }
        }
        self.last_alert_at_s = Some(now_s);
        true
    }

    pub fn last_alert_at_s(&self) -> Option<f64> {
        self.last_alert_at_s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> CooldownGate {
        CooldownGate::new(AlertPolicy::default())
    }

    #[test]
    fn gate_fires_for_close_vehicle_and_stamps_time() {
        let mut gate = gate();
        assert!(gate.should_fire(100.0, "car", 42.3));
        assert_eq!(gate.last_alert_at_s(), Some(100.0));
    }

    #[test]
    fn gate_ignores_irrelevant_classes_and_far_objects() {
        let mut gate = gate();
        assert!(!gate.should_fire(100.0, "person", 5.0));
        assert!(!gate.should_fire(100.0, "car", 50.0));
        assert!(!gate.should_fire(100.0, "car", FAR_DISTANCE_M));
        assert_eq!(gate.last_alert_at_s(), None);
    }

    #[test]
    fn gate_admits_one_firing_per_frame() {
        let mut gate = gate();
        // Two qualifying vehicles in the same frame: first in detector order wins.
        assert!(gate.should_fire(100.0, "car", 20.0));
        assert!(!gate.should_fire(100.0, "truck", 10.0));
    }

    #[test]
    fn gate_enforces_cooldown_across_frames() {
        let mut gate = gate();
        assert!(gate.should_fire(100.0, "car", 20.0));
        // 1 second later, still inside the 3 second window.
        assert!(!gate.should_fire(101.0, "car", 20.0));
        // Strictly greater than the window is required.
        assert!(!gate.should_fire(103.0, "car", 20.0));
        assert!(gate.should_fire(103.5, "car", 20.0));
    }
}
