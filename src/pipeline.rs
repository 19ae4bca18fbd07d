//! Pipeline driver.
//!
//! One driver owns one frame source and runs it to exhaustion or until a
//! stop flag is raised: capture, detect, score distances, gate the alert,
//! annotate, encode, emit. Frames are processed strictly sequentially and
//! emitted in capture order.
//!
//! Per-frame failures are contained here:
//! - detector failure emits the frame unannotated and moves on
//! - annotation/encoding failure re-emits the last good encoding
//! - alert persistence failure is the sink worker's problem; the gate's
//!   cooldown stamp stands either way
//!
//! Only source exhaustion (or a capture error, treated the same) and the
//! stop flag end the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::annotate::FrameAnnotator;
use crate::detect::{BackendRegistry, Detection};
use crate::distance::DistanceCalibration;
use crate::frame::CameraFrame;
use crate::hub::FrameHub;
use crate::ingest::FrameSource;
use crate::sink::SinkHandle;
use crate::{now_s, now_secs_f64, AlertEvent, AlertPolicy, CooldownGate};

/// Driver settings. Thresholds live in the policy/calibration; the rest is
/// output shaping.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub calibration: DistanceCalibration,
    pub policy: AlertPolicy,
    /// Pace the run loop to this rate; 0 runs flat out.
    pub target_fps: u32,
    pub jpeg_quality: u8,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            calibration: DistanceCalibration::default(),
            policy: AlertPolicy::default(),
            target_fps: 10,
            jpeg_quality: 80,
        }
    }
}

/// How a frame made it to the output stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDisposition {
    /// The full pipeline ran and this frame carries its own overlays.
    Annotated,
    /// The detector failed; the frame was emitted as a plain re-encode.
    DetectorFailed,
    /// Encoding failed; the previous good encoding was re-emitted.
    EncodeFallback,
}

/// One processed frame, ready for stream consumers.
#[derive(Clone, Debug)]
pub struct EmittedFrame {
    pub frame_index: u64,
    pub jpeg: Vec<u8>,
    pub detections: usize,
    pub alert_fired: bool,
    pub disposition: FrameDisposition,
}

pub struct PipelineDriver<S: FrameSource> {
    source: S,
    registry: BackendRegistry,
    annotator: FrameAnnotator,
    gate: CooldownGate,
    calibration: DistanceCalibration,
    sink: SinkHandle,
    target_fps: u32,
    last_encoded: Option<Vec<u8>>,
    frames_processed: u64,
    alerts_fired: u64,
}

impl<S: FrameSource> PipelineDriver<S> {
    pub fn new(
        source: S,
        registry: BackendRegistry,
        sink: SinkHandle,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            registry,
            annotator: FrameAnnotator::new(settings.jpeg_quality),
            gate: CooldownGate::new(settings.policy),
            calibration: settings.calibration,
            sink,
            target_fps: settings.target_fps,
            last_encoded: None,
            frames_processed: 0,
            alerts_fired: 0,
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn alerts_fired(&self) -> u64 {
        self.alerts_fired
    }

    pub fn source_healthy(&self) -> bool {
        self.source.is_healthy()
    }

    /// Process one frame. `Ok(None)` means the source is exhausted (or
    /// failed to capture, which is treated as end-of-stream) and the caller
    /// should stop cleanly. A frame with no encodable output at all is
    /// skipped and the next one is tried.
    pub fn process_next(&mut self) -> Result<Option<EmittedFrame>> {
        loop {
            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(None),
                Err(err) => {
                    log::warn!("frame capture failed, treating as end-of-stream: {err:#}");
                    return Ok(None);
                }
            };

            let detections = match self
                .registry
                .detect(frame.pixels(), frame.width, frame.height)
            {
                Ok(detections) => detections,
                Err(err) => {
                    log::warn!(
                        "detection failed on frame {}, emitting unannotated: {err:#}",
                        frame.frame_index
                    );
                    return Ok(Some(self.emit_degraded(&frame)));
                }
            };

            // Score distances for relevant classes; irrelevant detections
            // keep their box but get no distance tag.
            let policy = self.gate.policy().clone();
            let distances: Vec<Option<f32>> = detections
                .iter()
                .map(|det| {
                    policy
                        .is_relevant(&det.label)
                        .then(|| self.calibration.estimate(det.bbox.width()))
                })
                .collect();

            // The banner reflects the raw proximity condition; only
            // persistence is rate-limited by the gate.
            let proximity_warning = detections
                .iter()
                .zip(&distances)
                .any(|(det, dist)| dist.is_some_and(|d| policy.is_proximate(&det.label, d)));

            let fired = self.evaluate_gate(&detections, &distances)?;

            let (jpeg, disposition) =
                self.encode_with_fallback(&frame, &detections, &distances, proximity_warning);
            let Some(jpeg) = jpeg else {
                // No encoding and nothing older to fall back on.
                log::error!(
                    "no encodable output for frame {}, skipping emission",
                    frame.frame_index
                );
                self.frames_processed += 1;
                continue;
            };
            self.last_encoded = Some(jpeg.clone());
            self.frames_processed += 1;

            let alert_fired = fired.is_some();
            if let Some((label, confidence, distance_m)) = fired {
                self.alerts_fired += 1;
                log::info!("proximity alert: {} at {:.1}m", label, distance_m);
                self.sink.submit(AlertEvent {
                    fired_at_s: now_s()?,
                    label,
                    confidence,
                    distance_m,
                    image: jpeg.clone(),
                });
            }

            return Ok(Some(EmittedFrame {
                frame_index: frame.frame_index,
                jpeg,
                detections: detections.len(),
                alert_fired,
                disposition,
            }));
        }
    }

    /// Run to exhaustion or stop, publishing every emitted frame to the hub.
    /// A per-frame error is logged and the loop advances; the hub is closed
    /// on every exit path so stream consumers end cleanly.
    pub fn run(&mut self, stop: &AtomicBool, hub: &FrameHub) {
        let frame_interval = if self.target_fps > 0 {
            Duration::from_millis(1000 / self.target_fps as u64)
        } else {
            Duration::ZERO
        };
        let mut last_health_log = Instant::now();

        while !stop.load(Ordering::SeqCst) {
            let started = Instant::now();
            match self.process_next() {
                Ok(Some(emitted)) => hub.publish(emitted.jpeg),
                Ok(None) => {
                    log::info!(
                        "frame source exhausted after {} frames, stopping pipeline",
                        self.frames_processed
                    );
                    break;
                }
                Err(err) => {
                    log::error!("frame processing failed, continuing: {err:#}");
                }
            }

            if last_health_log.elapsed() >= Duration::from_secs(5) {
                log::info!(
                    "pipeline health={} frames={} alerts={}",
                    self.source_healthy(),
                    self.frames_processed,
                    self.alerts_fired
                );
                last_health_log = Instant::now();
            }

            let elapsed = started.elapsed();
            if elapsed < frame_interval {
                std::thread::sleep(frame_interval - elapsed);
            }
        }

        hub.close();
    }

    /// First qualifying detection in detector output order claims the
    /// cooldown window; same-frame siblings are suppressed by the stamp it
    /// just placed.
    fn evaluate_gate(
        &mut self,
        detections: &[Detection],
        distances: &[Option<f32>],
    ) -> Result<Option<(String, f32, f32)>> {
        let now = now_secs_f64()?;
        for (det, dist) in detections.iter().zip(distances) {
            let Some(distance_m) = dist else {
                continue;
            };
            if self.gate.should_fire(now, &det.label, *distance_m) {
                return Ok(Some((det.label.clone(), det.confidence, *distance_m)));
            }
        }
        Ok(None)
    }

    fn emit_degraded(&mut self, frame: &CameraFrame) -> EmittedFrame {
        let (jpeg, disposition) = match self.annotator.encode_plain(frame) {
            Ok(bytes) => (bytes, FrameDisposition::DetectorFailed),
            Err(err) => {
                log::warn!("plain encode failed: {err:#}");
                match &self.last_encoded {
                    Some(bytes) => (bytes.clone(), FrameDisposition::EncodeFallback),
                    None => (Vec::new(), FrameDisposition::EncodeFallback),
                }
            }
        };
        self.frames_processed += 1;
        if !jpeg.is_empty() {
            self.last_encoded = Some(jpeg.clone());
        }
        EmittedFrame {
            frame_index: frame.frame_index,
            jpeg,
            detections: 0,
            alert_fired: false,
            disposition,
        }
    }

    fn encode_with_fallback(
        &mut self,
        frame: &CameraFrame,
        detections: &[Detection],
        distances: &[Option<f32>],
        proximity_warning: bool,
    ) -> (Option<Vec<u8>>, FrameDisposition) {
        match self
            .annotator
            .annotate(frame, detections, distances, proximity_warning)
        {
            Ok(bytes) => (Some(bytes), FrameDisposition::Annotated),
            Err(err) => {
                log::warn!(
                    "annotation failed on frame {}: {err:#}",
                    frame.frame_index
                );
                match self.annotator.encode_plain(frame) {
                    Ok(bytes) => (Some(bytes), FrameDisposition::DetectorFailed),
                    Err(err) => {
                        log::warn!("plain encode failed: {err:#}");
                        (self.last_encoded.clone(), FrameDisposition::EncodeFallback)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;
    use crate::ingest::{SyntheticConfig, SyntheticSource};
    use crate::sink::{spawn_sink_worker, MemorySink};

    fn driver(
        max_frames: u64,
        sink: MemorySink,
    ) -> PipelineDriver<SyntheticSource> {
        let source = SyntheticSource::new(SyntheticConfig {
            width: 320,
            height: 240,
            cycle_frames: 20,
            max_frames: Some(max_frames),
        });
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        PipelineDriver::new(
            source,
            registry,
            spawn_sink_worker(Box::new(sink)),
            PipelineSettings {
                target_fps: 0,
                ..PipelineSettings::default()
            },
        )
    }

    #[test]
    fn driver_emits_every_frame_in_capture_order_then_exhausts() -> Result<()> {
        let sink = MemorySink::new();
        let mut driver = driver(4, sink);

        let mut indices = Vec::new();
        while let Some(emitted) = driver.process_next()? {
            assert!(!emitted.jpeg.is_empty());
            indices.push(emitted.frame_index);
        }
        assert_eq!(indices, vec![1, 2, 3, 4]);
        assert_eq!(driver.frames_processed(), 4);

        // Exhausted sources stay exhausted.
        assert!(driver.process_next()?.is_none());
        Ok(())
    }

    #[test]
    fn run_loop_stops_on_exhaustion_and_closes_hub() -> Result<()> {
        let sink = MemorySink::new();
        let mut driver = driver(3, sink);
        let hub = FrameHub::new();
        let rx = hub.subscribe();
        let stop = AtomicBool::new(false);

        driver.run(&stop, &hub);

        let mut frames = 0;
        while rx.recv().is_ok() {
            frames += 1;
        }
        assert!(frames >= 1, "at least the first frame must be delivered");
        assert_eq!(driver.frames_processed(), 3);
        Ok(())
    }

    #[test]
    fn run_loop_honors_stop_flag_immediately() {
        let sink = MemorySink::new();
        let mut driver = driver(u64::MAX, sink);
        let hub = FrameHub::new();
        let stop = AtomicBool::new(true);
        driver.run(&stop, &hub);
        assert_eq!(driver.frames_processed(), 0);
    }
}
