//! End-to-end pipeline behavior over scripted sources and detectors:
//! cooldown semantics, emission ordering, and failure containment.

use anyhow::{anyhow, Result};
use road_sentinel::detect::{BackendRegistry, BoundingBox, Detection, DetectorBackend};
use road_sentinel::ingest::FrameSource;
use road_sentinel::pipeline::{FrameDisposition, PipelineDriver, PipelineSettings};
use road_sentinel::sink::{spawn_sink_worker, AlertSink, MemorySink};
use road_sentinel::{now_s, AlertEvent, CameraFrame};

const WIDTH: u32 = 256;
const HEIGHT: u32 = 128;

/// Source producing `total` flat gray frames, then end-of-stream. With
/// `fail_at`, the capture at that index reports an error instead.
struct ScriptedSource {
    produced: u64,
    total: u64,
    fail_at: Option<u64>,
}

impl ScriptedSource {
    fn new(total: u64) -> Self {
        Self {
            produced: 0,
            total,
            fail_at: None,
        }
    }

    fn failing_at(total: u64, fail_at: u64) -> Self {
        Self {
            produced: 0,
            total,
            fail_at: Some(fail_at),
        }
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<CameraFrame>> {
        if self.produced >= self.total {
            return Ok(None);
        }
        self.produced += 1;
        if self.fail_at == Some(self.produced) {
            return Err(anyhow!("simulated capture failure"));
        }
        let pixels = vec![128u8; (WIDTH * HEIGHT * 3) as usize];
        Ok(Some(CameraFrame::new(
            pixels,
            WIDTH,
            HEIGHT,
            self.produced,
            now_s()?,
        )?))
    }
}

/// Backend replaying a fixed detection script: entry N is returned for the
/// Nth frame, later frames get no detections.
struct ScriptedBackend {
    script: Vec<Vec<Detection>>,
    calls: usize,
}

impl ScriptedBackend {
    fn new(script: Vec<Vec<Detection>>) -> Self {
        Self { script, calls: 0 }
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>> {
        let detections = self.script.get(self.calls).cloned().unwrap_or_default();
        self.calls += 1;
        Ok(detections)
    }
}

/// Backend whose inference always fails.
struct BrokenBackend;

impl DetectorBackend for BrokenBackend {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>> {
        Err(anyhow!("simulated inference failure"))
    }
}

/// Sink that always refuses to persist.
#[derive(Clone)]
struct FailingSink;

impl AlertSink for FailingSink {
    fn persist(&mut self, _event: &AlertEvent) -> Result<()> {
        Err(anyhow!("simulated storage outage"))
    }
}

/// A car detection whose box width yields the given distance under default
/// calibration (1.8m at 1000px focal length).
fn car_at(distance_m: f32) -> Detection {
    let width_px = 1.8 * 1000.0 / distance_m;
    Detection::new(
        "car",
        0.87,
        BoundingBox::new(10.0, 20.0, 10.0 + width_px, 100.0).unwrap(),
    )
}

fn truck_at(distance_m: f32) -> Detection {
    let width_px = 1.8 * 1000.0 / distance_m;
    Detection::new(
        "truck",
        0.91,
        BoundingBox::new(30.0, 10.0, 30.0 + width_px, 90.0).unwrap(),
    )
}

fn driver_with(
    source: ScriptedSource,
    backend: impl DetectorBackend + 'static,
    sink: Box<dyn AlertSink>,
) -> PipelineDriver<ScriptedSource> {
    let mut registry = BackendRegistry::new();
    registry.register(backend);
    PipelineDriver::new(
        source,
        registry,
        spawn_sink_worker(sink),
        PipelineSettings {
            target_fps: 0,
            ..PipelineSettings::default()
        },
    )
}

fn drain(driver: &mut PipelineDriver<ScriptedSource>) -> Result<Vec<u64>> {
    let mut indices = Vec::new();
    while let Some(emitted) = driver.process_next()? {
        indices.push(emitted.frame_index);
    }
    Ok(indices)
}

#[test]
fn qualifying_detections_fire_exactly_once_per_cooldown_window() -> Result<()> {
    // A close car in every one of 20 frames, processed far faster than the
    // 3 second cooldown: only the first may fire.
    let script = (0..20).map(|_| vec![car_at(42.3)]).collect();
    let sink = MemorySink::new();
    let mut driver = driver_with(
        ScriptedSource::new(20),
        ScriptedBackend::new(script),
        Box::new(sink.clone()),
    );

    drain(&mut driver)?;
    assert_eq!(driver.alerts_fired(), 1);

    // Dropping the driver joins the sink worker, so everything submitted is
    // persisted (or dropped) by now.
    drop(driver);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].label, "car");
    assert!((events[0].distance_m - 42.3).abs() < 0.2);
    Ok(())
}

#[test]
fn same_frame_siblings_are_suppressed_first_in_order_wins() -> Result<()> {
    // Two qualifying vehicles in one frame; the truck is closer but the car
    // comes first in detector output order.
    let script = vec![vec![car_at(40.0), truck_at(10.0)]];
    let sink = MemorySink::new();
    let mut driver = driver_with(
        ScriptedSource::new(1),
        ScriptedBackend::new(script),
        Box::new(sink.clone()),
    );

    let emitted = driver.process_next()?.expect("frame");
    assert_eq!(emitted.detections, 2);
    assert!(emitted.alert_fired);
    assert_eq!(driver.alerts_fired(), 1);

    drop(driver);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].label, "car");
    Ok(())
}

#[test]
fn far_or_irrelevant_detections_never_fire() -> Result<()> {
    let script = vec![
        vec![car_at(75.0)], // beyond the 50m threshold
        vec![Detection::new(
            "person",
            0.95,
            BoundingBox::new(10.0, 10.0, 200.0, 120.0).unwrap(),
        )],
    ];
    let sink = MemorySink::new();
    let mut driver = driver_with(
        ScriptedSource::new(2),
        ScriptedBackend::new(script),
        Box::new(sink.clone()),
    );

    drain(&mut driver)?;
    assert_eq!(driver.alerts_fired(), 0);
    drop(driver);
    assert!(sink.events().is_empty());
    Ok(())
}

#[test]
fn frames_are_emitted_in_capture_order_until_exhaustion() -> Result<()> {
    let sink = MemorySink::new();
    let mut driver = driver_with(
        ScriptedSource::new(6),
        ScriptedBackend::new(Vec::new()),
        Box::new(sink),
    );

    let indices = drain(&mut driver)?;
    assert_eq!(indices, vec![1, 2, 3, 4, 5, 6]);
    // The source stays exhausted.
    assert!(driver.process_next()?.is_none());
    Ok(())
}

#[test]
fn capture_failure_mid_stream_ends_the_loop_after_prior_frames() -> Result<()> {
    let sink = MemorySink::new();
    let mut driver = driver_with(
        ScriptedSource::failing_at(10, 3),
        ScriptedBackend::new(Vec::new()),
        Box::new(sink),
    );

    let indices = drain(&mut driver)?;
    // Frames 1 and 2 were emitted in order; the failing capture ended the
    // stream without an error reaching the caller.
    assert_eq!(indices, vec![1, 2]);
    Ok(())
}

#[test]
fn detector_failure_degrades_to_unannotated_frames() -> Result<()> {
    let sink = MemorySink::new();
    let mut driver = driver_with(ScriptedSource::new(3), BrokenBackend, Box::new(sink.clone()));

    let mut dispositions = Vec::new();
    while let Some(emitted) = driver.process_next()? {
        assert!(!emitted.jpeg.is_empty());
        dispositions.push(emitted.disposition);
    }
    assert_eq!(dispositions.len(), 3);
    assert!(dispositions
        .iter()
        .all(|d| *d == FrameDisposition::DetectorFailed));
    assert_eq!(driver.alerts_fired(), 0);
    drop(driver);
    assert!(sink.events().is_empty());
    Ok(())
}

#[test]
fn persistence_failure_drops_the_alert_but_keeps_the_cooldown() -> Result<()> {
    // Both frames carry a qualifying car. The sink refuses everything; the
    // first firing must still hold the cooldown window shut for the second.
    let script = vec![vec![car_at(20.0)], vec![car_at(20.0)]];
    let mut driver = driver_with(
        ScriptedSource::new(2),
        ScriptedBackend::new(script),
        Box::new(FailingSink),
    );

    let first = driver.process_next()?.expect("frame");
    assert!(first.alert_fired);
    let second = driver.process_next()?.expect("frame");
    assert!(!second.alert_fired, "cooldown must not be rolled back");
    assert_eq!(driver.alerts_fired(), 1);
    Ok(())
}

#[test]
fn zero_cooldown_fires_on_every_qualifying_frame() -> Result<()> {
    let script = (0..3).map(|_| vec![car_at(25.0)]).collect();
    let mut registry = BackendRegistry::new();
    registry.register(ScriptedBackend::new(script));
    let sink = MemorySink::new();
    let mut settings = PipelineSettings {
        target_fps: 0,
        ..PipelineSettings::default()
    };
    settings.policy.cooldown_s = 0.0;
    let mut driver = PipelineDriver::new(
        ScriptedSource::new(3),
        registry,
        spawn_sink_worker(Box::new(sink)),
        settings,
    );

    drain(&mut driver)?;
    assert_eq!(driver.alerts_fired(), 3);
    Ok(())
}
