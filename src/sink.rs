//! Alert persistence.
//!
//! The sink is the durable boundary for fired alerts: a JPEG capture on disk
//! plus a row (with image blob) in the alerts table. Persistence runs on its
//! own worker thread behind a bounded channel so a slow or failing store can
//! never stall frame emission; on overflow or error the alert is dropped with
//! a log line and the cooldown stays committed.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use regex::Regex;

use crate::storage::SqliteAlertStore;
use crate::AlertEvent;

/// Queue depth between the pipeline and the sink worker. Alerts are rare
/// (cooldown-limited), so a small buffer only ever fills when the store is
/// badly wedged.
pub const SINK_QUEUE_DEPTH: usize = 8;

/// Capture filename convention: `alert_<unix_ts>_<distance 1dp>m.jpg`.
pub fn capture_filename(fired_at_s: u64, distance_m: f32) -> String {
    format!("alert_{}_{:.1}m.jpg", fired_at_s, distance_m)
}

/// Parse a capture filename into (unix timestamp, distance tag e.g. "42.3m").
/// Returns `None` for files outside the convention.
pub fn parse_capture_filename(filename: &str) -> Option<(u64, String)> {
    static CAPTURE_RE: OnceLock<Regex> = OnceLock::new();
    let re = CAPTURE_RE
        .get_or_init(|| Regex::new(r"^alert_(\d+)_(\d+(?:\.\d+)?m)\.jpg$").unwrap());
    let caps = re.captures(filename)?;
    let ts = caps.get(1)?.as_str().parse().ok()?;
    Some((ts, caps.get(2)?.as_str().to_string()))
}

/// Where fired alerts go. Failure is non-fatal to the pipeline.
pub trait AlertSink: Send {
    fn persist(&mut self, event: &AlertEvent) -> Result<()>;
}

/// Production sink: JPEG file in the captures directory + alerts row.
///
/// The file write happens first so the row's `image_path` always points at an
/// existing capture; if the row insert then fails the file stays behind as
/// the on-disk record of the event.
pub struct SqliteAlertSink {
    store: SqliteAlertStore,
    captures_dir: PathBuf,
}

impl SqliteAlertSink {
    pub fn open(db_path: &str, captures_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(captures_dir).with_context(|| {
            format!("failed to create captures dir {}", captures_dir.display())
        })?;
        Ok(Self {
            store: SqliteAlertStore::open(db_path)?,
            captures_dir: captures_dir.to_path_buf(),
        })
    }
}

impl AlertSink for SqliteAlertSink {
    fn persist(&mut self, event: &AlertEvent) -> Result<()> {
        let filename = capture_filename(event.fired_at_s, event.distance_m);
        let path = self.captures_dir.join(&filename);
        std::fs::write(&path, &event.image)
            .with_context(|| format!("failed to write capture {}", path.display()))?;

        self.store.insert_alert(
            event.fired_at_s as i64,
            &event.label,
            event.confidence as f64,
            event.distance_m as f64,
            &path.to_string_lossy(),
            &event.image,
        )?;

        log::info!(
            "alert persisted: {} at {:.1}m -> {}",
            event.label,
            event.distance_m,
            path.display()
        );
        Ok(())
    }
}

/// In-memory sink for tests.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<AlertEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().expect("memory sink lock").clone()
    }
}

impl AlertSink for MemorySink {
    fn persist(&mut self, event: &AlertEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Handle to a running sink worker. Submitting never blocks; dropping the
/// handle (or calling `stop`) closes the queue and joins the worker after it
/// drains.
pub struct SinkHandle {
    tx: Option<SyncSender<AlertEvent>>,
    join: Option<JoinHandle<()>>,
}

impl SinkHandle {
    /// Hand an alert to the worker, fire-and-continue. On a full queue or a
    /// dead worker the alert is dropped and logged; the caller's cooldown
    /// state is never rolled back.
    pub fn submit(&self, event: AlertEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::error!(
                    "alert queue full, dropping alert for {} at {:.1}m",
                    event.label,
                    event.distance_m
                );
            }
            Err(TrySendError::Disconnected(event)) => {
                log::error!(
                    "alert sink worker is gone, dropping alert for {} at {:.1}m",
                    event.label,
                    event.distance_m
                );
            }
        }
    }

    /// Close the queue and wait for the worker to drain.
    pub fn stop(mut self) -> Result<()> {
        self.tx.take();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("alert sink worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for SinkHandle {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawn the persistence worker. Events are processed in submission order;
/// a failed persist logs and continues with the next event.
pub fn spawn_sink_worker(mut sink: Box<dyn AlertSink>) -> SinkHandle {
    let (tx, rx) = sync_channel::<AlertEvent>(SINK_QUEUE_DEPTH);
    let join = std::thread::spawn(move || {
        for event in rx {
            if let Err(err) = sink.persist(&event) {
                log::error!("alert persistence failed (alert dropped): {err:#}");
            }
        }
    });
    SinkHandle {
        tx: Some(tx),
        join: Some(join),
    }
}
