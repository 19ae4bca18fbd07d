//! Frame ingestion sources.
//!
//! This module provides the sources a pipeline driver can capture from:
//! - Synthetic road scenes (demos, tests, `stub://` device strings)
//! - Directories of JPEG stills replayed as a frame sequence
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! All sources produce [`CameraFrame`] values in capture order. A source
//! signals end-of-stream by returning `Ok(None)`; a mid-run capture error is
//! reported as `Err` and the driver treats it as end-of-stream. Each source
//! is exclusively owned by one driver instance.

mod file;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

pub use file::ImageDirSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

use crate::frame::CameraFrame;

/// A source of camera frames.
///
/// `next_frame` may block while waiting for the device; `Ok(None)` means the
/// stream is exhausted and the driver should stop cleanly.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<CameraFrame>>;

    /// True while the source is believed to be delivering frames.
    fn is_healthy(&self) -> bool {
        true
    }
}

impl FrameSource for Box<dyn FrameSource> {
    fn next_frame(&mut self) -> Result<Option<CameraFrame>> {
        (**self).next_frame()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}
