use anyhow::Result;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// A backend wraps one inference engine (or a stub) behind a single
/// capability: RGB pixels in, detections out. The pipeline never depends on
/// what runs behind this seam, so models can be swapped without touching it.
///
/// Implementations must treat the pixel slice as read-only and ephemeral:
/// no storing frames beyond the `detect` call, no disk writes, no network.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// `pixels` is packed RGB, `width * height * 3` bytes. Returned boxes are
    /// in source pixel coordinates, in the backend's native output order;
    /// the cooldown gate's same-frame tie-break depends on that order being
    /// stable.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
