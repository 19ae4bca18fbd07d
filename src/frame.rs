//! Camera frame container.
//!
//! A `CameraFrame` is a plain RGB24 buffer plus the metadata the pipeline
//! needs: dimensions, a monotonically increasing capture index, and the
//! capture timestamp. Frames are produced by `ingest` sources and consumed
//! exactly once by the pipeline driver; they are never retained across
//! iterations.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// One captured frame. Pixel data is packed RGB, row-major,
/// `width * height * 3` bytes.
#[derive(Clone, Debug)]
pub struct CameraFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture sequence number, starting at 1 for the first frame a source
    /// produces. Emission order must match this order.
    pub frame_index: u64,
    /// Capture time, seconds since the unix epoch.
    pub captured_at_s: u64,
}

impl CameraFrame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        frame_index: u64,
        captured_at_s: u64,
    ) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            frame_index,
            captured_at_s,
        })
    }

    /// Raw RGB bytes for detector input.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Copy the frame into an owned `RgbImage` for annotation. The source
    /// frame is left untouched.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_short_buffer() {
        let result = CameraFrame::new(vec![0u8; 10], 640, 480, 1, 0);
        assert!(result.is_err());
    }

    #[test]
    fn frame_round_trips_through_rgb_image() -> Result<()> {
        let frame = CameraFrame::new(vec![7u8; 4 * 2 * 3], 4, 2, 1, 0)?;
        let img = frame.to_rgb_image()?;
        assert_eq!(img.dimensions(), (4, 2));
        assert_eq!(img.get_pixel(0, 0).0, [7, 7, 7]);
        Ok(())
    }
}
