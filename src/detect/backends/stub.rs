use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};

/// Pixels at or below this per-channel value count as vehicle body work.
/// Synthetic road scenes render the vehicle much darker than road or sky.
const DARK_THRESHOLD: u8 = 60;

/// Minimum dark-pixel count before the blob is reported as a vehicle.
/// Filters out shadows and single-pixel noise.
const MIN_BLOB_PIXELS: u32 = 64;

/// Stub backend for demos and tests. Finds the bounding box of the darkest
/// blob in the frame and reports it as a "car".
///
/// Paired with `ingest::SyntheticSource` this yields a deterministic
/// end-to-end pipeline: the source renders a dark vehicle, this backend finds
/// it, and the box width shrinks/grows exactly with the rendered vehicle.
#[derive(Default)]
pub struct StubBackend {
    /// Identical consecutive frames skip the scan and replay the last result.
    last_hash: Option<[u8; 32]>,
    last_detections: Vec<Detection>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn scan_dark_blob(&self, pixels: &[u8], width: u32, height: u32) -> Option<BoundingBox> {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        let mut count = 0u32;

        for y in 0..height {
            let row = (y * width * 3) as usize;
            for x in 0..width {
                let i = row + (x * 3) as usize;
                if pixels[i] <= DARK_THRESHOLD
                    && pixels[i + 1] <= DARK_THRESHOLD
                    && pixels[i + 2] <= DARK_THRESHOLD
                {
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                    count += 1;
                }
            }
        }

        if count < MIN_BLOB_PIXELS || min_x >= max_x || min_y >= max_y {
            return None;
        }
        BoundingBox::new(
            min_x as f32,
            min_y as f32,
            (max_x + 1) as f32,
            (max_y + 1) as f32,
        )
        .ok()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let expected = (width as usize * height as usize)
            .checked_mul(3)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            ));
        }

        let current_hash: [u8; 32] = Sha256::digest(pixels).into();
        if self.last_hash == Some(current_hash) {
            return Ok(self.last_detections.clone());
        }

        let detections = match self.scan_dark_blob(pixels, width, height) {
            Some(bbox) => vec![Detection::new("car", 0.87, bbox)],
            None => Vec::new(),
        };

        self.last_hash = Some(current_hash);
        self.last_detections = detections.clone();
        Ok(detections)
    }
}
