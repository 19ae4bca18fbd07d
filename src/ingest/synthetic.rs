//! Synthetic road-scene source.
//!
//! Renders a deterministic scene: sky, road surface, dashed center line, and
//! a single dark vehicle that approaches and recedes on a fixed cycle. Paired
//! with the stub detector backend this gives a fully offline pipeline whose
//! distance estimates sweep through the proximity threshold, so alerts fire
//! without any camera or model on the machine.

use anyhow::Result;

use crate::frame::CameraFrame;
use crate::ingest::FrameSource;
use crate::now_s;

const SKY_RGB: [u8; 3] = [150, 170, 190];
const ROAD_RGB: [u8; 3] = [95, 95, 100];
const LANE_RGB: [u8; 3] = [230, 230, 210];
const VEHICLE_RGB: [u8; 3] = [30, 30, 40];

/// Vehicle width sweep, in pixels. The cycle runs min -> max -> min.
const VEHICLE_MIN_WIDTH: u32 = 20;
const VEHICLE_MAX_WIDTH: u32 = 140;

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Frames per full approach/recede cycle.
    pub cycle_frames: u64,
    /// Stop after this many frames; `None` streams forever.
    pub max_frames: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            cycle_frames: 100,
            max_frames: None,
        }
    }
}

/// Synthetic frame source.
pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    /// Vehicle width for a given frame of the cycle: a triangle wave between
    /// the min and max widths.
    fn vehicle_width(&self, frame: u64) -> u32 {
        let cycle = self.config.cycle_frames.max(2);
        let half = cycle / 2;
        let pos = frame % cycle;
        let step = (VEHICLE_MAX_WIDTH - VEHICLE_MIN_WIDTH) as u64;
        if pos < half {
            VEHICLE_MIN_WIDTH + (pos * step / half) as u32
        } else {
            VEHICLE_MAX_WIDTH - ((pos - half) * step / half) as u32
        }
    }

    fn render(&self, frame: u64) -> Vec<u8> {
        let (w, h) = (self.config.width, self.config.height);
        let horizon = h * 2 / 5;
        let mut pixels = vec![0u8; (w * h * 3) as usize];

        for y in 0..h {
            let color = if y < horizon { SKY_RGB } else { ROAD_RGB };
            for x in 0..w {
                let i = ((y * w + x) * 3) as usize;
                pixels[i..i + 3].copy_from_slice(&color);
            }
        }

        // Dashed center line, scrolling with the frame count.
        let lane_x0 = w / 2 - 2;
        for y in horizon..h {
            if (y + frame as u32 * 4) % 40 < 20 {
                for x in lane_x0..(lane_x0 + 4).min(w) {
                    let i = ((y * w + x) * 3) as usize;
                    pixels[i..i + 3].copy_from_slice(&LANE_RGB);
                }
            }
        }

        // The vehicle, centered in the right lane, sized by the sweep.
        let vw = self.vehicle_width(frame).min(w / 2);
        let vh = vw * 3 / 4;
        let cx = w * 3 / 4;
        let bottom = h * 3 / 4;
        let x0 = cx.saturating_sub(vw / 2);
        let y0 = bottom.saturating_sub(vh);
        for y in y0..bottom.min(h) {
            for x in x0..(x0 + vw).min(w) {
                let i = ((y * w + x) * 3) as usize;
                pixels[i..i + 3].copy_from_slice(&VEHICLE_RGB);
            }
        }

        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<CameraFrame>> {
        if let Some(max) = self.config.max_frames {
            if self.frame_count >= max {
                return Ok(None);
            }
        }
        let frame = self.frame_count;
        self.frame_count += 1;

        let pixels = self.render(frame);
        let frame = CameraFrame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
            now_s()?,
        )?;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_exhausts_after_max_frames() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticConfig {
            width: 64,
            height: 48,
            cycle_frames: 10,
            max_frames: Some(3),
        });
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn synthetic_frames_are_numbered_in_capture_order() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticConfig {
            width: 64,
            height: 48,
            ..SyntheticConfig::default()
        });
        let first = source.next_frame()?.expect("frame");
        let second = source.next_frame()?.expect("frame");
        assert_eq!(first.frame_index, 1);
        assert_eq!(second.frame_index, 2);
        Ok(())
    }

    #[test]
    fn vehicle_width_sweeps_between_bounds() {
        let source = SyntheticSource::new(SyntheticConfig::default());
        let widths: Vec<u32> = (0..100).map(|f| source.vehicle_width(f)).collect();
        assert_eq!(widths[0], VEHICLE_MIN_WIDTH);
        assert!(widths.iter().any(|&w| w >= VEHICLE_MAX_WIDTH - 3));
        assert!(widths.iter().all(|&w| w <= VEHICLE_MAX_WIDTH));
    }
}
