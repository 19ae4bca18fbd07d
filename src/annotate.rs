//! Frame annotation and JPEG encoding.
//!
//! Draws detection boxes, `"<class> <confidence>"` labels, distance tags, and
//! the proximity warning banner onto a copy of the captured frame, then
//! encodes the result to JPEG. The input frame is never mutated.
//!
//! Text rendering uses a built-in 5x7 glyph set instead of a font asset; the
//! overlay vocabulary is class labels, numbers and the banner, all of which
//! it covers. Unknown characters render as blanks.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detect::Detection;
use crate::frame::CameraFrame;

const BOX_COLOR: Rgb<u8> = Rgb([40, 200, 80]);
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_BG: Rgb<u8> = Rgb([15, 15, 15]);
const DISTANCE_COLOR: Rgb<u8> = Rgb([240, 220, 40]);
const BANNER_COLOR: Rgb<u8> = Rgb([230, 40, 40]);

/// Fixed banner position, matching the reference overlay placement.
const BANNER_X: u32 = 50;
const BANNER_Y: u32 = 80;
const BANNER_TEXT: &str = "PROXIMITY ALERT";

/// Draws overlays and produces the externally visible encoded frame bytes.
pub struct FrameAnnotator {
    jpeg_quality: u8,
}

impl FrameAnnotator {
    pub fn new(jpeg_quality: u8) -> Self {
        Self { jpeg_quality }
    }

    /// Annotate a frame. `distances` is index-aligned with `detections`;
    /// `None` means no distance was computed for that detection (class not
    /// relevant). `proximity_warning` burns in the banner and is decided by
    /// the caller from the raw proximity condition, NOT the cooldown gate.
    ///
    /// With zero detections the output is the input frame re-encoded.
    pub fn annotate(
        &self,
        frame: &CameraFrame,
        detections: &[Detection],
        distances: &[Option<f32>],
        proximity_warning: bool,
    ) -> Result<Vec<u8>> {
        let mut img = frame.to_rgb_image()?;

        for (index, det) in detections.iter().enumerate() {
            self.draw_detection(&mut img, det);
            if let Some(Some(distance_m)) = distances.get(index) {
                self.draw_distance_tag(&mut img, det, *distance_m);
            }
        }

        if proximity_warning {
            draw_text(&mut img, BANNER_TEXT, BANNER_X, BANNER_Y, 3, BANNER_COLOR);
        }

        self.encode(&img)
    }

    /// Encode a frame without overlays. Fallback output for frames whose
    /// detection pass failed.
    pub fn encode_plain(&self, frame: &CameraFrame) -> Result<Vec<u8>> {
        self.encode(&frame.to_rgb_image()?)
    }

    fn draw_detection(&self, img: &mut RgbImage, det: &Detection) {
        let x = det.bbox.x_min.max(0.0) as i32;
        let y = det.bbox.y_min.max(0.0) as i32;
        let w = det.bbox.width().max(1.0) as u32;
        let h = det.bbox.height().max(1.0) as u32;

        // Two nested hollow rects give a 2px box edge.
        draw_hollow_rect_mut(img, Rect::at(x, y).of_size(w, h), BOX_COLOR);
        if w > 2 && h > 2 {
            draw_hollow_rect_mut(img, Rect::at(x + 1, y + 1).of_size(w - 2, h - 2), BOX_COLOR);
        }

        // Label bar sits just inside the top edge of the box.
        let label = format!("{} {:.2}", det.label, det.confidence);
        let (text_w, text_h) = text_size(&label, 1);
        draw_filled_rect_mut(img, Rect::at(x, y).of_size(text_w + 4, text_h + 4), LABEL_BG);
        draw_text(img, &label, (x + 2) as u32, y as u32 + 2, 1, LABEL_TEXT);
    }

    fn draw_distance_tag(&self, img: &mut RgbImage, det: &Detection, distance_m: f32) {
        let tag = format!("{distance_m:.1}m");
        let (_, text_h) = text_size(&tag, 2);
        // Directly above the box, clipped at the frame top.
        let y = (det.bbox.y_min.max(0.0) as u32).saturating_sub(text_h + 4);
        let x = det.bbox.x_min.max(0.0) as u32;
        draw_text(img, &tag, x, y, 2, DISTANCE_COLOR);
    }

    fn encode(&self, img: &RgbImage) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality)
            .encode_image(img)
            .context("jpeg encoding failed")?;
        Ok(buf)
    }
}

// ----------------------------------------------------------------------------
// Built-in 5x7 glyphs
// ----------------------------------------------------------------------------

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_SPACING: u32 = 1;

/// Measure rendered text at an integer scale: (width, height) in pixels.
fn text_size(text: &str, scale: u32) -> (u32, u32) {
    let chars = text.chars().count() as u32;
    if chars == 0 {
        return (0, GLYPH_HEIGHT * scale);
    }
    (
        chars * (GLYPH_WIDTH + GLYPH_SPACING) * scale - GLYPH_SPACING * scale,
        GLYPH_HEIGHT * scale,
    )
}

/// Render text at (x, y) top-left with an integer scale. Clips at the image
/// edges. Lowercase letters reuse the uppercase glyphs.
fn draw_text(img: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32, color: Rgb<u8>) {
    let mut pen_x = x;
    for ch in text.chars() {
        let rows = glyph(ch.to_ascii_uppercase());
        for (row_idx, row) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if row & (0x10 >> col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = pen_x + col * scale + dx;
                        let py = y + row_idx as u32 * scale + dy;
                        if px < img.width() && py < img.height() {
                            img.put_pixel(px, py, color);
                        }
                    }
                }
            }
        }
        pen_x += (GLYPH_WIDTH + GLYPH_SPACING) * scale;
    }
}

/// 5x7 glyph rows, bit 4 = leftmost column. Unknown characters are blank.
fn glyph(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x1B, 0x11],
        'X' => [0x11, 0x0A, 0x04, 0x04, 0x04, 0x0A, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x06, 0x08, 0x10, 0x1F],
        '3' => [0x0E, 0x11, 0x01, 0x06, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        '%' => [0x19, 0x19, 0x02, 0x04, 0x08, 0x13, 0x13],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        _ => [0x00; 7],
    }
}
