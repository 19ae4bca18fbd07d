use anyhow::{anyhow, Result};

/// Axis-aligned bounding box in source-image pixel coordinates.
///
/// Invariant: `x_min < x_max` and `y_min < y_max`. Constructed through
/// [`BoundingBox::new`], which rejects degenerate boxes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Result<Self> {
        if !(x_min < x_max && y_min < y_max) {
            return Err(anyhow!(
                "degenerate bounding box ({x_min},{y_min})-({x_max},{y_max})"
            ));
        }
        Ok(Self {
            x_min,
            y_min,
            x_max,
            y_max,
        })
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection-over-union with another box. 0.0 when disjoint.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0);
        let iy = (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

/// One object instance reported by a detector backend for a single frame.
///
/// Detections are per-frame values: produced once per backend invocation and
/// discarded after the frame is processed.
#[derive(Clone, Debug)]
pub struct Detection {
    /// Model class label ("car", "truck", ...). Matched against the alert
    /// policy's relevant-class set.
    pub label: String,
    /// Confidence, 0..=1.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}
