#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{BoundingBox, Detection};

/// Tract-based backend for single-shot ONNX detectors.
///
/// Expects the common single-output layout `[1, N, 5 + num_classes]` with
/// rows of `(cx, cy, w, h, objectness, class scores...)` in input-image
/// coordinates. Frames are letterbox-free resized to the model input and the
/// decoded boxes are rescaled back to frame coordinates.
///
/// No network I/O; disk access is limited to the one-time model load.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    class_names: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

/// Class list for the bundled driver-assistance model.
pub fn default_class_names() -> Vec<String> {
    ["person", "bicycle", "car", "motorbike", "bus", "truck", "vehicle"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            class_names: default_class_names(),
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the class label list (index-aligned with model outputs).
    pub fn with_class_names(mut self, class_names: Vec<String>) -> Self {
        self.class_names = class_names;
        self
    }

    /// Override the default confidence threshold.
    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Override the default NMS IoU threshold.
    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let img = RgbImage::from_raw(width, height, pixels.to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", width, height))?;
        let resized = image::imageops::resize(
            &img,
            self.input_size,
            self.input_size,
            image::imageops::FilterType::Triangle,
        );

        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size, size),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0,
        );

        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, width: u32, height: u32) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        if view.ndim() != 3 || view.shape()[2] < 5 {
            return Err(anyhow!(
                "unexpected detector output shape {:?}, expected [1, N, 5+classes]",
                view.shape()
            ));
        }
        let num_classes = view.shape()[2] - 5;
        let view = view
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("unexpected detector output rank")?;

        let scale_x = width as f32 / self.input_size as f32;
        let scale_y = height as f32 / self.input_size as f32;

        let mut detections = Vec::new();
        for row in view.index_axis(tract_ndarray::Axis(0), 0).outer_iter() {
            let objectness = row[4];
            if objectness < self.confidence_threshold {
                continue;
            }

            let mut best_class = 0usize;
            let mut best_score = 0f32;
            for c in 0..num_classes {
                let score = row[5 + c];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }

            let confidence = objectness * best_score;
            if confidence < self.confidence_threshold {
                continue;
            }

            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let x_min = ((cx - w / 2.0) * scale_x).clamp(0.0, width as f32);
            let y_min = ((cy - h / 2.0) * scale_y).clamp(0.0, height as f32);
            let x_max = ((cx + w / 2.0) * scale_x).clamp(0.0, width as f32);
            let y_max = ((cy + h / 2.0) * scale_y).clamp(0.0, height as f32);
            let Ok(bbox) = BoundingBox::new(x_min, y_min, x_max, y_max) else {
                continue;
            };

            let label = self
                .class_names
                .get(best_class)
                .cloned()
                .unwrap_or_else(|| format!("class_{best_class}"));
            detections.push(Detection::new(label, confidence, bbox));
        }

        Ok(non_max_suppression(detections, self.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, width, height)
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = (self.input_size * self.input_size * 3) as usize;
        let blank = vec![0u8; size];
        self.detect(&blank, self.input_size, self.input_size)?;
        Ok(())
    }
}
