#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, imageops::FilterType, ImageBuffer, Rgb};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Tract-based backend for ONNX object detection.
///
/// Expects a detector exported with three outputs, in order:
/// `boxes [N, 4]` (x1, y1, x2, y2 in model input pixels), `labels [N]` and
/// `scores [N]`. Frames are resized to the model input and boxes are scaled
/// back to frame coordinates. Every box is returned; filtering happens upstream.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "tract backend: loaded {} ({}x{} input)",
            model_path.display(),
            width,
            height
        );
        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let view: ImageBuffer<Rgb<u8>, &[u8]> =
            ImageBuffer::from_raw(frame.width, frame.height, frame.pixels())
                .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let resized = imageops::resize(&view, self.width, self.height, FilterType::Triangle);

        let width = self.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, width),
            |(_, channel, y, x)| resized.as_raw()[(y * width + x) * 3 + channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        if outputs.len() < 3 {
            return Err(anyhow!(
                "model produced {} outputs, expected boxes/labels/scores",
                outputs.len()
            ));
        }

        let boxes = outputs[0]
            .as_slice::<f32>()
            .context("boxes tensor was not f32")?;
        let labels: Vec<i64> = match outputs[1].as_slice::<i64>() {
            Ok(labels) => labels.to_vec(),
            Err(_) => outputs[1]
                .as_slice::<f32>()
                .context("labels tensor was neither i64 nor f32")?
                .iter()
                .map(|&label| label as i64)
                .collect(),
        };
        let scores = outputs[2]
            .as_slice::<f32>()
            .context("scores tensor was not f32")?;

        let scale = (
            frame.width as f32 / self.width as f32,
            frame.height as f32 / self.height as f32,
        );
        decode_detections(boxes, &labels, scores, scale)
    }
}

/// Zip the three detector outputs into `Detection`s in frame coordinates.
fn decode_detections(
    boxes: &[f32],
    labels: &[i64],
    scores: &[f32],
    scale: (f32, f32),
) -> Result<Vec<Detection>> {
    let count = scores.len();
    if boxes.len() != count * 4 || labels.len() != count {
        return Err(anyhow!(
            "malformed detection tensors: {} box values, {} labels, {} scores",
            boxes.len(),
            labels.len(),
            count
        ));
    }

    Ok(boxes
        .chunks_exact(4)
        .zip(labels.iter().zip(scores))
        .map(|(bbox, (&label, &score))| {
            Detection::new(
                [
                    bbox[0] * scale.0,
                    bbox[1] * scale.1,
                    bbox[2] * scale.0,
                    bbox[3] * scale.1,
                ],
                label.max(0) as u32,
                score,
            )
        })
        .collect())
}
