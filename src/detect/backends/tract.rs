#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{CocoIndexing, Detection, ObjectClass};
use crate::geometry::BoundingBox;

/// Settings for a YOLOv8-style ONNX export.
#[derive(Clone, Debug)]
pub struct TractConfig {
    pub model_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub min_confidence: f32,
    /// Boxes of the same class overlapping more than this are suppressed.
    pub nms_iou: f32,
}

/// Tract-based backend for ONNX inference.
///
/// Loads a local COCO model and decodes its `[1, 4 + classes, anchors]`
/// output into pixel-space detections.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    config: TractConfig,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new(config: TractConfig) -> Result<Self> {
        let model_path: &Path = &config.model_path;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(
                        1,
                        3,
                        config.input_height as usize,
                        config.input_width as usize
                    ),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, config })
    }

    /// Nearest-neighbour resample into a normalized NCHW tensor.
    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected_len || expected_len == 0 {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let (in_w, in_h) = (
            self.config.input_width as usize,
            self.config.input_height as usize,
        );
        let (src_w, src_h) = (width as usize, height as usize);
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, in_h, in_w), |(_, c, y, x)| {
            let sx = (x * src_w / in_w).min(src_w - 1);
            let sy = (y * src_h / in_h).min(src_h - 1);
            pixels[(sy * src_w + sx) * 3 + c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, width: u32, height: u32) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected a [1, 4 + classes, anchors] output")?;
        decode_anchors(view, &self.config, width, height)
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
}

/// Turn raw anchors into frame-space detections. Anchors below the
/// confidence floor or with unusable geometry are dropped one by one.
fn decode_anchors(
    view: tract_ndarray::ArrayView3<'_, f32>,
    config: &TractConfig,
    width: u32,
    height: u32,
) -> Result<Vec<Detection>> {
    let (_, channels, anchors) = view.dim();
    if channels <= 4 {
        return Err(anyhow!("model output has no class scores"));
    }

    let scale_x = width as f32 / config.input_width as f32;
    let scale_y = height as f32 / config.input_height as f32;
    let mut candidates = Vec::new();
    for i in 0..anchors {
        let (class_id, score) = (4..channels)
            .map(|c| (c - 4, view[[0, c, i]]))
            .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || score < config.min_confidence {
            continue;
        }
        let bbox = match BoundingBox::from_center(
            view[[0, 0, i]] * scale_x,
            view[[0, 1, i]] * scale_y,
            view[[0, 2, i]].max(0.0) * scale_x,
            view[[0, 3, i]].max(0.0) * scale_y,
        ) {
            Ok(bbox) => bbox.clamp_to(width as f32, height as f32),
            Err(err) => {
                log::debug!("dropping anchor {}: {:#}", i, err);
                continue;
            }
        };
        let class = ObjectClass::from_coco_id(class_id as u16, CocoIndexing::ZeroBased);
        candidates.push(Detection::new(bbox, class, score));
    }

    Ok(non_max_suppression(candidates, config.nms_iou))
}

/// Greedy per-class suppression, highest confidence first.
fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class == candidate.class && k.bbox.iou(&candidate.bbox) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
