#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{Device, DetectorBackend, ModelTask};
use crate::detect::result::{non_max_suppression, BBox, ClassId, Detection, Keypoint};
use crate::frame::Frame;
use crate::resize::resize_exact;

const POSE_KEYPOINTS: usize = 17;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend for YOLOv8-style ONNX models.
///
/// Expects a single `[1, 3, S, S]` float input and a `[1, C, N]` output where
/// each of the `N` columns is one candidate: `cx, cy, w, h` in input pixels,
/// followed by per-class scores (detect) or one person score and
/// `17 * (x, y, conf)` keypoints (pose). Frames are stretched to the input
/// size and results mapped back to frame coordinates.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    task: ModelTask,
    input_size: u32,
    confidence_floor: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        task: ModelTask,
        input_size: u32,
        device: Device,
    ) -> Result<Self> {
        if device != Device::Cpu {
            bail!("tract backend runs on cpu only; device {} unavailable", device);
        }
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            task,
            input_size,
            confidence_floor: 0.25,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Drop candidates below this score before NMS.
    pub fn with_confidence_floor(mut self, floor: f32) -> Self {
        self.confidence_floor = floor;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let resized = resize_exact(frame, self.input_size, self.input_size)?;
        let pixels = resized.as_bytes();
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            pixels[(y * size + x) * 3 + c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, output: &Tensor, frame: &Frame) -> Result<Vec<Detection>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [1, C, N]")?;
        let (_, rows, candidates) = view.dim();

        let score_rows = match self.task {
            ModelTask::Detect => rows
                .checked_sub(4)
                .filter(|n| *n > 0)
                .ok_or_else(|| anyhow!("detect output has {} rows, expected > 4", rows))?,
            ModelTask::Pose => {
                if rows != 5 + POSE_KEYPOINTS * 3 {
                    bail!(
                        "pose output has {} rows, expected {}",
                        rows,
                        5 + POSE_KEYPOINTS * 3
                    );
                }
                1
            }
        };

        let sx = frame.width as f32 / self.input_size as f32;
        let sy = frame.height as f32 / self.input_size as f32;

        let mut detections = Vec::new();
        for i in 0..candidates {
            let (class, score) = (0..score_rows)
                .map(|c| (c, view[[0, 4 + c, i]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < self.confidence_floor {
                continue;
            }

            let bbox = BBox::from_center(
                view[[0, 0, i]],
                view[[0, 1, i]],
                view[[0, 2, i]],
                view[[0, 3, i]],
            )
            .scale(sx, sy)
            .clamp_to(frame.width, frame.height);

            let mut detection = Detection::new(bbox, score.min(1.0), ClassId(class as u16));
            if self.task == ModelTask::Pose {
                detection.keypoints = (0..POSE_KEYPOINTS)
                    .map(|k| Keypoint {
                        x: view[[0, 5 + k * 3, i]] * sx,
                        y: view[[0, 6 + k * 3, i]] * sy,
                        confidence: view[[0, 7 + k * 3, i]],
                    })
                    .collect();
            }
            detections.push(detection);
        }

        Ok(non_max_suppression(detections, self.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn task(&self) -> ModelTask {
        self.task
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        self.decode(output, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled(self.input_size, self.input_size, [114, 114, 114])?;
        self.detect(&blank).map(|_| ())
    }
}
