use anyhow::{Context, Result};
use std::collections::BTreeSet;

use crate::frame::Frame;

use super::backend::{DetectorBackend, ModelTask};
use super::result::{ClassId, Detection};

/// One model call per frame, filtered by confidence and class.
///
/// Backend failures are returned as errors and never retried here; a model
/// that cannot run usually means a configuration or device problem.
pub struct InferenceAdapter {
    backend: Box<dyn DetectorBackend>,
    confidence_threshold: f32,
    allowed_classes: BTreeSet<ClassId>,
}

impl InferenceAdapter {
    /// An empty `allowed_classes` set admits every class.
    pub fn new(
        backend: Box<dyn DetectorBackend>,
        confidence_threshold: f32,
        allowed_classes: impl IntoIterator<Item = ClassId>,
    ) -> Self {
        Self {
            backend,
            confidence_threshold,
            allowed_classes: allowed_classes.into_iter().collect(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn task(&self) -> ModelTask {
        self.backend.task()
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.backend
            .warm_up()
            .with_context(|| format!("warm up {} backend", self.backend.name()))
    }

    /// Run the model and keep detections at or above the threshold in an allowed class.
    pub fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let detections = self
            .backend
            .detect(frame)
            .with_context(|| format!("{} model inference failed", self.backend.name()))?;
        Ok(detections
            .into_iter()
            .filter(|d| self.accepts(d))
            .collect())
    }

    fn accepts(&self, detection: &Detection) -> bool {
        detection.confidence >= self.confidence_threshold
            && (self.allowed_classes.is_empty()
                || self.allowed_classes.contains(&detection.class_id))
    }
}
