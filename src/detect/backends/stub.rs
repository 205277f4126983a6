use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::detect::backend::{DetectorBackend, ModelTask};
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Scripted backend for tests and dry runs (`stub://` model paths).
///
/// Detections are expressed in the coordinates of a reference frame size and
/// rescaled to whatever frame is passed to `detect`, so a script written for
/// the camera's native resolution keeps working after the pipeline shrinks
/// frames.
pub struct StubBackend {
    task: ModelTask,
    reference: Option<(u32, u32)>,
    script: VecDeque<Vec<Detection>>,
    steady: Vec<Detection>,
    fail_after: Option<u64>,
    calls: u64,
}

impl StubBackend {
    /// A backend that never detects anything.
    pub fn new() -> Self {
        Self {
            task: ModelTask::Detect,
            reference: None,
            script: VecDeque::new(),
            steady: Vec::new(),
            fail_after: None,
            calls: 0,
        }
    }

    /// Return the same detections on every frame.
    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.steady = detections;
        self
    }

    /// Return one entry per frame, then fall back to the steady detections.
    pub fn with_script(mut self, frames: Vec<Vec<Detection>>) -> Self {
        self.script = frames.into();
        self
    }

    /// Coordinates in the script refer to a frame of this size.
    pub fn with_reference(mut self, width: u32, height: u32) -> Self {
        self.reference = Some((width, height));
        self
    }

    pub fn with_task(mut self, task: ModelTask) -> Self {
        self.task = task;
        self
    }

    /// Fail every call after `calls` successful ones (simulates a lost device).
    pub fn failing_after(mut self, calls: u64) -> Self {
        self.fail_after = Some(calls);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn task(&self) -> ModelTask {
        self.task
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if self.fail_after.is_some_and(|limit| self.calls >= limit) {
            return Err(anyhow!("stub device unavailable after {} calls", self.calls));
        }
        self.calls += 1;

        let detections = self.script.pop_front().unwrap_or_else(|| self.steady.clone());
        let Some((ref_w, ref_h)) = self.reference else {
            return Ok(detections);
        };
        let sx = frame.width as f32 / ref_w as f32;
        let sy = frame.height as f32 / ref_h as f32;
        Ok(detections.iter().map(|d| d.scaled(sx, sy)).collect())
    }
}
