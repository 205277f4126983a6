use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

use crate::frame::Frame;

use super::result::Detection;

/// What a model produces per detection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModelTask {
    /// Boxes and classes only.
    #[default]
    Detect,
    /// Person boxes with 17 keypoints each.
    Pose,
}

impl FromStr for ModelTask {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detect" | "detection" => Ok(Self::Detect),
            "pose" | "keypoint" | "keypoints" => Ok(Self::Pose),
            other => Err(anyhow!("unknown model task '{}' (expected detect or pose)", other)),
        }
    }
}

/// Compute device a backend should run on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(u32),
}

impl FromStr for Device {
    type Err = anyhow::Error;

    /// Accepts `cpu`, `cuda:N`, `cuda` (device 0) or a bare GPU index.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "cpu" {
            return Ok(Self::Cpu);
        }
        if s == "cuda" || s == "gpu" {
            return Ok(Self::Cuda(0));
        }
        let index = s
            .strip_prefix("cuda:")
            .or_else(|| s.strip_prefix("gpu:"))
            .unwrap_or(&s);
        index
            .parse()
            .map(Self::Cuda)
            .map_err(|_| anyhow!("invalid device '{}' (expected cpu, cuda:N or N)", s))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

/// Detector backend trait.
///
/// A backend wraps one loaded model. It receives a frame, returns raw
/// detections in that frame's pixel coordinates and keeps no reference to
/// the pixels after `detect` returns. Filtering by confidence and class is
/// the adapter's job, although backends may pre-filter for speed.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn task(&self) -> ModelTask;

    /// Run the model on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
