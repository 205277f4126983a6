//! Live Inference Relay
//!
//! Pulls frames from a live stream, runs an object detection or pose model on
//! each one, optionally counts objects crossing an interest line, draws the
//! results and republishes the stream through an encoder.
//!
//! # Architecture
//!
//! ```text
//! FrameSource -> resize -> InferenceAdapter -> ZoneCounter -> Annotator -> FrameSink
//! ```
//!
//! - Only the freshest frame is processed. The capture worker keeps advancing
//!   the stream while the main loop is busy; stale frames are dropped.
//! - Counters are cumulative for the run and never decrease.
//! - Capture failures are retried. Model and encoder failures end the run.
//!
//! # Module Structure
//!
//! - `frame`: RGB24 frame type shared by every stage
//! - `ingest`: capture devices and the double-buffered `FrameSource`
//! - `resize`: percentage and exact-geometry resizing
//! - `detect`: detection types, model backends, `InferenceAdapter`
//! - `zone`: line-crossing counter
//! - `annotate`: overlay drawing
//! - `sink`: encoder output
//! - `pipeline`: the processing loop and its two modes
//! - `config`: file and environment configuration

pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod resize;
pub mod sink;
pub mod zone;

pub use annotate::{AnnotationStyle, Annotator, CountingOverlay};
pub use config::{ModelSettings, Overrides, PipelineConfig, StreamSettings, ZoneSettings};
pub use detect::{
    BBox, ClassId, Detection, DetectorBackend, Device, InferenceAdapter, Keypoint, ModelTask,
    StubBackend,
};
pub use frame::Frame;
pub use ingest::{CaptureDevice, DeviceOpener, FrameSource};
pub use pipeline::{LoopSettings, Pipeline, PipelineMode, StepOutcome};
pub use resize::{resize, resize_exact};
pub use sink::{EncoderSink, FrameSink, MemorySink};
pub use zone::{Counters, Crossing, LineAxis, SplitBoundary, ZoneConfig, ZoneCounter};
