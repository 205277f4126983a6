//! Frame ingestion.
//!
//! A `CaptureDevice` wraps one decoder (synthetic or an `ffmpeg` subprocess).
//! `FrameSource` owns the device on a dedicated worker thread and hands out
//! the freshest decoded frame on request; frames that were never asked for
//! are dropped, never queued.
//!
//! Capture failures are values: `FrameSource::get_frame` returns `Ok(None)`
//! when the device has nothing to give, and only fails when the worker
//! itself is gone.

mod ffmpeg;
mod source;
mod synthetic;

pub use ffmpeg::FfmpegCapture;
pub use source::FrameSource;
pub use synthetic::SyntheticCapture;

use anyhow::Result;
use std::sync::Arc;

use crate::config::StreamSettings;
use crate::frame::Frame;

/// A decoder the capture worker can drive.
pub trait CaptureDevice: Send {
    /// Advance the device's internal buffer without decoding for the caller.
    ///
    /// Called on every worker iteration so that a later `retrieve` returns a
    /// recent frame. Must not block.
    fn grab(&mut self);

    /// Decode and return the most recently grabbed frame.
    ///
    /// `Ok(None)` means nothing was available; `Err` is a device error. Both
    /// are reported to the caller as a missing frame.
    fn retrieve(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying stream. Called once before the worker exits.
    fn release(&mut self) {}
}

/// Opens a fresh device; shared so the source can reopen after a restart.
pub type DeviceOpener = Arc<dyn Fn() -> Result<Box<dyn CaptureDevice>> + Send + Sync>;

/// Open the device named by the stream URL.
///
/// `stub://` URLs select the synthetic device; everything else is handed to
/// `ffmpeg`.
pub fn open_device(settings: &StreamSettings) -> Result<Box<dyn CaptureDevice>> {
    if settings.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticCapture::new(
            &settings.url,
            settings.width,
            settings.height,
        )));
    }
    Ok(Box::new(FfmpegCapture::spawn(
        &settings.url,
        settings.width,
        settings.height,
    )?))
}

/// A `DeviceOpener` for `open_device` on the given settings.
pub fn device_opener(settings: StreamSettings) -> DeviceOpener {
    Arc::new(move || open_device(&settings))
}
