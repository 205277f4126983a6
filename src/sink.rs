//! Encoder output.
//!
//! `EncoderSink` pipes raw RGB24 frames into an `ffmpeg` child that encodes
//! and publishes them. The encoder's geometry is fixed at spawn time; frames
//! of any other size are resized before the write.

use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};

use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;
use crate::resize::resize_exact;

/// Where finished frames go.
pub trait FrameSink {
    /// Write one frame. Any error is fatal for the run.
    fn send(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close the output.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Arguments for an encoder publishing `width`x`height` RGB24 frames to `output`.
pub fn encoder_args(output: &str, width: u32, height: u32) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-re",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
        "-s",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(format!("{}x{}", width, height));
    args.extend(["-i", "pipe:0", "-pix_fmt", "yuvj420p"].map(String::from));
    if output.starts_with("rtsp://") {
        args.extend(["-f", "rtsp"].map(String::from));
    }
    args.push(output.to_string());
    args
}

/// Put a child in its own process group so a terminal Ctrl-C reaches only the
/// relay, which then closes its children in order.
pub(crate) fn detach_from_terminal(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    let _ = cmd;
}

pub struct EncoderSink {
    output: String,
    width: u32,
    height: u32,
    child: Child,
    stdin: Option<ChildStdin>,
    frames_written: u64,
}

impl EncoderSink {
    pub fn spawn(output: &str, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("encoder geometry must be non-zero"));
        }
        let mut cmd = Command::new("ffmpeg");
        cmd.args(encoder_args(output, width, height))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        detach_from_terminal(&mut cmd);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn ffmpeg encoder for {}", output))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to open ffmpeg encoder stdin"))?;
        log::info!("sink: encoding {}x{} to {}", width, height, output);
        Ok(Self {
            output: output.to_string(),
            width,
            height,
            child,
            stdin: Some(stdin),
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl FrameSink for EncoderSink {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("encoder for {} is already closed", self.output))?;
        let fitted;
        let frame = if frame.dimensions() == (self.width, self.height) {
            frame
        } else {
            fitted = resize_exact(frame, self.width, self.height)?;
            &fitted
        };
        stdin.write_all(frame.as_bytes()).with_context(|| {
            format!(
                "failed to write frame {} to encoder for {}",
                frame.sequence, self.output
            )
        })?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(stdin) = self.stdin.take() else {
            return Ok(());
        };
        drop(stdin);
        let status = self
            .child
            .wait()
            .with_context(|| format!("failed to wait for encoder for {}", self.output))?;
        log::info!(
            "sink: encoder for {} exited ({}) after {} frames",
            self.output,
            status,
            self.frames_written
        );
        Ok(())
    }
}

impl Drop for EncoderSink {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::warn!("sink: {:#}", err);
        }
    }
}

/// Keeps every frame in memory; for tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    pub frames: Vec<Frame>,
    pub finished: bool,
}

impl FrameSink for MemorySink {
    fn send(&mut self, frame: &Frame) -> Result<()> {
        if self.finished {
            return Err(anyhow!("memory sink is closed"));
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_args_publish_rtsp() {
        let args = encoder_args("rtsp://host:8554/out", 1920, 1080);
        assert_eq!(
            args,
            vec![
                "-hide_banner",
                "-loglevel",
                "error",
                "-re",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                "1920x1080",
                "-i",
                "pipe:0",
                "-pix_fmt",
                "yuvj420p",
                "-f",
                "rtsp",
                "rtsp://host:8554/out",
            ]
        );
    }

    #[test]
    fn file_outputs_let_ffmpeg_pick_the_muxer() {
        let args = encoder_args("/tmp/out.mkv", 640, 360);
        assert!(!args.iter().any(|a| a == "rtsp"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mkv"));
    }

    #[test]
    fn memory_sink_rejects_after_finish() -> Result<()> {
        let mut sink = MemorySink::default();
        let frame = Frame::filled(2, 2, [1, 2, 3])?;
        sink.send(&frame)?;
        sink.finish()?;
        assert!(sink.send(&frame).is_err());
        assert_eq!(sink.frames.len(), 1);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn detached_children_lead_their_own_group() -> Result<()> {
        // Signalling group `$$` only succeeds when the shell is its leader.
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("kill -s 0 -- -$$");
        detach_from_terminal(&mut cmd);
        assert!(cmd.status()?.success());
        Ok(())
    }

    #[test]
    fn zero_geometry_encoder_is_rejected() {
        assert!(EncoderSink::spawn("rtsp://host/out", 0, 1080).is_err());
    }
}
