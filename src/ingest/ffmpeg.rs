use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::frame::{frame_len, Frame};
use crate::sink::detach_from_terminal;

use super::CaptureDevice;

const RETRIEVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Decodes a stream with an `ffmpeg` subprocess writing raw RGB24 to stdout.
///
/// A reader thread pulls whole frames off the pipe into a one-slot channel,
/// evicting the older frame when the slot is full, so the device always holds
/// at most the freshest decoded frame.
pub struct FfmpegCapture {
    url: String,
    child: Option<Child>,
    frames: Receiver<Frame>,
    latest: Option<Frame>,
    reader: Option<JoinHandle<()>>,
}

impl FfmpegCapture {
    pub fn spawn(url: &str, width: u32, height: u32) -> Result<Self> {
        let frame_bytes = frame_len(width, height)?;
        let scale_arg = format!("scale={}:{}", width, height);

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");
        if url.starts_with("rtsp://") {
            cmd.arg("-rtsp_transport").arg("tcp");
        }
        cmd.arg("-fflags")
            .arg("nobuffer")
            .arg("-flags")
            .arg("low_delay")
            .arg("-i")
            .arg(url)
            .arg("-an")
            .arg("-vf")
            .arg(&scale_arg)
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        detach_from_terminal(&mut cmd);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn ffmpeg decoder for {}", url))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;

        let (tx, rx) = bounded(1);
        let evict = rx.clone();
        let label = url.to_string();
        let reader = thread::Builder::new()
            .name("ffmpeg-decode".into())
            .spawn(move || read_frames(stdout, frame_bytes, width, height, tx, evict, &label))
            .context("failed to spawn ffmpeg reader thread")?;

        log::info!("capture: decoding {} at {}x{} via ffmpeg", url, width, height);
        Ok(Self {
            url: url.to_string(),
            child: Some(child),
            frames: rx,
            latest: None,
            reader: Some(reader),
        })
    }
}

fn read_frames(
    mut stdout: impl Read,
    frame_bytes: usize,
    width: u32,
    height: u32,
    tx: Sender<Frame>,
    evict: Receiver<Frame>,
    label: &str,
) {
    let mut buffer = vec![0u8; frame_bytes];
    loop {
        if let Err(err) = stdout.read_exact(&mut buffer) {
            log::warn!("capture: ffmpeg stream {} ended: {}", label, err);
            break;
        }
        let frame = match Frame::new(buffer.clone(), width, height) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("capture: dropping malformed frame from {}: {}", label, err);
                continue;
            }
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                let _ = evict.try_recv();
                let _ = tx.try_send(frame);
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}

impl CaptureDevice for FfmpegCapture {
    fn grab(&mut self) {
        while let Ok(frame) = self.frames.try_recv() {
            self.latest = Some(frame);
        }
    }

    fn retrieve(&mut self) -> Result<Option<Frame>> {
        self.grab();
        if let Some(frame) = self.latest.take() {
            return Ok(Some(frame));
        }
        match self.frames.recv_timeout(RETRIEVE_TIMEOUT) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(anyhow!("ffmpeg decoder for {} has exited", self.url))
            }
        }
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
            log::info!("capture: released {}", self.url);
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        self.release();
    }
}
