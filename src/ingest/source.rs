use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::frame::Frame;

use super::{CaptureDevice, DeviceOpener};

/// How long the worker waits for a command before grabbing again.
const IDLE_TICK: Duration = Duration::from_millis(5);

/// Requests sent to the capture worker, processed strictly in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum Command {
    /// Acknowledges the previous reply; the worker goes back to grabbing.
    Reset = 0,
    /// Decode the latest grabbed frame and reply with it.
    Grab = 1,
    /// Release the device and exit.
    Close = 2,
}

enum Reply {
    Frame(Frame),
    NoFrame,
}

/// Double-buffered frame source backed by a capture worker thread.
///
/// The worker keeps advancing the device while the caller is busy, so
/// `get_frame` always returns the freshest frame rather than the next one in
/// the stream. Commands and replies travel over rendezvous channels.
pub struct FrameSource {
    label: String,
    opener: DeviceOpener,
    commands: Sender<Command>,
    replies: Receiver<Reply>,
    worker: Option<JoinHandle<()>>,
}

impl FrameSource {
    /// Spawn the worker and open the device on it.
    ///
    /// Fails if the device cannot be opened at all (for example, the decoder
    /// binary is missing). A stream that opens but yields nothing is not an
    /// error here; it shows up as `Ok(None)` from `get_frame`.
    pub fn start(label: impl Into<String>, opener: DeviceOpener) -> Result<Self> {
        let label = label.into();
        let (commands, command_rx) = bounded::<Command>(0);
        let (reply_tx, replies) = bounded::<Reply>(0);
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let worker_opener = opener.clone();
        let worker_label = label.clone();
        let worker = thread::Builder::new()
            .name(format!("capture-{}", label))
            .spawn(move || {
                let device = match worker_opener() {
                    Ok(device) => {
                        let _ = ready_tx.send(Ok(()));
                        device
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                run_worker(device, command_rx, reply_tx, &worker_label);
            })
            .context("failed to spawn capture worker")?;

        let opened = ready_rx
            .recv()
            .map_err(|_| anyhow!("capture worker for {} exited during startup", label))
            .and_then(|res| res);
        if let Err(err) = opened {
            let _ = worker.join();
            return Err(err.context(format!("failed to open capture device {}", label)));
        }

        log::info!("capture: worker started for {}", label);
        Ok(Self {
            label,
            opener,
            commands,
            replies,
            worker: Some(worker),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Fetch the freshest frame.
    ///
    /// `Ok(None)` is a capture failure the caller may retry; `Err` means the
    /// worker is gone.
    pub fn get_frame(&self) -> Result<Option<Frame>> {
        self.send(Command::Grab)?;
        let reply = self
            .replies
            .recv()
            .map_err(|_| anyhow!("capture worker for {} has stopped", self.label))?;
        self.send(Command::Reset)?;
        Ok(match reply {
            Reply::Frame(frame) => Some(frame),
            Reply::NoFrame => None,
        })
    }

    /// Close the device and join the worker. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let _ = self.commands.send(Command::Close);
        worker
            .join()
            .map_err(|_| anyhow!("capture worker for {} panicked", self.label))?;
        log::info!("capture: worker stopped for {}", self.label);
        Ok(())
    }

    /// Stop the current worker and start a new one with the same opener.
    pub fn restart(&mut self) -> Result<()> {
        self.stop()?;
        log::info!("capture: restarting {}", self.label);
        *self = Self::start(self.label.clone(), self.opener.clone())?;
        Ok(())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("capture worker for {} has stopped", self.label))
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("capture: {}", err);
        }
    }
}

fn run_worker(
    mut device: Box<dyn CaptureDevice>,
    commands: Receiver<Command>,
    replies: Sender<Reply>,
    label: &str,
) {
    let mut delivered: u64 = 0;
    loop {
        device.grab();
        match commands.recv_timeout(IDLE_TICK) {
            Ok(Command::Grab) => {
                let reply = match device.retrieve() {
                    Ok(Some(frame)) => {
                        delivered += 1;
                        Reply::Frame(frame.with_sequence(delivered))
                    }
                    Ok(None) => Reply::NoFrame,
                    Err(err) => {
                        log::warn!("capture: {} retrieve failed: {:#}", label, err);
                        Reply::NoFrame
                    }
                };
                if replies.send(reply).is_err() {
                    break;
                }
            }
            Ok(Command::Reset) | Err(RecvTimeoutError::Timeout) => {}
            Ok(Command::Close) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    device.release();
}
