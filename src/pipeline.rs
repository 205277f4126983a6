//! The per-frame processing loop.
//!
//! One iteration: fetch the freshest frame, resize, infer, count, annotate,
//! publish. A missing frame is retried after `retry_delay`; inference and
//! encoder failures end the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::annotate::{Annotator, CountingOverlay};
use crate::config::PipelineConfig;
use crate::detect::{load_backend, Detection, InferenceAdapter};
use crate::frame::Frame;
use crate::ingest::{device_opener, FrameSource};
use crate::resize::resize;
use crate::sink::{EncoderSink, FrameSink};
use crate::zone::{Counters, FrameTally, ZoneCounter};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Which entry point the pipeline is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineMode {
    /// Full-resolution relay with optional drawing; nothing is counted.
    PoseRelay,
    /// Resized frames, zone counting and the counting overlay.
    TrafficCounter,
}

#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub scale_percent: u32,
    pub retry_delay: Duration,
    /// Consecutive capture failures before the capture worker is restarted (0 = never).
    pub reconnect_after: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            scale_percent: 100,
            retry_delay: Duration::from_secs(1),
            reconnect_after: 0,
        }
    }
}

/// What one `step` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Published {
        detections: usize,
        tally: Option<FrameTally>,
    },
    NoFrame,
}

#[derive(Default)]
struct Throughput {
    published: u64,
    misses: u64,
    window_frames: u64,
}

pub struct Pipeline<S: FrameSink> {
    source: FrameSource,
    adapter: InferenceAdapter,
    sink: S,
    counter: Option<ZoneCounter>,
    annotator: Option<Annotator>,
    settings: LoopSettings,
    consecutive_failures: u32,
    stats: Throughput,
    last_health_log: Instant,
}

impl<S: FrameSink> Pipeline<S> {
    pub fn new(
        source: FrameSource,
        adapter: InferenceAdapter,
        sink: S,
        settings: LoopSettings,
    ) -> Self {
        Self {
            source,
            adapter,
            sink,
            counter: None,
            annotator: None,
            settings,
            consecutive_failures: 0,
            stats: Throughput::default(),
            last_health_log: Instant::now(),
        }
    }

    pub fn with_counter(mut self, counter: ZoneCounter) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn counters(&self) -> Option<&Counters> {
        self.counter.as_ref().map(|c| c.counters())
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Process at most one frame.
    pub fn step(&mut self) -> Result<StepOutcome> {
        let Some(frame) = self.source.get_frame()? else {
            self.on_capture_failure()?;
            return Ok(StepOutcome::NoFrame);
        };
        self.consecutive_failures = 0;

        let frame = if self.settings.scale_percent == 100 {
            frame
        } else {
            resize(&frame, self.settings.scale_percent)?
        };

        let detections = self.adapter.infer(&frame)?;
        let tally = self
            .counter
            .as_mut()
            .map(|counter| counter.observe(&detections));
        log_frame(&frame, &detections, tally);

        let frame = match &self.annotator {
            Some(annotator) => {
                let overlay = self.counter.as_ref().map(|counter| CountingOverlay {
                    zone: counter.zone(),
                    counters: counter.counters(),
                });
                annotator.annotate(frame, &detections, overlay)
            }
            None => frame,
        };
        self.sink.send(&frame)?;

        self.stats.published += 1;
        self.stats.window_frames += 1;
        self.maybe_log_health();
        Ok(StepOutcome::Published {
            detections: detections.len(),
            tally,
        })
    }

    /// Step until `shutdown` is set, then close the source and the sink.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        log::info!(
            "pipeline: running {} backend ({:?}) on {} at {}%",
            self.adapter.backend_name(),
            self.adapter.task(),
            self.source.label(),
            self.settings.scale_percent
        );
        let result = self.run_until(shutdown);
        let closed = self.close();
        result.and(closed)
    }

    /// Stop the capture worker and finish the sink.
    pub fn close(&mut self) -> Result<()> {
        self.source.stop()?;
        self.sink.finish()?;
        if let Some(counters) = self.counters() {
            log::info!(
                "pipeline: closed with {} in / {} out",
                counters.total_in,
                counters.total_out
            );
        }
        Ok(())
    }

    fn run_until(&mut self, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::SeqCst) {
            match self.step() {
                Ok(StepOutcome::NoFrame) => {
                    sleep_unless_shutdown(self.settings.retry_delay, shutdown)
                }
                Ok(StepOutcome::Published { .. }) => {}
                // Ctrl-C also reaches child processes in the same session, so a
                // step that was in flight can fail on a closed pipe.
                Err(err) if shutdown.load(Ordering::SeqCst) => {
                    log::warn!("pipeline: step interrupted by shutdown: {:#}", err);
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        log::info!("pipeline: shutdown requested");
        Ok(())
    }

    fn on_capture_failure(&mut self) -> Result<()> {
        self.consecutive_failures += 1;
        self.stats.misses += 1;
        log::warn!(
            "capture: no frame from {} ({} in a row), retrying in {:?}",
            self.source.label(),
            self.consecutive_failures,
            self.settings.retry_delay
        );
        let limit = self.settings.reconnect_after;
        if limit > 0 && self.consecutive_failures >= limit {
            self.source
                .restart()
                .with_context(|| format!("failed to reconnect {}", self.source.label()))?;
            self.consecutive_failures = 0;
        }
        Ok(())
    }

    fn maybe_log_health(&mut self) {
        let elapsed = self.last_health_log.elapsed();
        if elapsed < HEALTH_LOG_INTERVAL {
            return;
        }
        log::info!(
            "pipeline: {:.1} fps, {} frames published, {} capture misses",
            self.stats.window_frames as f64 / elapsed.as_secs_f64(),
            self.stats.published,
            self.stats.misses
        );
        self.stats.window_frames = 0;
        self.last_health_log = Instant::now();
    }
}

impl Pipeline<EncoderSink> {
    /// Assemble the pipeline for `mode`.
    ///
    /// The model is loaded and warmed up before any stream is opened, so a bad
    /// model or device fails fast.
    pub fn from_config(config: &PipelineConfig, mode: PipelineMode) -> Result<Self> {
        let backend = load_backend(&config.model)?;
        let allowed = match mode {
            PipelineMode::PoseRelay => Vec::new(),
            PipelineMode::TrafficCounter => config.model.class_ids.clone(),
        };
        let mut adapter = InferenceAdapter::new(backend, config.model.confidence, allowed);
        adapter.warm_up()?;

        let scale_percent = match mode {
            PipelineMode::PoseRelay => 100,
            PipelineMode::TrafficCounter => config.scale_percent,
        };
        let source = FrameSource::start(
            config.input.url.clone(),
            device_opener(config.input.clone()),
        )?;
        let sink = EncoderSink::spawn(&config.output.url, config.output.width, config.output.height)?;

        let settings = LoopSettings {
            scale_percent,
            retry_delay: config.retry_delay,
            reconnect_after: config.reconnect_after,
        };
        let mut pipeline = Pipeline::new(source, adapter, sink, settings);

        let draw = match mode {
            PipelineMode::PoseRelay => config.visualization,
            PipelineMode::TrafficCounter => true,
        };
        if draw {
            let mut annotator = Annotator::new(scale_percent);
            if let Some(path) = &config.font_path {
                annotator = annotator.with_font_file(path)?;
            } else {
                log::warn!("annotate: no FONT_PATH set, labels and counters will not be drawn");
            }
            pipeline = pipeline.with_annotator(annotator);
        }
        if mode == PipelineMode::TrafficCounter {
            pipeline = pipeline.with_counter(ZoneCounter::new(config.zone_config()));
        }
        Ok(pipeline)
    }
}

fn log_frame(frame: &Frame, detections: &[Detection], tally: Option<FrameTally>) {
    match tally {
        Some(t) => log::debug!(
            "frame {} ({:?} since capture): {} detections, +{} in, +{} out",
            frame.sequence,
            frame.age(),
            detections.len(),
            t.entered,
            t.exited
        ),
        None => log::debug!(
            "frame {} ({:?} since capture): {} detections",
            frame.sequence,
            frame.age(),
            detections.len()
        ),
    }
}

fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(SHUTDOWN_POLL.min(deadline - now));
    }
}
