//! traffic_counter - Count vehicles crossing an interest line on a live stream.
//!
//! Frames are resized, run through the model, counted against the zone and
//! annotated with boxes, the interest line and the running in/out totals
//! before being republished.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use live_inference::{Overrides, Pipeline, PipelineConfig, PipelineMode};

#[derive(Parser, Debug)]
#[command(author, version, about = "Count objects crossing a line on a live stream")]
struct Args {
    /// JSON or TOML config file; environment variables override it.
    #[arg(long, env = "LIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Model weights (`stub://...` selects the stub backend).
    #[arg(long, env = "MODEL_PATH")]
    model: Option<String>,

    /// Input stream URL (`stub://...` selects the synthetic source).
    #[arg(long, env = "RTSP_INPUT")]
    input: Option<String>,

    /// Output stream URL.
    #[arg(long, env = "RTSP_OUTPUT")]
    output: Option<String>,

    /// Resize percentage applied before inference; zone geometry scales with it.
    #[arg(long, env = "SCALE_PERCENT")]
    scale_percent: Option<u32>,

    /// TrueType font for labels and counters.
    #[arg(long, env = "FONT_PATH")]
    font: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let overrides = Overrides {
        model_path: args.model,
        input_url: args.input,
        output_url: args.output,
        visualization: Some(true),
        scale_percent: args.scale_percent,
        font_path: args.font,
    };
    let config = PipelineConfig::load_from(args.config.as_deref(), &overrides)?;
    let zone = config.zone_config();
    log::info!(
        "traffic_counter: {} -> {} at {}%, line {:?} {} +/- {}, split {} ({:?}), classes {:?}",
        config.input.url,
        config.output.url,
        config.scale_percent,
        zone.axis,
        zone.line,
        zone.offset,
        zone.split,
        zone.split_boundary,
        zone.tracked_classes
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let mut pipeline = Pipeline::from_config(&config, PipelineMode::TrafficCounter)?;
    pipeline.run(&shutdown)?;
    if let Some(counters) = pipeline.counters() {
        for (class, n) in &counters.per_class_in {
            log::info!("traffic_counter: class {} in={} out={}", class, n, counters.class_out(*class));
        }
    }
    Ok(())
}
