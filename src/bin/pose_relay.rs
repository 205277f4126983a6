//! pose_relay - Run a model on a live stream and republish it.
//!
//! Frames are processed at full resolution. With visualization on, boxes,
//! labels and pose skeletons are drawn; otherwise frames pass through
//! untouched after inference. Nothing is counted.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use live_inference::config::parse_flag;
use live_inference::{Overrides, Pipeline, PipelineConfig, PipelineMode};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay a live stream through a pose/detection model")]
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

    /// Draw detections on the published frames (0/1/true/false).
    #[arg(long, env = "VISUALIZATION", value_parser = parse_visualization)]
    visualization: Option<bool>,

    /// TrueType font for labels.
    #[arg(long, env = "FONT_PATH")]
    font: Option<PathBuf>,
}

fn parse_visualization(value: &str) -> Result<bool, String> {
    parse_flag(value).ok_or_else(|| format!("expected 0, 1, true or false, got '{}'", value))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let overrides = Overrides {
        model_path: args.model,
        input_url: args.input,
        output_url: args.output,
        visualization: args.visualization,
        scale_percent: None,
        font_path: args.font,
    };
    let config = PipelineConfig::load_from(args.config.as_deref(), &overrides)?;
    log::info!(
        "pose_relay: {} -> {} (model {}, visualization {})",
        config.input.url,
        config.output.url,
        config.model.path,
        config.visualization
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let mut pipeline = Pipeline::from_config(&config, PipelineMode::PoseRelay)?;
    pipeline.run(&shutdown)?;
    log::info!("pose_relay: stopped");
    Ok(())
}
