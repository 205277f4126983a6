use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::{ClassId, Device, ModelTask, DEFAULT_TRACKED_CLASSES};
use crate::zone::{LineAxis, SplitBoundary, ZoneConfig};

const CONFIG_PATH_ENV: &str = "LIVE_CONFIG";

const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.7;
const DEFAULT_INPUT_WIDTH: u32 = 3840;
const DEFAULT_INPUT_HEIGHT: u32 = 2160;
const DEFAULT_OUTPUT_WIDTH: u32 = 1920;
const DEFAULT_OUTPUT_HEIGHT: u32 = 1080;
const DEFAULT_SCALE_PERCENT: u32 = 50;
const DEFAULT_INTEREST_LINE: i32 = 1500;
const DEFAULT_INTEREST_SPLIT: i32 = 2000;
const DEFAULT_INTEREST_OFFSET: i32 = 8;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    model: Option<ModelConfigFile>,
    input: Option<StreamConfigFile>,
    output: Option<StreamConfigFile>,
    zone: Option<ZoneConfigFile>,
    visualization: Option<bool>,
    scale_percent: Option<u32>,
    font_path: Option<PathBuf>,
    retry_delay_ms: Option<u64>,
    reconnect_after: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<String>,
    task: Option<String>,
    input_size: Option<u32>,
    device: Option<String>,
    confidence: Option<f32>,
    class_ids: Option<Vec<u16>>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ZoneConfigFile {
    line: Option<i32>,
    split: Option<i32>,
    offset: Option<i32>,
    axis: Option<String>,
    split_boundary: Option<String>,
}

/// Fully resolved settings for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model: ModelSettings,
    pub input: StreamSettings,
    pub output: StreamSettings,
    pub zone: ZoneSettings,
    pub visualization: bool,
    pub scale_percent: u32,
    pub font_path: Option<PathBuf>,
    pub retry_delay: Duration,
    /// Consecutive capture failures before the capture worker is restarted (0 = never).
    pub reconnect_after: u32,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: String,
    pub task: ModelTask,
    pub input_size: u32,
    pub device: Device,
    pub confidence: f32,
    pub class_ids: Vec<ClassId>,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Zone geometry in reference (full resolution) coordinates.
#[derive(Debug, Clone)]
pub struct ZoneSettings {
    pub line: i32,
    pub split: i32,
    pub offset: i32,
    pub axis: LineAxis,
    pub split_boundary: SplitBoundary,
}

/// Command-line values that take precedence over the file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model_path: Option<String>,
    pub input_url: Option<String>,
    pub output_url: Option<String>,
    pub visualization: Option<bool>,
    pub scale_percent: Option<u32>,
    pub font_path: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load from the file named by `LIVE_CONFIG` (if any) plus the environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(
            config_path.as_deref().map(Path::new),
            &Overrides::default(),
        )
    }

    /// File, then environment, then `overrides`, then validation.
    pub fn load_from(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Zone geometry for frames of the configured scale.
    pub fn zone_config(&self) -> ZoneConfig {
        ZoneConfig {
            line: self.zone.line,
            split: self.zone.split,
            offset: self.zone.offset,
            axis: self.zone.axis,
            split_boundary: self.zone.split_boundary,
            tracked_classes: self.model.class_ids.clone(),
        }
        .scaled(self.scale_percent)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let model_file = file.model.unwrap_or_default();
        let model = ModelSettings {
            path: model_file.path.unwrap_or_default(),
            task: parse_optional(model_file.task.as_deref(), "model.task")?.unwrap_or_default(),
            input_size: model_file.input_size.unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
            device: parse_optional(model_file.device.as_deref(), "model.device")?
                .unwrap_or_default(),
            confidence: model_file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            class_ids: model_file
                .class_ids
                .map(|ids| ids.into_iter().map(ClassId).collect())
                .unwrap_or_else(|| DEFAULT_TRACKED_CLASSES.to_vec()),
        };
        let input = StreamSettings::from_file(
            file.input.unwrap_or_default(),
            (DEFAULT_INPUT_WIDTH, DEFAULT_INPUT_HEIGHT),
        );
        let output = StreamSettings::from_file(
            file.output.unwrap_or_default(),
            (DEFAULT_OUTPUT_WIDTH, DEFAULT_OUTPUT_HEIGHT),
        );

        let zone_file = file.zone.unwrap_or_default();
        let zone = ZoneSettings {
            line: zone_file.line.unwrap_or(DEFAULT_INTEREST_LINE),
            split: zone_file.split.unwrap_or(DEFAULT_INTEREST_SPLIT),
            offset: zone_file.offset.unwrap_or(DEFAULT_INTEREST_OFFSET),
            axis: parse_optional(zone_file.axis.as_deref(), "zone.axis")?.unwrap_or_default(),
            split_boundary: parse_optional(
                zone_file.split_boundary.as_deref(),
                "zone.split_boundary",
            )?
            .unwrap_or_default(),
        };

        Ok(Self {
            model,
            input,
            output,
            zone,
            visualization: file.visualization.unwrap_or(false),
            scale_percent: file.scale_percent.unwrap_or(DEFAULT_SCALE_PERCENT),
            font_path: file.font_path,
            retry_delay: Duration::from_millis(
                file.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
            ),
            reconnect_after: file.reconnect_after.unwrap_or(0),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_string("MODEL_PATH") {
            self.model.path = path;
        }
        if let Some(task) = env_parse("MODEL_TASK")? {
            self.model.task = task;
        }
        if let Some(size) = env_parse("MODEL_INPUT_SIZE")? {
            self.model.input_size = size;
        }
        if let Some(device) = env_parse("GPU_DEVICE")? {
            self.model.device = device;
        }
        if let Some(confidence) = env_parse("CONFIDENCE")? {
            self.model.confidence = confidence;
        }
        if let Some(ids) = env_string("CLASS_IDS") {
            self.model.class_ids = split_csv(&ids)
                .iter()
                .map(|id| id.parse::<ClassId>())
                .collect::<std::result::Result<_, _>>()
                .context("CLASS_IDS must be a comma separated list of class ids")?;
        }

        if let Some(url) = env_string("RTSP_INPUT") {
            self.input.url = url;
        }
        if let Some(width) = env_parse("INPUT_WIDTH")? {
            self.input.width = width;
        }
        if let Some(height) = env_parse("INPUT_HEIGHT")? {
            self.input.height = height;
        }
        if let Some(url) = env_string("RTSP_OUTPUT") {
            self.output.url = url;
        }
        if let Some(width) = env_parse("OUTPUT_WIDTH")? {
            self.output.width = width;
        }
        if let Some(height) = env_parse("OUTPUT_HEIGHT")? {
            self.output.height = height;
        }

        if let Some(value) = env_string("VISUALIZATION") {
            self.visualization = parse_flag(&value)
                .ok_or_else(|| anyhow!("VISUALIZATION must be one of 0, 1, true, false"))?;
        }
        if let Some(percent) = env_parse("SCALE_PERCENT")? {
            self.scale_percent = percent;
        }
        if let Some(line) = env_parse("INTEREST_LINE")? {
            self.zone.line = line;
        }
        if let Some(split) = env_parse("INTEREST_SPLIT")? {
            self.zone.split = split;
        }
        if let Some(offset) = env_parse("INTEREST_OFFSET")? {
            self.zone.offset = offset;
        }
        if let Some(axis) = env_parse("INTEREST_AXIS")? {
            self.zone.axis = axis;
        }
        if let Some(boundary) = env_parse("SPLIT_BOUNDARY")? {
            self.zone.split_boundary = boundary;
        }
        if let Some(path) = env_string("FONT_PATH") {
            self.font_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = env_parse::<u64>("RETRY_DELAY_MS")? {
            self.retry_delay = Duration::from_millis(ms);
        }
        if let Some(count) = env_parse("RECONNECT_AFTER")? {
            self.reconnect_after = count;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(path) = &overrides.model_path {
            self.model.path = path.clone();
        }
        if let Some(url) = &overrides.input_url {
            self.input.url = url.clone();
        }
        if let Some(url) = &overrides.output_url {
            self.output.url = url.clone();
        }
        if let Some(visualization) = overrides.visualization {
            self.visualization = visualization;
        }
        if let Some(percent) = overrides.scale_percent {
            self.scale_percent = percent;
        }
        if let Some(path) = &overrides.font_path {
            self.font_path = Some(path.clone());
        }
    }

    fn validate(&self) -> Result<()> {
        if self.model.path.trim().is_empty() {
            bail!("MODEL_PATH must be set");
        }
        if self.input.url.trim().is_empty() {
            bail!("RTSP_INPUT must be set");
        }
        if self.output.url.trim().is_empty() {
            bail!("RTSP_OUTPUT must be set");
        }
        if self.scale_percent == 0 {
            bail!("scale percent must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.model.confidence) {
            bail!(
                "confidence must be within [0, 1], got {}",
                self.model.confidence
            );
        }
        if self.zone.offset < 0 {
            bail!("interest offset must not be negative");
        }
        if self.model.input_size == 0 {
            bail!("model input size must be greater than zero");
        }
        for (name, stream) in [("input", &self.input), ("output", &self.output)] {
            if stream.width == 0 || stream.height == 0 {
                bail!(
                    "{} geometry must be non-zero, got {}x{}",
                    name,
                    stream.width,
                    stream.height
                );
            }
        }
        let (width, height) = crate::resize::scaled_dimensions(
            self.input.width,
            self.input.height,
            self.scale_percent,
        )
        .context("scale percent leaves no pixels for the configured input")?;
        let zone = self.zone_config();
        zone.validate()?;
        zone.fits_frame(width, height).with_context(|| {
            format!(
                "zone geometry does not fit {}x{} input at {}%",
                self.input.width, self.input.height, self.scale_percent
            )
        })?;
        Ok(())
    }
}

impl StreamSettings {
    fn from_file(file: StreamConfigFile, (width, height): (u32, u32)) -> Self {
        Self {
            url: file.url.unwrap_or_default(),
            width: file.width.unwrap_or(width),
            height: file.height.unwrap_or(height),
        }
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_optional<T>(value: Option<&str>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| anyhow!("invalid {} '{}': {}", key, raw, e))
        })
        .transpose()
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_optional(env_string(key).as_deref().map(str::trim), key)
}

/// Accepts `0`, `1`, `true` and `false` (any case).
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
