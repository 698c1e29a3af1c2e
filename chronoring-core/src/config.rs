//! Ring buffer configuration (JSON file plus environment overrides).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::buffering::audio_ring::{MAX_CAPACITY_FRAMES, MIN_CAPACITY_FRAMES};
use crate::error::{ChronoringError, Result};
use crate::format::AudioFormat;

pub const ENV_CAPACITY_FRAMES: &str = "CHRONORING_CAPACITY_FRAMES";
pub const ENV_CHANNELS: &str = "CHRONORING_CHANNELS";
pub const ENV_SAMPLE_RATE: &str = "CHRONORING_SAMPLE_RATE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct RingConfig {
    pub format: AudioFormat,
    /// Ring capacity in frames. Rounded up to a power of two by `normalize`.
    pub capacity_frames: usize,
    /// Frames per write in the stress harness.
    pub block_frames: usize,
    /// Stress harness run time.
    pub duration_secs: f64,
    /// Frames the stress harness reader requests per read.
    pub reader_window_frames: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            capacity_frames: 16_384,
            block_frames: 512,
            duration_secs: 2.0,
            reader_window_frames: 1_024,
        }
    }
}

impl RingConfig {
    pub fn normalize(&mut self) {
        self.capacity_frames = self
            .capacity_frames
            .clamp(MIN_CAPACITY_FRAMES, MAX_CAPACITY_FRAMES)
            .next_power_of_two();
        self.format.channels = self.format.channels.clamp(1, 64);
        if !(self.format.sample_rate.is_finite() && self.format.sample_rate > 0.0) {
            self.format.sample_rate = AudioFormat::default().sample_rate;
        }
        self.format.sample_rate = self.format.sample_rate.clamp(1_000.0, 768_000.0);
        self.block_frames = self.block_frames.clamp(1, self.capacity_frames);
        self.reader_window_frames = self.reader_window_frames.clamp(1, self.capacity_frames);
        if !self.duration_secs.is_finite() {
            self.duration_secs = Self::default().duration_secs;
        }
        self.duration_secs = self.duration_secs.clamp(0.01, 3_600.0);
    }

    /// Applies `CHRONORING_*` environment variables, then normalizes.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(ENV_CAPACITY_FRAMES) {
            match raw.trim().parse::<usize>() {
                Ok(frames) => self.capacity_frames = frames,
                Err(_) => warn!(value = %raw, "ignoring invalid {ENV_CAPACITY_FRAMES}"),
            }
        }
        if let Some(raw) = lookup(ENV_CHANNELS) {
            match raw.trim().parse::<u32>() {
                Ok(channels) => self.format.channels = channels,
                Err(_) => warn!(value = %raw, "ignoring invalid {ENV_CHANNELS}"),
            }
        }
        if let Some(raw) = lookup(ENV_SAMPLE_RATE) {
            match raw.trim().parse::<f64>() {
                Ok(rate) => self.format.sample_rate = rate,
                Err(_) => warn!(value = %raw, "ignoring invalid {ENV_SAMPLE_RATE}"),
            }
        }
        self.normalize();
    }
}

/// Loads a config, falling back to defaults when the file is missing or
/// unreadable.
pub fn load_config(path: &Path) -> RingConfig {
    let mut config = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<RingConfig>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "invalid ring config, using defaults: {e}");
            RingConfig::default()
        }),
        Err(_) => RingConfig::default(),
    };
    config.normalize();
    config
}

/// Strict variant of [`load_config`] for explicitly requested files.
pub fn read_config(path: &Path) -> Result<RingConfig> {
    let raw = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            ChronoringError::Config(format!("config file {} not found", path.display()))
        }
        _ => ChronoringError::Io(e),
    })?;
    let mut config: RingConfig = serde_json::from_str(&raw)?;
    config.normalize();
    Ok(config)
}

pub fn save_config(path: &Path, config: &RingConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}
