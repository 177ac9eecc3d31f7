//! Configuration management (config.toml)
//!
//! Settings are stored in TOML format in the platform-specific config
//! directory. Missing sections and fields fall back to defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::format::{NATIVE_FORMAT, StreamRequest};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Output device settings
    #[serde(default)]
    pub audio: AudioConfig,
    /// Requested stream format
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Where the frame callback resumes when the voice offset is in no buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DesyncRecovery {
    /// Treat buffer 0 as playing
    #[default]
    FirstBuffer,
    /// Keep the last buffer observed as playing
    KeepPrevious,
}

/// Output device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Buffers in the ring (default: 2, minimum: 2)
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,
    /// Fallback wake-up period while waiting for a free buffer (default: 3)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Hardware voice priority (default: 31, the highest)
    #[serde(default = "default_voice_priority")]
    pub voice_priority: u32,
    /// Master volume level (default: 1.0, range: 0.0-1.0)
    #[serde(default = "default_volume")]
    pub master_volume: f32,
    #[serde(default)]
    pub desync_recovery: DesyncRecovery,
}

/// Requested stream format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Frames per second (default: 48000)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Channel count (default: 2)
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Frames per buffer (default: 512)
    #[serde(default = "default_frames")]
    pub frames: u32,
}

fn default_buffer_count() -> usize {
    2
}
fn default_poll_interval_ms() -> u64 {
    3
}
fn default_voice_priority() -> u32 {
    crate::engine::VOICE_PRIORITY_MAX
}
fn default_volume() -> f32 {
    1.0
}
fn default_sample_rate() -> u32 {
    48_000
}
fn default_channels() -> u16 {
    2
}
fn default_frames() -> u32 {
    512
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_count: default_buffer_count(),
            poll_interval_ms: default_poll_interval_ms(),
            voice_priority: default_voice_priority(),
            master_volume: default_volume(),
            desync_recovery: DesyncRecovery::default(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            frames: default_frames(),
        }
    }
}

impl StreamConfig {
    pub fn request(&self) -> StreamRequest {
        StreamRequest {
            sample_rate: self.sample_rate,
            channels: self.channels,
            format: NATIVE_FORMAT,
            frames: self.frames,
        }
    }
}

/// Errors from reading or writing a config file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Returns the platform-specific configuration directory.
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.ringvoice", "", "ringvoice")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from disk.
///
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> Config {
    config_dir()
        .and_then(|dir| load_from(&dir.join("config.toml")).ok())
        .unwrap_or_default()
}

/// Saves the configuration to the platform config directory.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    match config_dir() {
        Some(dir) => save_to(config, &dir.join("config.toml")),
        None => Ok(()),
    }
}

pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Writes `config` to `path`, creating parent directories.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
