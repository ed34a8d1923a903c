//! Configuration management for the transcoder
//!
//! This module handles loading and managing pipeline configuration
//! from various sources including config files and environment variables.

use crate::utils::error::{Result, TranscodeError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Trim/crop/scale pipeline settings
    pub transcode: TranscodeConfig,

    /// Overlay-to-animated-image pipeline settings
    pub overlay: OverlayConfig,

    /// General application settings
    pub general: GeneralConfig,
}

/// Trim/crop/scale pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Length of the longer output side in pixels
    pub target_longest_side: u32,

    /// Frame-rate cap used when the caller does not pass one
    pub default_max_fps: u32,

    /// Encoder bitrate in bits per second
    pub bitrate: usize,

    /// Seconds between keyframes
    pub keyframe_interval_secs: u32,

    /// Preferred encoder name, falls back to any H.264 encoder
    pub codec: String,

    /// Bounded wait for a decoded texture before skipping the frame
    pub frame_wait_timeout_ms: u64,

    /// Poll interval for decoder and encoder dequeue calls
    pub dequeue_timeout_ms: u64,
}

/// Overlay pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Side of the square output canvas in pixels
    pub output_size: u32,

    /// Frame-rate cap used when the caller does not pass one
    pub default_max_fps: u32,

    pub frame_wait_timeout_ms: u64,

    pub dequeue_timeout_ms: u64,
}

/// General application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Frame rate assumed when the source carries no frame-rate metadata
    pub fallback_frame_rate: u32,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            target_longest_side: 512,
            default_max_fps: 24,
            bitrate: 6_000_000,
            keyframe_interval_secs: 1,
            codec: "libx264".to_string(),
            frame_wait_timeout_ms: 2000,
            dequeue_timeout_ms: 10,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            output_size: 512,
            default_max_fps: 30,
            frame_wait_timeout_ms: 5000,
            dequeue_timeout_ms: 10,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            fallback_frame_rate: 30,
        }
    }
}

impl TranscodeConfig {
    pub fn frame_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_wait_timeout_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }
}

impl OverlayConfig {
    pub fn frame_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_wait_timeout_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. System config file (/etc/sticker-transcoder/config.toml on Linux)
    /// 3. User config file (~/.config/sticker-transcoder/config.toml on Linux)
    /// 4. Environment variables (STICKER_TRANSCODER_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config = Self::read_file(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config = Self::read_file(&user_path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from an explicit file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to user config file
    pub fn save(&self) -> Result<()> {
        let path = Self::user_config_path()
            .ok_or_else(|| TranscodeError::Config("Cannot determine user config path".to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TranscodeError::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let toml = toml::to_string_pretty(self)
            .map_err(|e| TranscodeError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, toml)
            .map_err(|e| TranscodeError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Parse a TOML file; missing keys keep their defaults
    fn read_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TranscodeError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| TranscodeError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parse("STICKER_TRANSCODER_TARGET_SIZE")? {
            self.transcode.target_longest_side = v;
        }

        if let Some(v) = env_parse("STICKER_TRANSCODER_MAX_FPS")? {
            self.transcode.default_max_fps = v;
        }

        if let Some(v) = env_parse("STICKER_TRANSCODER_BITRATE")? {
            self.transcode.bitrate = v;
        }

        if let Ok(codec) = std::env::var("STICKER_TRANSCODER_CODEC") {
            self.transcode.codec = codec;
        }

        if let Some(v) = env_parse("STICKER_TRANSCODER_OVERLAY_MAX_FPS")? {
            self.overlay.default_max_fps = v;
        }

        if let Ok(log_level) = std::env::var("STICKER_TRANSCODER_LOG_LEVEL") {
            self.general.log_level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.transcode.target_longest_side < 2 || self.overlay.output_size < 2 {
            return Err(TranscodeError::Config("Output dimensions must be at least 2 pixels".to_string()));
        }

        if self.transcode.default_max_fps == 0 || self.overlay.default_max_fps == 0 {
            return Err(TranscodeError::Config("Frame-rate caps must be non-zero".to_string()));
        }

        if self.general.fallback_frame_rate == 0 {
            return Err(TranscodeError::Config("Fallback frame rate must be non-zero".to_string()));
        }

        if self.transcode.bitrate == 0 || self.transcode.keyframe_interval_secs == 0 {
            return Err(TranscodeError::Config("Bitrate and keyframe interval must be non-zero".to_string()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(TranscodeError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level,
                valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return Some(PathBuf::from("/etc/sticker-transcoder/config.toml"));

        #[cfg(target_os = "windows")]
        return std::env::var("PROGRAMDATA").ok()
            .map(|p| PathBuf::from(p).join("StickerTranscoder").join("config.toml"));

        #[cfg(target_os = "macos")]
        return Some(PathBuf::from("/Library/Application Support/StickerTranscoder/config.toml"));

        #[allow(unreachable_code)]
        None
    }

    /// Get user config file path
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("sticker-transcoder").join("config.toml"))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| TranscodeError::Config(format!("Invalid {}", key))),
        Err(_) => Ok(None),
    }
}
