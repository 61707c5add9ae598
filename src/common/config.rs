use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::error::{AttendanceError, Result};
use crate::core::CaptureMode;

const CONFIG_FILE_NAME: &str = "attendance.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub camera: CameraConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub warmup_frames: u32,
    pub warmup_delay_ms: u64,
    /// JPEG quality used when freezing a frame (1-100).
    pub jpeg_quality: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            warmup_frames: 2,
            warmup_delay_ms: 50,
            jpeg_quality: 92,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub countdown_seconds: u32,
    pub tick_interval_ms: u64,
    pub default_mode: CaptureMode,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            countdown_seconds: 3,
            tick_interval_ms: 1000,
            default_mode: CaptureMode::Match,
        }
    }
}

impl CaptureConfig {
    pub fn countdown_ticks(&self) -> NonZeroU32 {
        NonZeroU32::new(self.countdown_seconds).unwrap_or(NonZeroU32::MIN)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Config {
    /// Loads the config from `path` if given, otherwise from the per-user
    /// config directory when a file exists there. Falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_path(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "faceattendance", "FaceAttendance")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AttendanceError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| AttendanceError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Validate service endpoint
        let url = reqwest::Url::parse(&self.service.base_url).map_err(|e| {
            AttendanceError::Config(format!(
                "Service base_url is not a valid URL ({}): {}",
                self.service.base_url, e
            ))
        })?;
        if url.cannot_be_a_base() {
            return Err(AttendanceError::Config(format!(
                "Service base_url cannot be used as a base: {}",
                self.service.base_url
            )));
        }
        if self.service.timeout_seconds < 1 || self.service.timeout_seconds > 300 {
            return Err(AttendanceError::Config(format!(
                "Service timeout must be between 1 and 300 seconds, got {}",
                self.service.timeout_seconds
            )));
        }

        // Validate camera dimensions
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(AttendanceError::Config(format!(
                "Camera width must be between 1 and 4096, got {}",
                self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(AttendanceError::Config(format!(
                "Camera height must be between 1 and 4096, got {}",
                self.camera.height
            )));
        }
        if self.camera.jpeg_quality == 0 || self.camera.jpeg_quality > 100 {
            return Err(AttendanceError::Config(format!(
                "JPEG quality must be between 1 and 100, got {}",
                self.camera.jpeg_quality
            )));
        }

        // Validate countdown
        if self.capture.countdown_seconds < 1 || self.capture.countdown_seconds > 30 {
            return Err(AttendanceError::Config(format!(
                "Countdown must be between 1 and 30 seconds, got {}",
                self.capture.countdown_seconds
            )));
        }
        if self.capture.tick_interval_ms < 10 || self.capture.tick_interval_ms > 10_000 {
            return Err(AttendanceError::Config(format!(
                "Tick interval must be between 10 and 10000 ms, got {}",
                self.capture.tick_interval_ms
            )));
        }

        Ok(())
    }
}
