//! Kiosk settings
//!
//! Layered with the `config` crate: `config/kiosk.toml` first, then
//! `KIOSK__*` environment variables (e.g. `KIOSK__SERVER__BIND=0.0.0.0:9000`).

use crate::recorder::RecorderSettings;
use camera_capture::CameraConfig;
use config::{Config, Environment, File, FileFormat};
use instruction::{InstructionError, PresenceConfig, Protocol, ProtocolConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Settings errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid settings: {0}")]
    Invalid(String),

    #[error("Invalid protocol: {0}")]
    Protocol(#[from] InstructionError),
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Maximum level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Status server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

/// Session archive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Finished sessions that may queue for the writer
    #[serde(default = "default_archive_capacity")]
    pub archive_capacity: usize,
}

fn default_database_url() -> String {
    "sqlite://data/kiosk.db".to_string()
}

fn default_archive_capacity() -> usize {
    storage::DEFAULT_ARCHIVE_CAPACITY
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            archive_capacity: default_archive_capacity(),
        }
    }
}

/// Analysis loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Frame batches sampled per second
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Batches waiting for analysis before the oldest is dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Longest frame side used for the presence check
    #[serde(default = "default_presence_max_side")]
    pub presence_max_side: u32,
}

fn default_fps() -> f64 {
    10.0
}

fn default_queue_capacity() -> usize {
    ring_buffer::DEFAULT_CAPACITY
}

fn default_presence_max_side() -> u32 {
    attendant::PresenceProbe::DEFAULT_MAX_SIDE
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            queue_capacity: default_queue_capacity(),
            presence_max_side: default_presence_max_side(),
        }
    }
}

/// Complete kiosk settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Booth cameras; the first one is the presence camera
    #[serde(default = "default_cameras")]
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub recorder: RecorderSettings,
}

fn default_cameras() -> Vec<CameraConfig> {
    vec![CameraConfig::default()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log: LogSettings::default(),
            server: ServerSettings::default(),
            database: DatabaseSettings::default(),
            cameras: default_cameras(),
            analysis: AnalysisSettings::default(),
            presence: PresenceConfig::default(),
            protocol: ProtocolConfig::default(),
            recorder: RecorderSettings::default(),
        }
    }
}

impl Settings {
    /// Load from a TOML file (optional) plus `KIOSK__*` environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("KIOSK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse TOML text without environment overrides
    pub fn from_toml_str(toml: &str) -> Result<Self, SettingsError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.cameras.is_empty() {
            return Err(SettingsError::Invalid("at least one camera is required".into()));
        }
        if self.cameras.len() > u8::MAX as usize {
            return Err(SettingsError::Invalid("too many cameras".into()));
        }
        if !self.analysis.fps.is_finite() || self.analysis.fps <= 0.0 {
            return Err(SettingsError::Invalid(format!(
                "analysis.fps must be > 0, got {}",
                self.analysis.fps
            )));
        }
        if self.analysis_period().is_zero() {
            return Err(SettingsError::Invalid(format!(
                "analysis.fps {} is too high for a sampling timer",
                self.analysis.fps
            )));
        }
        if self.analysis.queue_capacity == 0 {
            return Err(SettingsError::Invalid("analysis.queue_capacity must be > 0".into()));
        }
        if self.recorder.segment_seconds == 0 {
            return Err(SettingsError::Invalid("recorder.segment_seconds must be > 0".into()));
        }
        tracing::Level::from_str(&self.log.level)
            .map_err(|_| SettingsError::Invalid(format!("unknown log level '{}'", self.log.level)))?;

        self.presence.validate()?;
        self.protocol()?;
        Ok(())
    }

    /// Validated protocol table for the configured cameras
    pub fn protocol(&self) -> Result<Protocol, SettingsError> {
        Ok(Protocol::new(self.protocol.clone(), self.cameras.len())?)
    }

    /// Interval between sampled frame batches
    pub fn analysis_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.analysis.fps)
    }
}
