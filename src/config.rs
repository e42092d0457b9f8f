//! # Configuration Management Module
//!
//! Persistent application settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `device_address`: Sensor to connect to when none is given on the command line
//! - `characteristic_uuid`: Notify characteristic carrying heart rate measurements
//! - `retry_backoff_secs`: Wait after a failed connection attempt
//! - `liveness_interval_ms`: How often a connected link is checked for loss
//! - `connect_timeout_secs`: Upper bound for a single connection attempt
//! - `shutdown_timeout_secs`: Grace period for the session to stop on exit
//! - `poll_interval_ms`: How often the display drains new samples
//! - `scan_duration_secs`: Scan window when looking for a sensor
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/pulse-monitor/config.toml
//! - Linux: ~/.config/pulse-monitor/config.toml
//! - Windows: %APPDATA%\pulse-monitor\config.toml

use crate::error::ConfigError;
use crate::measurement::HEART_RATE_MEASUREMENT_UUID;
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_address: Option<String>,
    pub characteristic_uuid: String,
    pub retry_backoff_secs: u64,
    pub liveness_interval_ms: u64,
    pub connect_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub scan_duration_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_address: None,
            characteristic_uuid: HEART_RATE_MEASUREMENT_UUID.to_string(),
            retry_backoff_secs: 5,
            liveness_interval_ms: 1000,
            connect_timeout_secs: 30,
            shutdown_timeout_secs: 3,
            poll_interval_ms: 500,
            scan_duration_secs: 5,
        }
    }
}

impl Config {
    /// Get the path to the config file
    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pulse-monitor")
            .join("config.toml")
    }

    /// Load config from file, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(ConfigError::ParseFailed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    pub fn characteristic(&self) -> Result<Uuid, ConfigError> {
        Uuid::parse_str(self.characteristic_uuid.trim()).map_err(ConfigError::InvalidCharacteristic)
    }

    /// Timing knobs for the session manager
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
            liveness_interval: Duration::from_millis(self.liveness_interval_ms.max(1)),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }
}
