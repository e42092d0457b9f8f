//! # Error Types Module
//!
//! Centralized error handling for the monitor.
//! Each layer gets its own error type so callers can match on the failures
//! they are able to recover from.
//!
//! ## Error Types
//! - `DecodeError`: malformed Heart Rate Measurement payloads
//! - `ConnectionError`: establishing or keeping the BLE link
//! - `ShutdownTimedOut`: the session did not stop within the grace period
//! - `ConfigError`: configuration file I/O and parsing errors
//! - `ScanError`: Bluetooth device scanning errors
//!
//! ## Recovery
//! - `DecodeError` drops the sample, the connection stays up
//! - `ConnectionError` is absorbed by the session's retry policy
//! - `ShutdownTimedOut` is informational, the caller decides whether to exit anyway

use std::fmt;
use std::time::Duration;

/// A notification payload was shorter than its flags byte requires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Truncated { required: usize, actual: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { required, actual } => {
                write!(
                    f,
                    "Truncated heart rate measurement: need {} bytes, got {}",
                    required, actual
                )
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur during connection management
#[derive(Debug, Clone)]
pub enum ConnectionError {
    /// Failed to create Tokio runtime
    RuntimeCreation(String),
    /// Failed to spawn the session thread
    ThreadSpawn(String),
    /// Bluetooth adapter not found or not available
    NoAdapter,
    /// The device has not been seen by the adapter (yet)
    DeviceNotFound(String),
    /// The device does not expose the requested notify characteristic
    CharacteristicNotFound { device_id: String, characteristic: String },
    /// Failed to connect to specific device
    DeviceConnection { device_id: String, reason: String },
    /// The connection attempt did not finish in time
    Timeout { device_id: String, after: Duration },
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::RuntimeCreation(msg) => {
                write!(f, "Failed to create async runtime: {}", msg)
            }
            ConnectionError::ThreadSpawn(msg) => {
                write!(f, "Failed to spawn session thread: {}", msg)
            }
            ConnectionError::NoAdapter => {
                write!(f, "No Bluetooth adapter found. Please ensure Bluetooth is enabled.")
            }
            ConnectionError::DeviceNotFound(device_id) => {
                write!(f, "Device {} not found", device_id)
            }
            ConnectionError::CharacteristicNotFound { device_id, characteristic } => {
                write!(
                    f,
                    "Device {} has no notify characteristic {}",
                    device_id, characteristic
                )
            }
            ConnectionError::DeviceConnection { device_id, reason } => {
                write!(f, "Failed to connect to device {}: {}", device_id, reason)
            }
            ConnectionError::Timeout { device_id, after } => {
                write!(
                    f,
                    "Connecting to device {} timed out after {:?}",
                    device_id, after
                )
            }
        }
    }
}

impl std::error::Error for ConnectionError {}

/// The session did not reach `Stopped` within the shutdown grace period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTimedOut {
    pub waited: Duration,
}

impl fmt::Display for ShutdownTimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session did not stop within {:?}", self.waited)
    }
}

impl std::error::Error for ShutdownTimedOut {}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
    /// The configured characteristic is not a UUID
    InvalidCharacteristic(uuid::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
            ConfigError::InvalidCharacteristic(e) => {
                write!(f, "Invalid characteristic UUID: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
            ConfigError::InvalidCharacteristic(e) => Some(e),
        }
    }
}

/// Errors that can occur during device scanning
#[derive(Debug, Clone)]
pub enum ScanError {
    /// Bluetooth manager initialization failed
    ManagerInit(String),
    /// No Bluetooth adapters available
    NoAdapters,
    /// Scan operation failed
    ScanFailed(String),
    /// Connecting to a device to list its characteristics failed
    Inspect { device_id: String, reason: String },
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::ManagerInit(msg) => {
                write!(f, "Failed to initialize Bluetooth manager: {}", msg)
            }
            ScanError::NoAdapters => {
                write!(f, "No Bluetooth adapters found")
            }
            ScanError::ScanFailed(msg) => {
                write!(f, "Scan operation failed: {}", msg)
            }
            ScanError::Inspect { device_id, reason } => {
                write!(f, "Failed to inspect {}: {}", device_id, reason)
            }
        }
    }
}

impl std::error::Error for ScanError {}
