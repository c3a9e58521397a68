//! Core error types for walktrace-core.
//!
//! Only fatal sensor conditions and persistence failures are surfaced to the
//! user. Rejected pedometer deltas and location gaps are not errors at all:
//! they are reported as [`crate::Event`]s and logged, and the numbers simply
//! stop advancing.

use std::path::PathBuf;
use thiserror::Error;

use crate::sensors::SensorKind;
use crate::session::SessionState;

/// Core error type for walktrace-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A required sensor is missing; tracking cannot start.
    #[error("{sensor} sensor is not available on this device")]
    SensorUnavailable { sensor: SensorKind },

    /// A sensor stopped delivering data mid-session.
    #[error("{sensor} sensor failed: {message}")]
    SensorFailed { sensor: SensorKind, message: String },

    /// The completed session could not be stored.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Command issued in a state that does not accept it.
    #[error("Cannot {action} while session is {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },

    /// The session worker is gone.
    #[error("Session service has shut down")]
    ServiceClosed,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by a [`crate::store::SessionStore`].
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to save session {session_id}: {message}")]
    SaveFailed { session_id: String, message: String },

    #[error("Session store is unavailable: {0}")]
    Unavailable(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown dot-path key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Could not resolve the configuration directory
    #[error("Cannot determine configuration directory: {0}")]
    NoDataDir(String),
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
