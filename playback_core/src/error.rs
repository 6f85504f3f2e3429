//! Unified error handling for playback
//!
//! This module provides a centralized error type for the replay engine,
//! ensuring consistent error handling across clock, loader and emitters.

use thiserror::Error;

/// Main error type for playback operations
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single recording file could not be parsed. Non-fatal to the session.
    #[error("Failed to load channel '{channel}': {reason}")]
    LoadFailure { channel: String, reason: String },

    /// No channel of a load request was usable
    #[error("Session load failed: {0}")]
    SessionLoadFailure(String),

    /// Playback rate must be strictly positive
    #[error("Invalid playback rate: {0}")]
    InvalidRate(f64),

    /// Malformed jump or region specification
    #[error("Invalid time specification: '{0}'")]
    InvalidTimeSpec(String),

    /// Time lies outside of the loaded recording span
    #[error("Time {when:.3} outside of recording span [{min:.3}, {max:.3}]")]
    OutOfRange { when: f64, min: f64, max: f64 },

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Resource not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Parse errors
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Generic internal errors (use sparingly)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using PlaybackError
pub type PlaybackResult<T> = Result<T, PlaybackError>;

impl From<serde_json::Error> for PlaybackError {
    fn from(err: serde_json::Error) -> Self {
        PlaybackError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PlaybackError {
    fn from(err: toml::de::Error) -> Self {
        PlaybackError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for PlaybackError {
    fn from(err: toml::ser::Error) -> Self {
        PlaybackError::Serialization(format!("TOML serialization error: {}", err))
    }
}

impl From<bincode::Error> for PlaybackError {
    fn from(err: bincode::Error) -> Self {
        PlaybackError::Serialization(format!("bincode error: {}", err))
    }
}

impl From<std::num::ParseFloatError> for PlaybackError {
    fn from(err: std::num::ParseFloatError) -> Self {
        PlaybackError::ParseError(format!("Float parse error: {}", err))
    }
}

// Helper methods
impl PlaybackError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        PlaybackError::Config(msg.into())
    }

    /// Create a per-channel load failure
    pub fn load_failure<S: Into<String>, T: Into<String>>(channel: S, reason: T) -> Self {
        PlaybackError::LoadFailure {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        PlaybackError::NotFound(resource.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        PlaybackError::InvalidInput(msg.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlaybackError::NotFound(_))
    }

    /// Check if this error rejected a user command without touching any state
    pub fn is_rejected_command(&self) -> bool {
        matches!(
            self,
            PlaybackError::InvalidRate(_)
                | PlaybackError::InvalidTimeSpec(_)
                | PlaybackError::OutOfRange { .. }
        )
    }
}
