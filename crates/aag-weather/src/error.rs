//! Error types for the AAG reader.

use thiserror::Error;

/// Errors raised while talking to or decoding data from the CloudWatcher.
///
/// None of these is fatal to the polling loop. Only
/// [`ConfigError`](crate::config::ConfigError) stops the process.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AagError {
    /// Serial device missing, unplugged or refusing to open
    #[error("Connection error: {0}")]
    Connection(String),

    /// No complete response arrived within the read window
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Frame bytes do not follow the block layout
    #[error("Decode error: {0}")]
    Decode(String),

    /// Decoded value outside its physical range
    #[error("Validation error: {field} = {value} outside [{min}, {max}]")]
    Validation {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl AagError {
    /// Short machine-readable kind, used in status responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AagError::Connection(_) => "connection",
            AagError::Timeout(_) => "timeout",
            AagError::Decode(_) => "decode",
            AagError::Validation { .. } => "validation",
        }
    }

    /// Whether the next attempt should wait with exponential backoff instead
    /// of the regular poll interval.
    pub fn needs_backoff(&self) -> bool {
        matches!(self, AagError::Connection(_))
    }
}

impl From<serialport::Error> for AagError {
    fn from(err: serialport::Error) -> Self {
        AagError::Connection(err.to_string())
    }
}

impl From<std::io::Error> for AagError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                AagError::Timeout(err.to_string())
            }
            _ => AagError::Connection(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AagError>;
