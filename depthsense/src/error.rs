//! Error types for the depth-sensor session layer

use thiserror::Error;

/// Result type alias for the sensor library
pub type Result<T> = std::result::Result<T, SensorError>;

/// Errors that can occur while opening or running a sensor session
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Stream stalled: no new {stream} frame for {idle_secs:.1}s")]
    StreamStalled { stream: String, idle_secs: f64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Other error: {0}")]
    Other(String),
}

impl SensorError {
    pub fn device_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::DeviceUnavailable(msg.into())
    }

    pub fn stalled<S: Into<String>>(stream: S, idle_secs: f64) -> Self {
        Self::StreamStalled {
            stream: stream.into(),
            idle_secs,
        }
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the caller may retry with another backend or later
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_))
    }
}
