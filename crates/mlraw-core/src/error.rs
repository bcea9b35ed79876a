//! Error types for MlRaw.

use thiserror::Error;

/// Main error type for container access and frame decoding.
#[derive(Error, Debug)]
pub enum RawError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame {index} out of range (0..{count})")]
    OutOfRange { index: usize, count: usize },

    #[error("Truncated data: expected {expected} bytes, {available} available")]
    Truncated { expected: usize, available: usize },

    #[error("Corrupt container: {0}")]
    Corrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sidecar unreadable: {0}")]
    SidecarUnreadable(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RawError {
    /// Shorthand for a [`RawError::Corrupt`] error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Whether playback should continue with a synthesized black frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::NotFound(_) | Self::Corrupt(_)
        )
    }
}

/// Result type alias for MlRaw operations.
pub type Result<T> = std::result::Result<T, RawError>;
