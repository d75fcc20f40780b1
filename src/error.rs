//! Error types for scribed.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribedError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Session resource caps
    #[error("Ingestion cap exceeded: {message}")]
    ResourceExceeded { message: String },

    // External decode/recognize process errors (transient, per tick)
    #[error("Decode failed: {diagnostic}")]
    DecodeFailed { diagnostic: String },

    #[error("Recognition failed: {diagnostic}")]
    RecognitionFailed { diagnostic: String },

    // Segment store errors
    #[error("Segment store used after destroy")]
    StoreClosed,

    // Connection-level failures (session fatal)
    #[error("Transport error: {message}")]
    Transport { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl ScribedError {
    /// True for per-tick failures the scheduler recovers from by skipping
    /// the tick; everything else ends the session.
    pub fn is_tick_recoverable(&self) -> bool {
        matches!(
            self,
            ScribedError::DecodeFailed { .. } | ScribedError::RecognitionFailed { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ScribedError>;
