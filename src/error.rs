//! Error types for talkback.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TalkbackError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Network errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Malformed service response: {message}")]
    Parse { message: String },

    #[error("Upload failed: {message}")]
    Upload { message: String },

    // Buffer errors
    #[error("Buffer full at {capacity} bytes")]
    BufferFull { capacity: usize },

    // Audio device errors
    #[error("Audio sink write failed: {message}")]
    SinkWrite { message: String },

    #[error("Audio source read failed: {message}")]
    SourceRead { message: String },

    #[error("Audio format mismatch: expected {expected}, got {actual}")]
    AudioFormatMismatch { expected: String, actual: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl TalkbackError {
    /// Returns true for faults worth retrying with backoff (network hiccups, busy device).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TalkbackError::Transport { .. }
                | TalkbackError::HttpStatus { .. }
                | TalkbackError::Upload { .. }
                | TalkbackError::SinkWrite { .. }
                | TalkbackError::SourceRead { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TalkbackError>;
