//! Error types for the tutor

use thiserror::Error;

use crate::agent::GenerationError;
use crate::voice::{CaptureError, PlaybackError};

/// Result type alias for tutor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tutor
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation not valid in the current call state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No speech capture available on this host
    #[error("speech capture is not supported on this host")]
    CaptureUnsupported,

    /// Capture source fault
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Turn generator fault
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Playback sink fault
    #[error("playback error: {0}")]
    Playback(#[from] PlaybackError),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
