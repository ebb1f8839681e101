//! Error types for wakeline

use thiserror::Error;

/// Result type alias for wakeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in wakeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Shared stream misuse (writer contention, invalid rewind position)
    #[error("stream error: {0}")]
    Stream(String),

    /// Wake word detection error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Assistant transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Missing or unreadable credential material
    #[error("credentials error: {0}")]
    Credentials(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}
