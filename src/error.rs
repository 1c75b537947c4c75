//! Error types for voxcore

use thiserror::Error;

/// Result type alias for voxcore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the speech I/O core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone or speaker driver failure; fatal to the current cycle
    #[error("hardware error: {0}")]
    Hardware(String),

    /// Transport-level failure (disconnect, send failure); user-retriable
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected protocol message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bounded wait expired (pre-buffer, stalled stream, processing)
    #[error("timeout: {0}")]
    Timeout(String),

    /// Resource exhaustion (queue or buffer allocation)
    #[error("resource error: {0}")]
    Resource(String),

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
}
