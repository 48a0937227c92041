//! Error types for the stream client.

use thiserror::Error;

/// Main error type for stream client operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Inbound frame was not a well-formed envelope.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Envelope was well-formed but its `type` is not one we handle.
    #[error("Protocol error: unrecognized message type {0:?}")]
    Protocol(String),

    /// Event is missing a topic or timestamp.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Reconnect attempts exhausted. Not retryable.
    #[error("Gave up after {attempts} reconnect attempts")]
    Fatal { attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Client has been shut down")]
    Shutdown,
}

impl StreamError {
    /// Whether the connection layer may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamError::Connection(_) | StreamError::Transport(_))
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(e: serde_json::Error) -> Self {
        StreamError::Serialization(e.to_string())
    }
}

/// Result type for stream client operations.
pub type Result<T> = std::result::Result<T, StreamError>;
