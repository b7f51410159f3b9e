use std::time::Duration;
use thiserror::Error;

/// Main error type for media operations
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Timeout: {operation} not completed within {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Protocol setup error: {0}")]
    ProtocolSetup(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Concurrency error: {0}")]
    Concurrency(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MediaError {
    /// Error for an operation attempted without a live connection
    pub fn not_connected(what: impl Into<String>) -> Self {
        MediaError::Connection(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            what.into(),
        ))
    }

    /// Error for a peer that closed the stream
    pub fn closed_by_peer(what: impl Into<String>) -> Self {
        MediaError::Connection(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            what.into(),
        ))
    }

    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        MediaError::Timeout { operation, after }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MediaError::Timeout { .. })
    }
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;
