//! Error types for the messaging core.

use thiserror::Error;

/// Main error type for the messaging core.
#[derive(Error, Debug)]
pub enum Error {
    /// Identity or signature rejected during the handshake
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network unreachable, handshake incomplete or send failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Message content rejected before anything was sent
    #[error("invalid message: {0}")]
    Validation(String),

    /// Operation attempted before the client reached the ready state
    #[error("client is not ready")]
    NotReady,

    /// Identity error
    #[error("identity error: {0}")]
    Identity(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
