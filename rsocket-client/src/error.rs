//! Client error types.

use rsocket_core::RSocketError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    RSocket(#[from] RSocketError),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("connect timeout")]
    Timeout,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns whether retrying on a fresh connection may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::RSocket(err) => {
                err.is_connection_error() || matches!(err, RSocketError::Rejected(_))
            }
            _ => false,
        }
    }
}
