//! Server error types.

use crate::config::ConfigError;
use rsocket_core::RSocketError;
use rsocket_protocol::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    RSocket(#[from] RSocketError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no SETUP received within {0:?}")]
    SetupTimeout(Duration),

    #[error("setup rejected: {0}")]
    SetupRejected(RSocketError),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Code reported to the peer when this error ends a connection.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ServerError::RSocket(e) | ServerError::SetupRejected(e) => e.error_code(),
            ServerError::SetupTimeout(_) => ErrorCode::InvalidSetup,
            ServerError::ShuttingDown => ErrorCode::ConnectionClose,
            ServerError::Io(_) | ServerError::Config(_) => ErrorCode::ConnectionError,
        }
    }
}
