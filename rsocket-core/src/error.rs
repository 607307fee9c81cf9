//! Core error types.

use rsocket_protocol::{ErrorCode, ProtocolError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to requesters, responders and connection owners.
///
/// The type is `Clone` so that one terminal cause can fail every live
/// stream of a connection.
#[derive(Debug, Clone, Error)]
pub enum RSocketError {
    #[error("application error: {0}")]
    ApplicationError(String),

    #[error("rejected: {0}")]
    Rejected(String),

    /// The peer reported the stream as canceled.
    #[error("canceled: {0}")]
    Canceled(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("custom error {code:#x}: {message}")]
    Custom { code: u32, message: String },

    #[error("invalid setup: {0}")]
    InvalidSetup(String),

    #[error("unsupported setup: {0}")]
    UnsupportedSetup(String),

    #[error("rejected setup: {0}")]
    RejectedSetup(String),

    #[error("rejected resume: {0}")]
    RejectedResume(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("connection closed by peer: {0}")]
    ConnectionClose(String),

    #[error("connection closed")]
    ConnectionClosed,

    /// The request was cancelled locally.
    #[error("request cancelled")]
    Cancelled,

    #[error("no keepalive received within {0:?}")]
    KeepAliveTimeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(Arc<std::io::Error>),
}

impl RSocketError {
    /// Shorthand for an application error with the given message.
    pub fn application(message: impl Into<String>) -> Self {
        RSocketError::ApplicationError(message.into())
    }

    /// Builds the error described by an ERROR frame.
    pub fn from_error_frame(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::InvalidSetup => RSocketError::InvalidSetup(message),
            ErrorCode::UnsupportedSetup => RSocketError::UnsupportedSetup(message),
            ErrorCode::RejectedSetup => RSocketError::RejectedSetup(message),
            ErrorCode::RejectedResume => RSocketError::RejectedResume(message),
            ErrorCode::ConnectionError => RSocketError::ConnectionError(message),
            ErrorCode::ConnectionClose => RSocketError::ConnectionClose(message),
            ErrorCode::ApplicationError => RSocketError::ApplicationError(message),
            ErrorCode::Rejected => RSocketError::Rejected(message),
            ErrorCode::Canceled => RSocketError::Canceled(message),
            ErrorCode::Invalid => RSocketError::Invalid(message),
            ErrorCode::Custom(code) => RSocketError::Custom { code, message },
        }
    }

    /// Returns the code used when this error is sent in an ERROR frame.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RSocketError::ApplicationError(_) => ErrorCode::ApplicationError,
            RSocketError::Rejected(_) => ErrorCode::Rejected,
            RSocketError::Canceled(_) | RSocketError::Cancelled => ErrorCode::Canceled,
            RSocketError::Invalid(_) => ErrorCode::Invalid,
            RSocketError::Custom { code, .. } => ErrorCode::Custom(*code),
            RSocketError::InvalidSetup(_) => ErrorCode::InvalidSetup,
            RSocketError::UnsupportedSetup(_) => ErrorCode::UnsupportedSetup,
            RSocketError::RejectedSetup(_) => ErrorCode::RejectedSetup,
            RSocketError::RejectedResume(_) => ErrorCode::RejectedResume,
            RSocketError::ConnectionClose(_) | RSocketError::ConnectionClosed => {
                ErrorCode::ConnectionClose
            }
            RSocketError::ConnectionError(_)
            | RSocketError::KeepAliveTimeout(_)
            | RSocketError::Protocol(_)
            | RSocketError::Transport(_) => ErrorCode::ConnectionError,
        }
    }

    /// Returns the message carried in an ERROR frame for this error.
    pub fn message(&self) -> String {
        match self {
            RSocketError::ApplicationError(message)
            | RSocketError::Rejected(message)
            | RSocketError::Canceled(message)
            | RSocketError::Invalid(message)
            | RSocketError::Custom { message, .. }
            | RSocketError::InvalidSetup(message)
            | RSocketError::UnsupportedSetup(message)
            | RSocketError::RejectedSetup(message)
            | RSocketError::RejectedResume(message)
            | RSocketError::ConnectionError(message)
            | RSocketError::ConnectionClose(message)
            | RSocketError::Protocol(message) => message.clone(),
            other => other.to_string(),
        }
    }

    /// Returns whether this error means the whole connection is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            RSocketError::InvalidSetup(_)
                | RSocketError::UnsupportedSetup(_)
                | RSocketError::RejectedSetup(_)
                | RSocketError::RejectedResume(_)
                | RSocketError::ConnectionError(_)
                | RSocketError::ConnectionClose(_)
                | RSocketError::ConnectionClosed
                | RSocketError::KeepAliveTimeout(_)
                | RSocketError::Protocol(_)
                | RSocketError::Transport(_)
        )
    }
}

impl From<std::io::Error> for RSocketError {
    fn from(err: std::io::Error) -> Self {
        RSocketError::Transport(Arc::new(err))
    }
}

impl From<ProtocolError> for RSocketError {
    fn from(err: ProtocolError) -> Self {
        RSocketError::Protocol(err.to_string())
    }
}
