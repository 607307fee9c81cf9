//! Protocol error types and error codes.

use crate::frame::FrameType;
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown frame type: {0:#x}")]
    UnknownFrameType(u8),

    #[error("unsupported frame type: {frame_type:?}")]
    UnsupportedFrameType {
        frame_type: FrameType,
        /// The sender marked the frame as safe to ignore.
        ignorable: bool,
    },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("incomplete frame: need {needed} more bytes")]
    IncompleteFrame { needed: usize },

    #[error("invalid stream id {stream_id} for {frame_type:?}")]
    InvalidStreamId {
        stream_id: u32,
        frame_type: FrameType,
    },

    #[error("invalid frame flags: {0:#x}")]
    InvalidFlags(u16),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("invalid mime type: {0}")]
    InvalidMimeType(String),
}

impl ProtocolError {
    /// Whether the receiver may drop the offending frame and carry on.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnsupportedFrameType {
                ignorable: true,
                ..
            }
        )
    }
}

/// Error codes carried by ERROR frames.
///
/// These codes are part of the protocol contract and must remain stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Connection setup errors (stream 0 only)
    InvalidSetup,
    UnsupportedSetup,
    RejectedSetup,
    RejectedResume,

    // Connection errors (stream 0 only)
    ConnectionError,
    ConnectionClose,

    // Stream errors
    ApplicationError,
    Rejected,
    Canceled,
    Invalid,

    /// Application-defined code in `0x301..=0xFFFFFFFE`.
    Custom(u32),
}

impl ErrorCode {
    pub const MIN_CUSTOM: u32 = 0x0000_0301;
    pub const MAX_CUSTOM: u32 = 0xFFFF_FFFE;

    /// Returns the numeric wire value.
    pub fn code(&self) -> u32 {
        match self {
            ErrorCode::InvalidSetup => 0x0000_0001,
            ErrorCode::UnsupportedSetup => 0x0000_0002,
            ErrorCode::RejectedSetup => 0x0000_0003,
            ErrorCode::RejectedResume => 0x0000_0004,
            ErrorCode::ConnectionError => 0x0000_0101,
            ErrorCode::ConnectionClose => 0x0000_0102,
            ErrorCode::ApplicationError => 0x0000_0201,
            ErrorCode::Rejected => 0x0000_0202,
            ErrorCode::Canceled => 0x0000_0203,
            ErrorCode::Invalid => 0x0000_0204,
            ErrorCode::Custom(code) => *code,
        }
    }

    /// Maps a wire value to an error code. Unrecognised values are kept as
    /// [`ErrorCode::Custom`] so they survive a round trip.
    pub fn from_code(code: u32) -> Self {
        match code {
            0x0000_0001 => ErrorCode::InvalidSetup,
            0x0000_0002 => ErrorCode::UnsupportedSetup,
            0x0000_0003 => ErrorCode::RejectedSetup,
            0x0000_0004 => ErrorCode::RejectedResume,
            0x0000_0101 => ErrorCode::ConnectionError,
            0x0000_0102 => ErrorCode::ConnectionClose,
            0x0000_0201 => ErrorCode::ApplicationError,
            0x0000_0202 => ErrorCode::Rejected,
            0x0000_0203 => ErrorCode::Canceled,
            0x0000_0204 => ErrorCode::Invalid,
            other => ErrorCode::Custom(other),
        }
    }

    /// Returns whether this code may only appear on stream 0.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidSetup
                | ErrorCode::UnsupportedSetup
                | ErrorCode::RejectedSetup
                | ErrorCode::RejectedResume
                | ErrorCode::ConnectionError
                | ErrorCode::ConnectionClose
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::InvalidSetup => write!(f, "INVALID_SETUP"),
            ErrorCode::UnsupportedSetup => write!(f, "UNSUPPORTED_SETUP"),
            ErrorCode::RejectedSetup => write!(f, "REJECTED_SETUP"),
            ErrorCode::RejectedResume => write!(f, "REJECTED_RESUME"),
            ErrorCode::ConnectionError => write!(f, "CONNECTION_ERROR"),
            ErrorCode::ConnectionClose => write!(f, "CONNECTION_CLOSE"),
            ErrorCode::ApplicationError => write!(f, "APPLICATION_ERROR"),
            ErrorCode::Rejected => write!(f, "REJECTED"),
            ErrorCode::Canceled => write!(f, "CANCELED"),
            ErrorCode::Invalid => write!(f, "INVALID"),
            ErrorCode::Custom(code) => write!(f, "CUSTOM({code:#x})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::InvalidSetup.code(), 0x001);
        assert_eq!(ErrorCode::RejectedResume.code(), 0x004);
        assert_eq!(ErrorCode::ConnectionError.code(), 0x101);
        assert_eq!(ErrorCode::ConnectionClose.code(), 0x102);
        assert_eq!(ErrorCode::ApplicationError.code(), 0x201);
        assert_eq!(ErrorCode::Invalid.code(), 0x204);
        assert_eq!(ErrorCode::Custom(0x301).code(), 0x301);
    }

    #[test]
    fn test_error_code_from_code() {
        for code in [
            ErrorCode::InvalidSetup,
            ErrorCode::UnsupportedSetup,
            ErrorCode::RejectedSetup,
            ErrorCode::RejectedResume,
            ErrorCode::ConnectionError,
            ErrorCode::ConnectionClose,
            ErrorCode::ApplicationError,
            ErrorCode::Rejected,
            ErrorCode::Canceled,
            ErrorCode::Invalid,
            ErrorCode::Custom(0x1234),
        ] {
            assert_eq!(ErrorCode::from_code(code.code()), code);
        }
        assert_eq!(ErrorCode::from_code(0x999), ErrorCode::Custom(0x999));
    }

    #[test]
    fn test_error_code_connection_level() {
        assert!(ErrorCode::InvalidSetup.is_connection_level());
        assert!(ErrorCode::ConnectionClose.is_connection_level());
        assert!(!ErrorCode::ApplicationError.is_connection_level());
        assert!(!ErrorCode::Canceled.is_connection_level());
        assert!(!ErrorCode::Custom(0x400).is_connection_level());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(format!("{}", ErrorCode::InvalidSetup), "INVALID_SETUP");
        assert_eq!(
            format!("{}", ErrorCode::ApplicationError),
            "APPLICATION_ERROR"
        );
        assert_eq!(format!("{}", ErrorCode::Canceled), "CANCELED");
        assert_eq!(format!("{}", ErrorCode::Custom(0x301)), "CUSTOM(0x301)");
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::UnknownFrameType(0x2A);
        assert!(err.to_string().contains("0x2a"));

        let err = ProtocolError::FrameTooLarge {
            size: 100,
            max: 50,
        };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::IncompleteFrame { needed: 10 };
        assert!(err.to_string().contains("10"));

        let err = ProtocolError::InvalidUtf8("error message");
        assert!(err.to_string().contains("UTF-8"));

        let err = ProtocolError::InvalidFlags(0xFF);
        let msg = err.to_string();
        assert!(msg.contains("ff") || msg.contains("FF"));
    }

    #[test]
    fn test_ignorable() {
        let err = ProtocolError::UnsupportedFrameType {
            frame_type: FrameType::Extension,
            ignorable: true,
        };
        assert!(err.is_ignorable());

        let err = ProtocolError::UnsupportedFrameType {
            frame_type: FrameType::Resume,
            ignorable: false,
        };
        assert!(!err.is_ignorable());
        assert!(!ProtocolError::UnknownFrameType(0x30).is_ignorable());
    }
}
