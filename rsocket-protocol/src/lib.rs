//! # rsocket-protocol
//!
//! Wire protocol implementation for RSocket.
//!
//! This crate provides:
//! - The frame model (setup, keepalive, request, payload, error, ...)
//! - Binary encoding and decoding of individual frames
//! - A 24-bit length-prefixed codec for byte-stream transports
//! - Error codes and protocol constants

pub mod codec;
pub mod error;
pub mod frame;
pub mod payload;

pub use codec::{Decoder, Encoder};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{
    ErrorFrame, Frame, FrameFlags, FrameType, KeepAliveFrame, LeaseFrame, RequestFrame,
    SetupFrame, FRAME_HEADER_SIZE,
};
pub use payload::Payload;

/// Major protocol version supported by this implementation.
pub const MAJOR_VERSION: u16 = 1;

/// Minor protocol version supported by this implementation.
pub const MINOR_VERSION: u16 = 0;

/// Default TCP port for RSocket servers.
pub const DEFAULT_PORT: u16 = 7878;

/// Largest value representable by a 24-bit length field.
pub const MAX_FRAME_SIZE: usize = 0xFF_FFFF;

/// Request count meaning "unbounded demand".
pub const MAX_REQUEST_N: u32 = 0x7FFF_FFFF;

/// Mask selecting the 31 significant bits of a stream id.
pub const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;
