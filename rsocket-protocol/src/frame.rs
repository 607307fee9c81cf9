//! Binary frame format for RSocket.
//!
//! Every frame starts with a 6 byte header:
//!
//! ```text
//! +-----------------------------+-------------+--------------+
//! | 0 |      stream id          | frame type  |    flags     |
//! |1b |        31 bits          |   6 bits    |   10 bits    |
//! +-----------------------------+-------------+--------------+
//! | type specific fields | [metadata length (24 bits) | metadata] | data |
//! +--------------------------------------------------------------------+
//! ```
//!
//! Frames handled here are complete: the 24-bit length prefix used on
//! byte-stream transports is added and removed by [`crate::codec`].

use crate::error::{ErrorCode, ProtocolError};
use crate::payload::Payload;
use crate::{MAX_FRAME_SIZE, MAX_REQUEST_N, STREAM_ID_MASK};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;

/// Size of the fixed frame header in bytes (4 + 2 = 6).
pub const FRAME_HEADER_SIZE: usize = 6;

/// Size of a metadata length field.
const METADATA_LENGTH_SIZE: usize = 3;

/// Frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Setup = 0x01,
    Lease = 0x02,
    KeepAlive = 0x03,
    RequestResponse = 0x04,
    RequestFnf = 0x05,
    RequestStream = 0x06,
    RequestChannel = 0x07,
    RequestN = 0x08,
    Cancel = 0x09,
    Payload = 0x0A,
    Error = 0x0B,
    MetadataPush = 0x0C,
    Resume = 0x0D,
    ResumeOk = 0x0E,
    Extension = 0x3F,
}

impl FrameType {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x01 => FrameType::Setup,
            0x02 => FrameType::Lease,
            0x03 => FrameType::KeepAlive,
            0x04 => FrameType::RequestResponse,
            0x05 => FrameType::RequestFnf,
            0x06 => FrameType::RequestStream,
            0x07 => FrameType::RequestChannel,
            0x08 => FrameType::RequestN,
            0x09 => FrameType::Cancel,
            0x0A => FrameType::Payload,
            0x0B => FrameType::Error,
            0x0C => FrameType::MetadataPush,
            0x0D => FrameType::Resume,
            0x0E => FrameType::ResumeOk,
            0x3F => FrameType::Extension,
            other => return Err(ProtocolError::UnknownFrameType(other)),
        })
    }

    /// Returns true for the four frame types that start a new stream.
    pub fn is_request_type(&self) -> bool {
        matches!(
            self,
            FrameType::RequestFnf
                | FrameType::RequestResponse
                | FrameType::RequestStream
                | FrameType::RequestChannel
        )
    }

    /// Returns true if the frame body starts with an initial request count.
    pub fn has_initial_request(&self) -> bool {
        matches!(self, FrameType::RequestStream | FrameType::RequestChannel)
    }

    /// Returns true if frames of this type must use stream 0.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            FrameType::Setup
                | FrameType::Lease
                | FrameType::KeepAlive
                | FrameType::MetadataPush
                | FrameType::Resume
                | FrameType::ResumeOk
        )
    }
}

/// Frame flags bitfield (lower 10 bits of the type/flags word).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u16);

impl FrameFlags {
    /// Frame may be ignored if not understood.
    pub const IGNORE: u16 = 1 << 9;
    /// Metadata is present.
    pub const METADATA: u16 = 1 << 8;
    /// More fragments follow this one.
    pub const FOLLOWS: u16 = 1 << 7;
    /// Stream completion.
    pub const COMPLETE: u16 = 1 << 6;
    /// Payload carries a next item.
    pub const NEXT: u16 = 1 << 5;
    /// KEEPALIVE: the receiver must echo the frame.
    pub const RESPOND: u16 = 1 << 7;
    /// SETUP: the client will honor leases.
    pub const LEASE: u16 = 1 << 6;
    /// SETUP: a resume token is present.
    pub const RESUME: u16 = 1 << 7;

    const VALID_MASK: u16 = 0x03FF;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_ignore(mut self) -> Self {
        self.0 |= Self::IGNORE;
        self
    }

    pub fn with_metadata(mut self) -> Self {
        self.0 |= Self::METADATA;
        self
    }

    pub fn with_follows(mut self) -> Self {
        self.0 |= Self::FOLLOWS;
        self
    }

    pub fn with_complete(mut self) -> Self {
        self.0 |= Self::COMPLETE;
        self
    }

    pub fn with_next(mut self) -> Self {
        self.0 |= Self::NEXT;
        self
    }

    /// Sets `bit` when `enabled` is true.
    pub fn with_if(mut self, bit: u16, enabled: bool) -> Self {
        if enabled {
            self.0 |= bit;
        }
        self
    }

    pub fn contains(&self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    pub fn has_ignore(&self) -> bool {
        self.contains(Self::IGNORE)
    }

    pub fn has_metadata(&self) -> bool {
        self.contains(Self::METADATA)
    }

    pub fn is_follows(&self) -> bool {
        self.contains(Self::FOLLOWS)
    }

    pub fn is_complete(&self) -> bool {
        self.contains(Self::COMPLETE)
    }

    pub fn is_next(&self) -> bool {
        self.contains(Self::NEXT)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn from_bits(bits: u16) -> Result<Self, ProtocolError> {
        if bits & !Self::VALID_MASK != 0 {
            return Err(ProtocolError::InvalidFlags(bits));
        }
        Ok(Self(bits))
    }
}

/// SETUP: first frame sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupFrame {
    pub major_version: u16,
    pub minor_version: u16,
    pub keepalive_interval: Duration,
    pub max_lifetime: Duration,
    pub resume_token: Option<Bytes>,
    pub lease: bool,
    pub metadata_mime_type: String,
    pub data_mime_type: String,
    pub payload: Payload,
}

impl SetupFrame {
    pub fn new(keepalive_interval: Duration, max_lifetime: Duration) -> Self {
        Self {
            major_version: crate::MAJOR_VERSION,
            minor_version: crate::MINOR_VERSION,
            keepalive_interval,
            max_lifetime,
            resume_token: None,
            lease: false,
            metadata_mime_type: "application/binary".to_string(),
            data_mime_type: "application/binary".to_string(),
            payload: Payload::empty(),
        }
    }

    pub fn with_mime_types(
        mut self,
        metadata_mime_type: impl Into<String>,
        data_mime_type: impl Into<String>,
    ) -> Self {
        self.metadata_mime_type = metadata_mime_type.into();
        self.data_mime_type = data_mime_type.into();
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }
}

/// LEASE: decoded for completeness, never acted upon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseFrame {
    pub ttl: Duration,
    pub number_of_requests: u32,
    pub metadata: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveFrame {
    pub respond: bool,
    pub last_received_position: u64,
    pub data: Bytes,
}

impl KeepAliveFrame {
    pub fn new(respond: bool) -> Self {
        Self {
            respond,
            last_received_position: 0,
            data: Bytes::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFrame {
    pub stream_id: u32,
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorFrame {
    pub fn new(stream_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            stream_id,
            code,
            message: message.into(),
        }
    }
}

/// Any frame carrying a payload: the four request types and PAYLOAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub frame_type: FrameType,
    pub stream_id: u32,
    pub follows: bool,
    pub complete: bool,
    pub next: bool,
    /// Initial credit for REQUEST_STREAM and REQUEST_CHANNEL, 0 otherwise.
    pub initial_request: u32,
    pub payload: Payload,
}

impl RequestFrame {
    fn build(frame_type: FrameType, stream_id: u32, payload: Payload) -> Self {
        Self {
            frame_type,
            stream_id,
            follows: false,
            complete: false,
            next: false,
            initial_request: 0,
            payload,
        }
    }

    pub fn fire_and_forget(stream_id: u32, payload: Payload) -> Self {
        Self::build(FrameType::RequestFnf, stream_id, payload)
    }

    pub fn request_response(stream_id: u32, payload: Payload) -> Self {
        Self::build(FrameType::RequestResponse, stream_id, payload)
    }

    pub fn request_stream(stream_id: u32, initial_request: u32, payload: Payload) -> Self {
        let mut frame = Self::build(FrameType::RequestStream, stream_id, payload);
        frame.initial_request = initial_request;
        frame
    }

    pub fn request_channel(
        stream_id: u32,
        initial_request: u32,
        payload: Payload,
        complete: bool,
    ) -> Self {
        let mut frame = Self::build(FrameType::RequestChannel, stream_id, payload);
        frame.initial_request = initial_request;
        frame.complete = complete;
        frame
    }

    /// PAYLOAD with the NEXT flag.
    pub fn next(stream_id: u32, payload: Payload) -> Self {
        let mut frame = Self::build(FrameType::Payload, stream_id, payload);
        frame.next = true;
        frame
    }

    /// PAYLOAD with only the COMPLETE flag.
    pub fn complete(stream_id: u32) -> Self {
        let mut frame = Self::build(FrameType::Payload, stream_id, Payload::empty());
        frame.complete = true;
        frame
    }

    /// PAYLOAD with both NEXT and COMPLETE.
    pub fn next_complete(stream_id: u32, payload: Payload) -> Self {
        let mut frame = Self::next(stream_id, payload);
        frame.complete = true;
        frame
    }

    pub fn with_follows(mut self) -> Self {
        self.follows = true;
        self
    }

    fn flags(&self) -> FrameFlags {
        let mut flags = FrameFlags::new()
            .with_if(FrameFlags::METADATA, self.payload.has_metadata())
            .with_if(FrameFlags::FOLLOWS, self.follows);
        if matches!(
            self.frame_type,
            FrameType::RequestChannel | FrameType::Payload
        ) {
            flags = flags.with_if(FrameFlags::COMPLETE, self.complete);
        }
        if self.frame_type == FrameType::Payload {
            flags = flags.with_if(FrameFlags::NEXT, self.next);
        }
        flags
    }
}

/// A parsed RSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Setup(SetupFrame),
    Lease(LeaseFrame),
    KeepAlive(KeepAliveFrame),
    MetadataPush { metadata: Bytes },
    Request(RequestFrame),
    RequestN { stream_id: u32, n: u32 },
    Cancel { stream_id: u32 },
    Error(ErrorFrame),
}

impl Frame {
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Setup(_) | Frame::Lease(_) | Frame::KeepAlive(_) | Frame::MetadataPush { .. } => {
                0
            }
            Frame::Request(frame) => frame.stream_id,
            Frame::RequestN { stream_id, .. } | Frame::Cancel { stream_id } => *stream_id,
            Frame::Error(frame) => frame.stream_id,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Setup(_) => FrameType::Setup,
            Frame::Lease(_) => FrameType::Lease,
            Frame::KeepAlive(_) => FrameType::KeepAlive,
            Frame::MetadataPush { .. } => FrameType::MetadataPush,
            Frame::Request(frame) => frame.frame_type,
            Frame::RequestN { .. } => FrameType::RequestN,
            Frame::Cancel { .. } => FrameType::Cancel,
            Frame::Error(_) => FrameType::Error,
        }
    }

    pub fn error(stream_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Frame::Error(ErrorFrame::new(stream_id, code, message))
    }

    /// Encodes the frame into bytes, without a length prefix.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 16);

        match self {
            Frame::Setup(setup) => {
                let flags = FrameFlags::new()
                    .with_if(FrameFlags::METADATA, setup.payload.has_metadata())
                    .with_if(FrameFlags::RESUME, setup.resume_token.is_some())
                    .with_if(FrameFlags::LEASE, setup.lease);
                put_header(&mut buf, 0, FrameType::Setup, flags);
                buf.put_u16(setup.major_version);
                buf.put_u16(setup.minor_version);
                buf.put_u32(duration_millis(setup.keepalive_interval));
                buf.put_u32(duration_millis(setup.max_lifetime));
                if let Some(token) = &setup.resume_token {
                    let len = u16::try_from(token.len()).map_err(|_| {
                        ProtocolError::FrameTooLarge {
                            size: token.len(),
                            max: u16::MAX as usize,
                        }
                    })?;
                    buf.put_u16(len);
                    buf.put_slice(token);
                }
                put_mime_type(&mut buf, &setup.metadata_mime_type)?;
                put_mime_type(&mut buf, &setup.data_mime_type)?;
                put_payload(&mut buf, &setup.payload)?;
            }
            Frame::Lease(lease) => {
                let flags = FrameFlags::new().with_if(FrameFlags::METADATA, lease.metadata.is_some());
                put_header(&mut buf, 0, FrameType::Lease, flags);
                buf.put_u32(duration_millis(lease.ttl));
                buf.put_u32(lease.number_of_requests);
                if let Some(metadata) = &lease.metadata {
                    buf.put_slice(metadata);
                }
            }
            Frame::KeepAlive(keepalive) => {
                let flags = FrameFlags::new().with_if(FrameFlags::RESPOND, keepalive.respond);
                put_header(&mut buf, 0, FrameType::KeepAlive, flags);
                buf.put_u64(keepalive.last_received_position);
                buf.put_slice(&keepalive.data);
            }
            Frame::MetadataPush { metadata } => {
                put_header(
                    &mut buf,
                    0,
                    FrameType::MetadataPush,
                    FrameFlags::new().with_metadata(),
                );
                buf.put_slice(metadata);
            }
            Frame::Request(request) => {
                put_header(&mut buf, request.stream_id, request.frame_type, request.flags());
                if request.frame_type.has_initial_request() {
                    buf.put_u32(request.initial_request);
                }
                put_payload(&mut buf, &request.payload)?;
            }
            Frame::RequestN { stream_id, n } => {
                put_header(&mut buf, *stream_id, FrameType::RequestN, FrameFlags::new());
                buf.put_u32(*n);
            }
            Frame::Cancel { stream_id } => {
                put_header(&mut buf, *stream_id, FrameType::Cancel, FrameFlags::new());
            }
            Frame::Error(error) => {
                put_header(&mut buf, error.stream_id, FrameType::Error, FrameFlags::new());
                buf.put_u32(error.code.code());
                buf.put_slice(error.message.as_bytes());
            }
        }

        Ok(buf)
    }

    /// Decodes one complete frame.
    pub fn decode(mut buf: Bytes) -> Result<Self, ProtocolError> {
        ensure(&buf, FRAME_HEADER_SIZE)?;
        let stream_id = buf.get_u32() & STREAM_ID_MASK;
        let type_and_flags = buf.get_u16();
        let frame_type = FrameType::from_u8((type_and_flags >> 10) as u8)?;
        let flags = FrameFlags::from_bits(type_and_flags & FrameFlags::VALID_MASK)?;

        if frame_type.is_connection_level() && stream_id != 0 {
            return Err(ProtocolError::InvalidStreamId {
                stream_id,
                frame_type,
            });
        }
        if !frame_type.is_connection_level() && frame_type != FrameType::Error && stream_id == 0
        {
            return Err(ProtocolError::InvalidStreamId {
                stream_id,
                frame_type,
            });
        }

        let frame = match frame_type {
            FrameType::Setup => {
                ensure(&buf, 12)?;
                let major_version = buf.get_u16();
                let minor_version = buf.get_u16();
                let keepalive_interval = Duration::from_millis(buf.get_u32() as u64);
                let max_lifetime = Duration::from_millis(buf.get_u32() as u64);
                let resume_token = if flags.contains(FrameFlags::RESUME) {
                    ensure(&buf, 2)?;
                    let len = buf.get_u16() as usize;
                    ensure(&buf, len)?;
                    Some(buf.split_to(len))
                } else {
                    None
                };
                let metadata_mime_type = get_mime_type(&mut buf)?;
                let data_mime_type = get_mime_type(&mut buf)?;
                let payload = get_payload(buf, flags.has_metadata())?;
                Frame::Setup(SetupFrame {
                    major_version,
                    minor_version,
                    keepalive_interval,
                    max_lifetime,
                    resume_token,
                    lease: flags.contains(FrameFlags::LEASE),
                    metadata_mime_type,
                    data_mime_type,
                    payload,
                })
            }
            FrameType::Lease => {
                ensure(&buf, 8)?;
                let ttl = Duration::from_millis(buf.get_u32() as u64);
                let number_of_requests = buf.get_u32();
                let metadata = flags.has_metadata().then_some(buf);
                Frame::Lease(LeaseFrame {
                    ttl,
                    number_of_requests,
                    metadata,
                })
            }
            FrameType::KeepAlive => {
                ensure(&buf, 8)?;
                let last_received_position = buf.get_u64();
                Frame::KeepAlive(KeepAliveFrame {
                    respond: flags.contains(FrameFlags::RESPOND),
                    last_received_position,
                    data: buf,
                })
            }
            FrameType::MetadataPush => Frame::MetadataPush { metadata: buf },
            FrameType::RequestResponse
            | FrameType::RequestFnf
            | FrameType::RequestStream
            | FrameType::RequestChannel
            | FrameType::Payload => {
                let initial_request = if frame_type.has_initial_request() {
                    ensure(&buf, 4)?;
                    buf.get_u32() & MAX_REQUEST_N
                } else {
                    0
                };
                let payload = get_payload(buf, flags.has_metadata())?;
                Frame::Request(RequestFrame {
                    frame_type,
                    stream_id,
                    follows: flags.is_follows(),
                    complete: flags.is_complete()
                        && matches!(frame_type, FrameType::RequestChannel | FrameType::Payload),
                    next: flags.is_next() && frame_type == FrameType::Payload,
                    initial_request,
                    payload,
                })
            }
            FrameType::RequestN => {
                ensure(&buf, 4)?;
                let n = buf.get_u32() & MAX_REQUEST_N;
                Frame::RequestN { stream_id, n }
            }
            FrameType::Cancel => Frame::Cancel { stream_id },
            FrameType::Error => {
                ensure(&buf, 4)?;
                let code = ErrorCode::from_code(buf.get_u32());
                let message = String::from_utf8(buf.to_vec())
                    .map_err(|_| ProtocolError::InvalidUtf8("error message"))?;
                Frame::Error(ErrorFrame {
                    stream_id,
                    code,
                    message,
                })
            }
            FrameType::Resume | FrameType::ResumeOk | FrameType::Extension => {
                return Err(ProtocolError::UnsupportedFrameType {
                    frame_type,
                    ignorable: flags.has_ignore(),
                });
            }
        };

        Ok(frame)
    }
}

impl From<RequestFrame> for Frame {
    fn from(frame: RequestFrame) -> Self {
        Frame::Request(frame)
    }
}

impl From<ErrorFrame> for Frame {
    fn from(frame: ErrorFrame) -> Self {
        Frame::Error(frame)
    }
}

fn put_header(buf: &mut BytesMut, stream_id: u32, frame_type: FrameType, flags: FrameFlags) {
    buf.put_u32(stream_id & STREAM_ID_MASK);
    buf.put_u16(((frame_type as u16) << 10) | flags.bits());
}

fn put_u24(buf: &mut BytesMut, value: usize) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}

fn get_u24(buf: &mut Bytes) -> usize {
    let hi = buf.get_u8() as usize;
    let mid = buf.get_u8() as usize;
    let lo = buf.get_u8() as usize;
    (hi << 16) | (mid << 8) | lo
}

/// Writes a 24-bit length value, shared with the stream codec.
pub(crate) fn write_length(buf: &mut BytesMut, value: usize) {
    put_u24(buf, value);
}

/// Reads a 24-bit length value from the front of a slice.
pub(crate) fn read_length(bytes: &[u8]) -> usize {
    ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | bytes[2] as usize
}

fn put_payload(buf: &mut BytesMut, payload: &Payload) -> Result<(), ProtocolError> {
    if let Some(metadata) = &payload.metadata {
        if metadata.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: metadata.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        put_u24(buf, metadata.len());
        buf.put_slice(metadata);
    }
    buf.put_slice(&payload.data);
    Ok(())
}

fn get_payload(mut buf: Bytes, has_metadata: bool) -> Result<Payload, ProtocolError> {
    let metadata = if has_metadata {
        ensure(&buf, METADATA_LENGTH_SIZE)?;
        let len = get_u24(&mut buf);
        ensure(&buf, len)?;
        Some(buf.split_to(len))
    } else {
        None
    };
    Ok(Payload {
        data: buf,
        metadata,
    })
}

fn put_mime_type(buf: &mut BytesMut, mime_type: &str) -> Result<(), ProtocolError> {
    if !mime_type.is_ascii() || mime_type.len() > u8::MAX as usize {
        return Err(ProtocolError::InvalidMimeType(mime_type.to_string()));
    }
    buf.put_u8(mime_type.len() as u8);
    buf.put_slice(mime_type.as_bytes());
    Ok(())
}

fn get_mime_type(buf: &mut Bytes) -> Result<String, ProtocolError> {
    ensure(buf, 1)?;
    let len = buf.get_u8() as usize;
    ensure(buf, len)?;
    let raw = buf.split_to(len);
    let mime_type =
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8("mime type"))?;
    if !mime_type.is_ascii() {
        return Err(ProtocolError::InvalidMimeType(mime_type));
    }
    Ok(mime_type)
}

fn ensure(buf: &Bytes, len: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < len {
        return Err(ProtocolError::IncompleteFrame {
            needed: len - buf.remaining(),
        });
    }
    Ok(())
}

fn duration_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
