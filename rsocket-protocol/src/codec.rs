//! Length-prefixed framing for byte-stream transports such as TCP.
//!
//! Each frame is preceded by its length as a 24-bit big-endian integer.

use crate::error::ProtocolError;
use crate::frame::{read_length, write_length, Frame};
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame length prefix in bytes.
pub const FRAME_LENGTH_SIZE: usize = 3;

/// Encodes frames with a length prefix.
pub struct Encoder;

impl Encoder {
    /// Encodes a frame and prepends its length.
    pub fn encode_frame(frame: &Frame) -> Result<BytesMut, ProtocolError> {
        let body = frame.encode()?;
        Self::encode_raw(&body)
    }

    /// Prepends the length prefix to an already encoded frame.
    pub fn encode_raw(body: &[u8]) -> Result<BytesMut, ProtocolError> {
        if body.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let mut buf = BytesMut::with_capacity(FRAME_LENGTH_SIZE + body.len());
        write_length(&mut buf, body.len());
        buf.put_slice(body);
        Ok(buf)
    }
}

/// Splits a byte stream into frames.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Mutable access to the buffer for direct socket reads.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Attempts to split the next undecoded frame off the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed.
    pub fn decode_raw(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.buffer.len() < FRAME_LENGTH_SIZE {
            return Ok(None);
        }
        let len = read_length(&self.buffer[..FRAME_LENGTH_SIZE]);
        if self.buffer.len() < FRAME_LENGTH_SIZE + len {
            self.buffer.reserve(FRAME_LENGTH_SIZE + len - self.buffer.len());
            return Ok(None);
        }
        self.buffer.advance(FRAME_LENGTH_SIZE);
        Ok(Some(self.buffer.split_to(len).freeze()))
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        match self.decode_raw()? {
            Some(bytes) => Frame::decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
