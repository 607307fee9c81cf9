//! Duplex frame transports.
//!
//! A transport carries whole encoded frames. [`TcpTransport`] adds the
//! 24-bit length prefix; [`LocalTransport`] connects two connections in
//! the same process.

use crate::error::RSocketError;
use async_trait::async_trait;
use bytes::Bytes;
use rsocket_protocol::{Decoder, Encoder};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Inbound half of a transport.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Reads the next frame. `Ok(None)` means the peer closed the transport.
    async fn read_frame(&mut self) -> Result<Option<Bytes>, RSocketError>;
}

/// Outbound half of a transport.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), RSocketError>;

    /// Flushes and closes the outbound direction.
    async fn shutdown(&mut self) -> Result<(), RSocketError>;
}

/// A transport that can be split into independent halves.
pub trait Transport {
    type Reader: FrameReader;
    type Writer: FrameWriter;

    fn split(self) -> (Self::Reader, Self::Writer);
}

/// In-memory transport.
pub struct LocalTransport {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl LocalTransport {
    /// Two transports wired back to back.
    pub fn pair() -> (LocalTransport, LocalTransport) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            LocalTransport { tx: a_tx, rx: a_rx },
            LocalTransport { tx: b_tx, rx: b_rx },
        )
    }
}

pub struct LocalReader {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

pub struct LocalWriter {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

impl Transport for LocalTransport {
    type Reader = LocalReader;
    type Writer = LocalWriter;

    fn split(self) -> (LocalReader, LocalWriter) {
        (
            LocalReader { rx: self.rx },
            LocalWriter { tx: Some(self.tx) },
        )
    }
}

#[async_trait]
impl FrameReader for LocalReader {
    async fn read_frame(&mut self) -> Result<Option<Bytes>, RSocketError> {
        Ok(self.rx.recv().await)
    }
}

#[async_trait]
impl FrameWriter for LocalWriter {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), RSocketError> {
        match &self.tx {
            Some(tx) => tx.send(frame).map_err(|_| RSocketError::ConnectionClosed),
            None => Err(RSocketError::ConnectionClosed),
        }
    }

    async fn shutdown(&mut self) -> Result<(), RSocketError> {
        self.tx.take();
        Ok(())
    }
}

/// TCP transport with length-prefixed frames.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> Result<Self, RSocketError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, RSocketError> {
        Ok(self.stream.peer_addr()?)
    }
}

impl From<TcpStream> for TcpTransport {
    fn from(stream: TcpStream) -> Self {
        Self::new(stream)
    }
}

pub struct TcpReader {
    read: OwnedReadHalf,
    decoder: Decoder,
}

pub struct TcpWriter {
    write: OwnedWriteHalf,
}

impl Transport for TcpTransport {
    type Reader = TcpReader;
    type Writer = TcpWriter;

    fn split(self) -> (TcpReader, TcpWriter) {
        let (read, write) = self.stream.into_split();
        (
            TcpReader {
                read,
                decoder: Decoder::new(),
            },
            TcpWriter { write },
        )
    }
}

#[async_trait]
impl FrameReader for TcpReader {
    async fn read_frame(&mut self) -> Result<Option<Bytes>, RSocketError> {
        loop {
            if let Some(frame) = self.decoder.decode_raw()? {
                return Ok(Some(frame));
            }
            let n = self.read.read_buf(self.decoder.buffer_mut()).await?;
            if n == 0 {
                if self.decoder.buffered() > 0 {
                    return Err(RSocketError::ConnectionError(format!(
                        "connection closed with {} bytes of a partial frame",
                        self.decoder.buffered()
                    )));
                }
                return Ok(None);
            }
        }
    }
}

#[async_trait]
impl FrameWriter for TcpWriter {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), RSocketError> {
        let buf = Encoder::encode_raw(&frame)?;
        self.write.write_all(&buf).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), RSocketError> {
        self.write.shutdown().await?;
        Ok(())
    }
}
