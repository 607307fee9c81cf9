//! # rsocket-core
//!
//! Multiplexed RSocket connections.
//!
//! This crate provides:
//! - Stream id allocation and the per-connection stream registry
//! - Credit-based flow control (REQUEST_N) for streams and channels
//! - Requester and responder sides of the four interaction models
//! - The connection driver with keepalive and a dual-lane outbound queue
//! - TCP and in-process transports

pub mod config;
pub mod connection;
pub mod error;
pub(crate) mod handler;
pub mod inbound;
mod keepalive;
pub mod limiter;
pub mod queue;
pub mod registry;
pub mod requester;
mod responder;
pub mod rsocket;
pub mod stream_id;
pub mod transport;

pub use config::ConnectionConfig;
pub use connection::Connection;
pub use error::RSocketError;
pub use inbound::InboundStream;
pub use limiter::Limiter;
pub use queue::{frame_queue, FrameQueue, FrameReceiver};
pub use registry::StreamRegistry;
pub use requester::{RequestStream, Requester};
pub use rsocket::{EmptyRSocket, PayloadStream, RSocket, RequestHandler, RequestHandlerBuilder};
pub use stream_id::{Side, StreamIdAllocator};
pub use transport::{
    FrameReader, FrameWriter, LocalReader, LocalTransport, LocalWriter, TcpReader, TcpTransport,
    TcpWriter, Transport,
};

pub use rsocket_protocol::Payload;
