//! # rsocket-server
//!
//! TCP server for RSocket.
//!
//! This crate provides:
//! - TCP accept loop with a connection limit and graceful shutdown
//! - SETUP validation and per-connection handler selection
//! - YAML and environment configuration

pub mod acceptor;
pub mod config;
pub mod error;
pub mod server;

pub use acceptor::{EchoAcceptor, SocketAcceptor};
pub use config::{Config, ConfigError, ConnectionSettings, NetworkConfig};
pub use error::ServerError;
pub use server::{validate_setup, Server, ServerConfig, ServerStats};
