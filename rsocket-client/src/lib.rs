//! # rsocket-client
//!
//! Client library for RSocket over TCP.
//!
//! This crate provides:
//! - TCP connect with timeout and the SETUP handshake
//! - High-level API for the four interaction models and metadata push
//! - Optional responder for requests initiated by the server

pub mod client;
pub mod connection;
pub mod error;

pub use client::Client;
pub use connection::ClientConfig;
pub use error::ClientError;
