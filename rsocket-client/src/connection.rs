//! Connection setup.

use crate::error::ClientError;
use rsocket_core::{Connection, ConnectionConfig, RSocket, TcpTransport};
use rsocket_protocol::{Payload, SetupFrame};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default MIME type for data and metadata.
pub const DEFAULT_MIME_TYPE: &str = "application/binary";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Keepalive and prefetch settings, also advertised in SETUP.
    pub connection: ConnectionConfig,
    pub data_mime_type: String,
    pub metadata_mime_type: String,
    /// Payload carried by the SETUP frame.
    pub setup_payload: Option<Payload>,
}

impl ClientConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connection: ConnectionConfig::default(),
            data_mime_type: DEFAULT_MIME_TYPE.to_string(),
            metadata_mime_type: DEFAULT_MIME_TYPE.to_string(),
            setup_payload: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, interval: Duration, max_lifetime: Duration) -> Self {
        self.connection = self.connection.with_keepalive(interval, max_lifetime);
        self
    }

    pub fn with_prefetch(mut self, prefetch: u32) -> Self {
        self.connection = self.connection.with_prefetch(prefetch);
        self
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

    pub fn with_setup_payload(mut self, payload: Payload) -> Self {
        self.setup_payload = Some(payload);
        self
    }

    /// Builds the SETUP frame announcing this configuration.
    pub fn setup_frame(&self) -> SetupFrame {
        let setup = SetupFrame::new(
            self.connection.keepalive_interval,
            self.connection.keepalive_max_lifetime,
        )
        .with_mime_types(self.metadata_mime_type.clone(), self.data_mime_type.clone());
        match &self.setup_payload {
            Some(payload) => setup.with_payload(payload.clone()),
            None => setup,
        }
    }

    fn validate(&self) -> Result<(), ClientError> {
        if !self.data_mime_type.is_ascii() || self.data_mime_type.len() > u8::MAX as usize {
            return Err(ClientError::Config(format!(
                "invalid data mime type: {}",
                self.data_mime_type
            )));
        }
        if !self.metadata_mime_type.is_ascii() || self.metadata_mime_type.len() > u8::MAX as usize
        {
            return Err(ClientError::Config(format!(
                "invalid metadata mime type: {}",
                self.metadata_mime_type
            )));
        }
        Ok(())
    }
}

/// Opens a TCP connection, sends SETUP and starts the client side.
pub async fn connect(
    config: &ClientConfig,
    responder: Arc<dyn RSocket>,
) -> Result<Connection, ClientError> {
    config.validate()?;
    tracing::debug!("Connecting to {}...", config.addr);

    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr))
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            ClientError::Io(e)
        })?;
    stream.set_nodelay(true)?;
    tracing::debug!("TCP connected, sending SETUP");

    Ok(Connection::start_client(
        TcpTransport::new(stream),
        config.setup_frame(),
        config.connection.clone(),
        responder,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = ClientConfig::new("127.0.0.1:7878".parse().unwrap())
            .with_connect_timeout(Duration::from_secs(1))
            .with_keepalive(Duration::from_secs(5), Duration::from_secs(30))
            .with_prefetch(8)
            .with_mime_types("message/x.rsocket.routing.v0", "application/json");

        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.connection.prefetch, 8);

        let setup = config.setup_frame();
        assert_eq!(setup.keepalive_interval, Duration::from_secs(5));
        assert_eq!(setup.max_lifetime, Duration::from_secs(30));
        assert_eq!(setup.data_mime_type, "application/json");
        assert_eq!(setup.metadata_mime_type, "message/x.rsocket.routing.v0");
    }

    #[test]
    fn test_setup_payload() {
        let config = ClientConfig::new("127.0.0.1:7878".parse().unwrap())
            .with_setup_payload(Payload::from("hello"));
        assert_eq!(config.setup_frame().payload.data_utf8(), Some("hello"));
    }

    #[test]
    fn test_invalid_mime_type_rejected() {
        let config = ClientConfig::new("127.0.0.1:7878".parse().unwrap())
            .with_mime_types("text/plain", "données");
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }
}
