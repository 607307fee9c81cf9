//! High-level client API.

use crate::connection::{self, ClientConfig};
use crate::error::ClientError;
use bytes::Bytes;
use parking_lot::Mutex;
use rsocket_core::{
    Connection, EmptyRSocket, Payload, PayloadStream, RSocket, RSocketError, RequestStream,
    Requester,
};
use std::sync::Arc;

/// High-level client for an RSocket server.
pub struct Client {
    config: ClientConfig,
    responder: Arc<dyn RSocket>,
    conn: Mutex<Option<Arc<Connection>>>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            responder: Arc::new(EmptyRSocket),
            conn: Mutex::new(None),
        }
    }

    /// Serves requests initiated by the server with `responder`.
    pub fn with_responder(mut self, responder: impl RSocket) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connects to the server and sends SETUP.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }
        let conn = connection::connect(&self.config, self.responder.clone()).await?;
        tracing::debug!("Connected to {}", self.config.addr);
        *self.conn.lock() = Some(Arc::new(conn));
        Ok(())
    }

    /// Returns whether the client has a live connection.
    pub fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .as_ref()
            .map(|conn| conn.is_active())
            .unwrap_or(false)
    }

    /// Closes the connection.
    pub fn close(&self) {
        if let Some(conn) = self.conn.lock().take() {
            tracing::debug!("Closing connection...");
            conn.close();
        }
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Result<Arc<Connection>, ClientError> {
        self.conn.lock().clone().ok_or(ClientError::NotConnected)
    }

    pub fn requester(&self) -> Result<Requester, ClientError> {
        Ok(self.connection()?.requester())
    }

    // =========================================================================
    // Interactions
    // =========================================================================

    pub async fn fire_and_forget(&self, payload: Payload) -> Result<(), ClientError> {
        Ok(self.requester()?.fire_and_forget(payload).await?)
    }

    pub async fn request_response(&self, payload: Payload) -> Result<Payload, ClientError> {
        Ok(self.requester()?.request_response(payload).await?)
    }

    pub fn request_stream(&self, payload: Payload) -> Result<RequestStream, ClientError> {
        Ok(self.requester()?.request_stream(payload))
    }

    pub fn request_channel(&self, payloads: PayloadStream) -> Result<RequestStream, ClientError> {
        Ok(self.requester()?.request_channel(payloads))
    }

    pub async fn metadata_push(&self, metadata: Bytes) -> Result<(), ClientError> {
        Ok(self.requester()?.metadata_push(metadata).await?)
    }

    /// Waits until the connection ends and returns the cause.
    pub async fn closed(&self) -> Result<RSocketError, ClientError> {
        Ok(self.connection()?.closed().await)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
