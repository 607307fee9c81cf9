//! Per-connection handler selection.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use rsocket_core::{Payload, PayloadStream, RSocket, RSocketError};
use rsocket_protocol::SetupFrame;
use std::sync::Arc;

/// Decides whether to accept a connection and which handler serves it.
#[async_trait]
pub trait SocketAcceptor: Send + Sync + 'static {
    /// Returns the handler for a connection that sent `setup`, or an error
    /// that is reported to the client as REJECTED_SETUP.
    async fn accept(&self, setup: &SetupFrame) -> Result<Arc<dyn RSocket>, RSocketError>;
}

/// Default number of items an echo stream emits.
pub const DEFAULT_STREAM_REPEAT: usize = 16;

/// Accepts every connection and echoes every request.
///
/// - request-response answers with the request payload
/// - request-stream repeats the request payload
/// - request-channel echoes each payload the client sends
/// - fire-and-forget and metadata push are logged
#[derive(Debug, Clone)]
pub struct EchoAcceptor {
    stream_repeat: usize,
}

impl EchoAcceptor {
    pub fn new() -> Self {
        Self {
            stream_repeat: DEFAULT_STREAM_REPEAT,
        }
    }

    /// Sets how many times request-stream repeats the request payload.
    pub fn with_stream_repeat(mut self, repeat: usize) -> Self {
        self.stream_repeat = repeat;
        self
    }
}

impl Default for EchoAcceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SocketAcceptor for EchoAcceptor {
    async fn accept(&self, setup: &SetupFrame) -> Result<Arc<dyn RSocket>, RSocketError> {
        tracing::debug!(
            "Accepting connection (data: {}, metadata: {})",
            setup.data_mime_type,
            setup.metadata_mime_type
        );
        Ok(Arc::new(EchoRSocket {
            stream_repeat: self.stream_repeat,
        }))
    }
}

struct EchoRSocket {
    stream_repeat: usize,
}

#[async_trait]
impl RSocket for EchoRSocket {
    async fn metadata_push(&self, metadata: Bytes) -> Result<(), RSocketError> {
        tracing::info!("metadata push: {}", String::from_utf8_lossy(&metadata));
        Ok(())
    }

    async fn fire_and_forget(&self, payload: Payload) -> Result<(), RSocketError> {
        tracing::info!("fire and forget: {}", String::from_utf8_lossy(&payload.data));
        Ok(())
    }

    async fn request_response(&self, payload: Payload) -> Result<Payload, RSocketError> {
        Ok(payload)
    }

    fn request_stream(&self, payload: Payload) -> PayloadStream {
        stream::repeat(payload)
            .take(self.stream_repeat)
            .map(Ok)
            .boxed()
    }

    fn request_channel(&self, initial: Payload, payloads: PayloadStream) -> PayloadStream {
        stream::once(async move { Ok(initial) }).chain(payloads).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn setup() -> SetupFrame {
        SetupFrame::new(Duration::from_secs(20), Duration::from_secs(90))
    }

    #[tokio::test]
    async fn test_echo_request_response() {
        let rsocket = EchoAcceptor::new().accept(&setup()).await.unwrap();
        let response = rsocket.request_response(Payload::from("HELLO")).await.unwrap();
        assert_eq!(response.data_utf8(), Some("HELLO"));
    }

    #[tokio::test]
    async fn test_echo_stream_repeats() {
        let rsocket = EchoAcceptor::new()
            .with_stream_repeat(3)
            .accept(&setup())
            .await
            .unwrap();
        let items: Vec<_> = rsocket.request_stream(Payload::from("x")).collect().await;
        assert_eq!(items.len(), 3);
        assert!(items
            .iter()
            .all(|item| item.as_ref().unwrap().data_utf8() == Some("x")));
    }

    #[tokio::test]
    async fn test_echo_channel() {
        let rsocket = EchoAcceptor::new().accept(&setup()).await.unwrap();
        let rest = stream::iter(vec![Ok(Payload::from("b")), Ok(Payload::from("c"))]).boxed();
        let items: Vec<_> = rsocket
            .request_channel(Payload::from("a"), rest)
            .map(|item| item.unwrap().data_utf8().unwrap_or_default().to_string())
            .collect()
            .await;
        assert_eq!(items, vec!["a", "b", "c"]);
    }
}
