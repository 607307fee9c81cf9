//! Application-facing handler trait.

use crate::error::RSocketError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use rsocket_protocol::Payload;
use std::future::Future;

/// Sequence of payloads flowing through a stream or channel.
pub type PayloadStream = BoxStream<'static, Result<Payload, RSocketError>>;

fn not_implemented(interaction: &str) -> RSocketError {
    RSocketError::application(format!("{interaction} is not implemented"))
}

fn rejected_stream(interaction: &'static str) -> PayloadStream {
    stream::once(async move { Err::<Payload, _>(not_implemented(interaction)) }).boxed()
}

/// Services the interactions initiated by the peer.
///
/// Every method has a default that rejects the interaction with an
/// application error.
#[async_trait]
pub trait RSocket: Send + Sync + 'static {
    async fn metadata_push(&self, _metadata: Bytes) -> Result<(), RSocketError> {
        Err(not_implemented("metadata push"))
    }

    async fn fire_and_forget(&self, _payload: Payload) -> Result<(), RSocketError> {
        Err(not_implemented("fire and forget"))
    }

    async fn request_response(&self, _payload: Payload) -> Result<Payload, RSocketError> {
        Err(not_implemented("request response"))
    }

    fn request_stream(&self, _payload: Payload) -> PayloadStream {
        rejected_stream("request stream")
    }

    /// `initial` is the payload carried by the REQUEST_CHANNEL frame;
    /// `payloads` yields everything the requester sends after it.
    fn request_channel(&self, _initial: Payload, _payloads: PayloadStream) -> PayloadStream {
        rejected_stream("request channel")
    }
}

/// Handler that rejects everything.
pub struct EmptyRSocket;

impl RSocket for EmptyRSocket {}

type MetadataPushFn =
    Box<dyn Fn(Bytes) -> BoxFuture<'static, Result<(), RSocketError>> + Send + Sync>;
type FireAndForgetFn =
    Box<dyn Fn(Payload) -> BoxFuture<'static, Result<(), RSocketError>> + Send + Sync>;
type RequestResponseFn =
    Box<dyn Fn(Payload) -> BoxFuture<'static, Result<Payload, RSocketError>> + Send + Sync>;
type RequestStreamFn = Box<dyn Fn(Payload) -> PayloadStream + Send + Sync>;
type RequestChannelFn = Box<dyn Fn(Payload, PayloadStream) -> PayloadStream + Send + Sync>;

/// [`RSocket`] assembled from closures.
///
/// ```ignore
/// let handler = RequestHandler::builder()
///     .request_response(|payload| async move { Ok(payload) })
///     .build();
/// ```
#[derive(Default)]
pub struct RequestHandler {
    metadata_push: Option<MetadataPushFn>,
    fire_and_forget: Option<FireAndForgetFn>,
    request_response: Option<RequestResponseFn>,
    request_stream: Option<RequestStreamFn>,
    request_channel: Option<RequestChannelFn>,
}

impl RequestHandler {
    pub fn builder() -> RequestHandlerBuilder {
        RequestHandlerBuilder {
            handler: RequestHandler::default(),
        }
    }
}

#[async_trait]
impl RSocket for RequestHandler {
    async fn metadata_push(&self, metadata: Bytes) -> Result<(), RSocketError> {
        match &self.metadata_push {
            Some(f) => f(metadata).await,
            None => Err(not_implemented("metadata push")),
        }
    }

    async fn fire_and_forget(&self, payload: Payload) -> Result<(), RSocketError> {
        match &self.fire_and_forget {
            Some(f) => f(payload).await,
            None => Err(not_implemented("fire and forget")),
        }
    }

    async fn request_response(&self, payload: Payload) -> Result<Payload, RSocketError> {
        match &self.request_response {
            Some(f) => f(payload).await,
            None => Err(not_implemented("request response")),
        }
    }

    fn request_stream(&self, payload: Payload) -> PayloadStream {
        match &self.request_stream {
            Some(f) => f(payload),
            None => rejected_stream("request stream"),
        }
    }

    fn request_channel(&self, initial: Payload, payloads: PayloadStream) -> PayloadStream {
        match &self.request_channel {
            Some(f) => f(initial, payloads),
            None => rejected_stream("request channel"),
        }
    }
}

/// Builder for [`RequestHandler`].
pub struct RequestHandlerBuilder {
    handler: RequestHandler,
}

impl RequestHandlerBuilder {
    pub fn metadata_push<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RSocketError>> + Send + 'static,
    {
        self.handler.metadata_push = Some(Box::new(
            move |metadata: Bytes| -> BoxFuture<'static, Result<(), RSocketError>> {
                Box::pin(f(metadata))
            },
        ));
        self
    }

    pub fn fire_and_forget<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RSocketError>> + Send + 'static,
    {
        self.handler.fire_and_forget = Some(Box::new(
            move |payload: Payload| -> BoxFuture<'static, Result<(), RSocketError>> {
                Box::pin(f(payload))
            },
        ));
        self
    }

    pub fn request_response<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, RSocketError>> + Send + 'static,
    {
        self.handler.request_response = Some(Box::new(
            move |payload: Payload| -> BoxFuture<'static, Result<Payload, RSocketError>> {
                Box::pin(f(payload))
            },
        ));
        self
    }

    pub fn request_stream<F>(mut self, f: F) -> Self
    where
        F: Fn(Payload) -> PayloadStream + Send + Sync + 'static,
    {
        self.handler.request_stream = Some(Box::new(f));
        self
    }

    pub fn request_channel<F>(mut self, f: F) -> Self
    where
        F: Fn(Payload, PayloadStream) -> PayloadStream + Send + Sync + 'static,
    {
        self.handler.request_channel = Some(Box::new(f));
        self
    }

    pub fn build(self) -> RequestHandler {
        self.handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_rsocket_rejects() {
        let handler = EmptyRSocket;
        let err = handler.request_response(Payload::from("x")).await.unwrap_err();
        assert!(matches!(err, RSocketError::ApplicationError(_)));

        let mut stream = handler.request_stream(Payload::from("x"));
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_builder_dispatches() {
        let handler = RequestHandler::builder()
            .request_response(|payload| async move { Ok(payload) })
            .request_stream(|payload| {
                stream::iter(vec![Ok::<_, RSocketError>(payload.clone()), Ok(payload)]).boxed()
            })
            .build();

        let echoed = handler.request_response(Payload::from("HELLO")).await.unwrap();
        assert_eq!(echoed.data_utf8(), Some("HELLO"));

        let items: Vec<_> = handler.request_stream(Payload::from("a")).collect().await;
        assert_eq!(items.len(), 2);

        let err = handler.fire_and_forget(Payload::from("x")).await.unwrap_err();
        assert!(err.to_string().contains("fire and forget"));
    }
}
