//! Initiating side of the four interaction models.

use crate::connection::ConnectionState;
use crate::error::RSocketError;
use crate::handler::{drain_outbound, StreamHandler, BOTH, INBOUND, OUTBOUND};
use crate::inbound::InboundStream;
use crate::rsocket::PayloadStream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use rsocket_protocol::{Frame, Payload, RequestFrame};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// Sends requests to the peer. Cheap to clone.
#[derive(Clone)]
pub struct Requester {
    state: Arc<ConnectionState>,
}

impl Requester {
    pub(crate) fn new(state: Arc<ConnectionState>) -> Self {
        Self { state }
    }

    /// Pushes connection-level metadata to the peer.
    pub async fn metadata_push(&self, metadata: Bytes) -> Result<(), RSocketError> {
        self.state.check_active()?;
        if !self
            .state
            .queue
            .enqueue_prioritized(Frame::MetadataPush { metadata })
        {
            return Err(self.closed_cause());
        }
        Ok(())
    }

    /// Sends a request that expects no response.
    pub async fn fire_and_forget(&self, payload: Payload) -> Result<(), RSocketError> {
        self.state.check_active()?;
        let state = &self.state;
        let stream_id = state.ids.next(|id| state.registry.contains(id));
        if !state
            .queue
            .enqueue(RequestFrame::fire_and_forget(stream_id, payload).into())
        {
            return Err(self.closed_cause());
        }
        Ok(())
    }

    /// Sends a request and waits for its single response.
    ///
    /// Dropping the returned future before it completes cancels the request.
    pub async fn request_response(&self, payload: Payload) -> Result<Payload, RSocketError> {
        let (tx, rx) = oneshot::channel();
        let handler = self
            .state
            .register(|id, token| StreamHandler::requester_response(id, token, tx))?;
        let mut guard = CancelOnDrop {
            state: &self.state,
            handler: &handler,
            armed: true,
        };
        self.state.queue.enqueue(
            RequestFrame::request_response(handler.stream_id(), payload).into(),
        );

        let result = rx.await.unwrap_or_else(|_| Err(self.closed_cause()));
        guard.armed = false;
        result
    }

    /// Requests a stream of payloads.
    ///
    /// Nothing is sent until the returned stream is first polled.
    pub fn request_stream(&self, payload: Payload) -> RequestStream {
        RequestStream::new(self.state.clone(), PendingRequest::Stream(payload))
    }

    /// Opens a bidirectional channel.
    ///
    /// On first poll, the first item of `payloads` is sent with the
    /// REQUEST_CHANNEL frame; the rest are sent as the responder grants
    /// credit. An empty `payloads` opens the channel already half closed.
    pub fn request_channel(&self, payloads: PayloadStream) -> RequestStream {
        RequestStream::new(self.state.clone(), PendingRequest::Channel(payloads))
    }

    /// Number of streams currently open on this connection.
    pub fn active_streams(&self) -> usize {
        self.state.registry.len()
    }

    pub fn is_active(&self) -> bool {
        self.state.check_active().is_ok()
    }

    fn closed_cause(&self) -> RSocketError {
        self.state
            .terminal_error()
            .unwrap_or(RSocketError::ConnectionClosed)
    }
}

/// Cancels an in-flight request-response if its future is dropped.
struct CancelOnDrop<'a> {
    state: &'a ConnectionState,
    handler: &'a Arc<StreamHandler>,
    armed: bool,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.handler.close(self.state, BOTH) & INBOUND != 0 {
            self.state.queue.enqueue(Frame::Cancel {
                stream_id: self.handler.stream_id(),
            });
        }
    }
}

enum PendingRequest {
    Stream(Payload),
    Channel(PayloadStream),
}

/// Lazily started request-stream or request-channel.
pub struct RequestStream {
    state: Arc<ConnectionState>,
    pending: Option<PendingRequest>,
    prefetch: u32,
    inner: Option<InboundStream>,
}

impl RequestStream {
    fn new(state: Arc<ConnectionState>, pending: PendingRequest) -> Self {
        let prefetch = state.config.prefetch;
        Self {
            state,
            pending: Some(pending),
            prefetch,
            inner: None,
        }
    }

    /// Overrides the connection's default prefetch. Has no effect once the
    /// stream has started.
    pub fn prefetch(mut self, prefetch: u32) -> Self {
        self.prefetch = prefetch.clamp(1, rsocket_protocol::MAX_REQUEST_N);
        self
    }

    /// The stream id, once started.
    pub fn stream_id(&self) -> Option<u32> {
        self.inner.as_ref().map(InboundStream::stream_id)
    }

    fn start(&self, pending: PendingRequest) -> Result<InboundStream, RSocketError> {
        let state = &self.state;
        let (tx, rx) = mpsc::unbounded_channel();
        match pending {
            PendingRequest::Stream(payload) => {
                let handler =
                    state.register(|id, token| StreamHandler::requester_stream(id, token, tx))?;
                state.queue.enqueue(
                    RequestFrame::request_stream(handler.stream_id(), self.prefetch, payload)
                        .into(),
                );
                Ok(InboundStream::requester(
                    state.clone(),
                    handler,
                    rx,
                    self.prefetch,
                ))
            }
            PendingRequest::Channel(payloads) => {
                let handler =
                    state.register(|id, token| StreamHandler::requester_channel(id, token, tx))?;
                tokio::spawn(send_channel(
                    state.clone(),
                    handler.clone(),
                    self.prefetch,
                    payloads,
                ));
                Ok(InboundStream::requester(
                    state.clone(),
                    handler,
                    rx,
                    self.prefetch,
                ))
            }
        }
    }
}

impl Stream for RequestStream {
    type Item = Result<Payload, RSocketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if let Some(pending) = this.pending.take() {
            match this.start(pending) {
                Ok(inner) => this.inner = Some(inner),
                Err(err) => return Poll::Ready(Some(Err(err))),
            }
        }
        match this.inner.as_mut() {
            Some(inner) => inner.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

/// Sends REQUEST_CHANNEL with the first outbound item, then the rest under
/// the channel's credit.
async fn send_channel(
    state: Arc<ConnectionState>,
    handler: Arc<StreamHandler>,
    prefetch: u32,
    mut payloads: PayloadStream,
) {
    let token = handler.token().clone();
    let stream_id = handler.stream_id();
    tokio::select! {
        biased;
        _ = token.cancelled() => {}
        _ = async {
            match payloads.next().await {
                Some(Ok(first)) => {
                    let request = RequestFrame::request_channel(stream_id, prefetch, first, false);
                    if handler.send_initial(&state, request.into()) {
                        drain_outbound(&state, &handler, payloads).await;
                    }
                }
                None => {
                    let request =
                        RequestFrame::request_channel(stream_id, prefetch, Payload::empty(), true);
                    if handler.send_initial(&state, request.into()) {
                        handler.close(&state, OUTBOUND);
                    }
                }
                Some(Err(err)) => {
                    // Nothing reached the peer yet.
                    handler.close(&state, BOTH);
                    handler.fail_inbound(err);
                }
            }
        } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::connection::Connection;
    use crate::rsocket::{EmptyRSocket, RSocket, RequestHandler};
    use crate::stream_id::Side;
    use crate::transport::{FrameReader, FrameWriter, LocalReader, LocalTransport, LocalWriter, Transport};
    use futures::stream;
    use rsocket_protocol::{FrameType, KeepAliveFrame};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn connect(server: impl RSocket) -> (Connection, Connection) {
        let (a, b) = LocalTransport::pair();
        let client = Connection::start(
            Side::Client,
            a,
            ConnectionConfig::default(),
            Arc::new(EmptyRSocket),
        );
        let server = Connection::start(Side::Server, b, ConnectionConfig::default(), Arc::new(server));
        (client, server)
    }

    fn client_with_raw_peer(config: ConnectionConfig) -> (Connection, LocalReader, LocalWriter) {
        let (a, b) = LocalTransport::pair();
        let client = Connection::start(Side::Client, a, config, Arc::new(EmptyRSocket));
        let (reader, writer) = b.split();
        (client, reader, writer)
    }

    async fn send(writer: &mut LocalWriter, frame: Frame) {
        writer
            .write_frame(frame.encode().unwrap().freeze())
            .await
            .unwrap();
    }

    async fn recv(reader: &mut LocalReader) -> Frame {
        let bytes = tokio::time::timeout(Duration::from_secs(1), reader.read_frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        Frame::decode(bytes).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn echo_handler() -> RequestHandler {
        RequestHandler::builder()
            .request_response(|payload| async move { Ok::<_, RSocketError>(payload) })
            .request_stream(|payload| {
                let count: usize = payload.data_utf8().and_then(|s| s.parse().ok()).unwrap_or(0);
                stream::iter((0..count).map(|i| Ok(Payload::from(i.to_string())))).boxed()
            })
            .request_channel(|initial, payloads| {
                stream::once(async move { Ok(initial) })
                    .chain(payloads)
                    .boxed()
            })
            .build()
    }

    #[tokio::test]
    async fn test_request_response_echo() {
        let (client, server) = connect(echo_handler());
        let response = client
            .requester()
            .request_response(Payload::from("HELLO"))
            .await
            .unwrap();
        assert_eq!(response.data_utf8(), Some("HELLO"));

        settle().await;
        assert_eq!(client.stream_count(), 0);
        assert_eq!(server.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_request_response_application_error() {
        let handler = RequestHandler::builder()
            .request_response(|_| async { Err::<Payload, _>(RSocketError::application("stub")) })
            .build();
        let (client, _server) = connect(handler);
        let err = client
            .requester()
            .request_response(Payload::from("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RSocketError::ApplicationError(ref m) if m == "stub"));
    }

    #[tokio::test]
    async fn test_request_response_metadata_roundtrip() {
        let (client, _server) = connect(echo_handler());
        let response = client
            .requester()
            .request_response(Payload::new("data").with_metadata("meta"))
            .await
            .unwrap();
        assert_eq!(response.metadata_utf8(), Some("meta"));
    }

    #[tokio::test]
    async fn test_request_stream_collects_all() {
        let (client, server) = connect(echo_handler());
        let items: Vec<_> = client
            .requester()
            .request_stream(Payload::from("10"))
            .prefetch(3)
            .collect()
            .await;
        assert_eq!(items.len(), 10);
        assert_eq!(items[9].as_ref().unwrap().data_utf8(), Some("9"));

        settle().await;
        assert_eq!(client.stream_count(), 0);
        assert_eq!(server.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_request_stream_take_sends_cancel_without_extra_credit() {
        let (client, mut reader, mut writer) = client_with_raw_peer(ConnectionConfig::default());
        let stream = client
            .requester()
            .request_stream(Payload::from("10"))
            .prefetch(2);
        let consumer = tokio::spawn(async move { stream.take(2).collect::<Vec<_>>().await });

        let stream_id = match recv(&mut reader).await {
            Frame::Request(request) => {
                assert_eq!(request.frame_type, FrameType::RequestStream);
                assert_eq!(request.initial_request, 2);
                request.stream_id
            }
            other => panic!("unexpected frame {:?}", other),
        };
        assert_eq!(stream_id, 1);
        send(&mut writer, RequestFrame::next(stream_id, Payload::from("0")).into()).await;
        send(&mut writer, RequestFrame::next(stream_id, Payload::from("1")).into()).await;

        let items = consumer.await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(recv(&mut reader).await, Frame::Cancel { stream_id });
        assert_eq!(client.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_request_stream_take_holds_back_responder() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let handler = RequestHandler::builder()
            .request_stream(move |_| {
                let counter = counter.clone();
                stream::iter(0..10)
                    .map(move |i| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Payload::from(i.to_string()))
                    })
                    .boxed()
            })
            .build();
        let (client, server) = connect(handler);

        let items: Vec<_> = client
            .requester()
            .request_stream(Payload::empty())
            .prefetch(2)
            .take(2)
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_ref().unwrap().data_utf8(), Some("1"));

        settle().await;
        // Two credited items plus at most one parked on the limiter.
        assert!(pulled.load(Ordering::SeqCst) <= 3);
        assert_eq!(client.stream_count(), 0);
        assert_eq!(server.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_request_stream_replenishes_credit() {
        let (client, mut reader, mut writer) = client_with_raw_peer(ConnectionConfig::default());
        let stream = client
            .requester()
            .request_stream(Payload::from("x"))
            .prefetch(2);
        let consumer = tokio::spawn(async move { stream.collect::<Vec<_>>().await });

        let stream_id = recv(&mut reader).await.stream_id();
        send(&mut writer, RequestFrame::next(stream_id, Payload::from("a")).into()).await;
        send(&mut writer, RequestFrame::next(stream_id, Payload::from("b")).into()).await;
        assert_eq!(recv(&mut reader).await, Frame::RequestN { stream_id, n: 2 });

        send(&mut writer, RequestFrame::next_complete(stream_id, Payload::from("c")).into()).await;
        let items = consumer.await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(client.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_request_stream_reassembles_fragments() {
        let (client, mut reader, mut writer) = client_with_raw_peer(ConnectionConfig::default());
        let stream = client.requester().request_stream(Payload::from("x"));
        let consumer = tokio::spawn(async move { stream.collect::<Vec<_>>().await });

        let stream_id = recv(&mut reader).await.stream_id();
        send(
            &mut writer,
            RequestFrame::next(stream_id, Payload::from("hel"))
                .with_follows()
                .into(),
        )
        .await;
        send(&mut writer, RequestFrame::next_complete(stream_id, Payload::from("lo")).into()).await;

        let items = consumer.await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().data_utf8(), Some("hello"));
    }

    #[tokio::test]
    async fn test_request_stream_error_terminates() {
        let handler = RequestHandler::builder()
            .request_stream(|_| {
                stream::iter(vec![
                    Ok(Payload::from("one")),
                    Err(RSocketError::application("broken")),
                ])
                .boxed()
            })
            .build();
        let (client, server) = connect(handler);
        let items: Vec<_> = client
            .requester()
            .request_stream(Payload::empty())
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(RSocketError::ApplicationError(ref m)) if m == "broken"));

        settle().await;
        assert_eq!(server.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_request_channel_echo() {
        let (client, server) = connect(echo_handler());
        let outbound = stream::iter(["a", "b", "c"].map(|s| Ok(Payload::from(s)))).boxed();
        let items: Vec<_> = client
            .requester()
            .request_channel(outbound)
            .collect()
            .await;
        let data: Vec<_> = items
            .iter()
            .map(|item| item.as_ref().unwrap().data_utf8().unwrap().to_string())
            .collect();
        assert_eq!(data, vec!["a", "b", "c"]);

        settle().await;
        assert_eq!(client.stream_count(), 0);
        assert_eq!(server.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_request_channel_cancel_cleans_up_both_sides() {
        let (client, server) = connect(echo_handler());
        let outbound = stream::iter(vec![Ok(Payload::from("first"))])
            .chain(stream::pending())
            .boxed();
        let mut channel = client.requester().request_channel(outbound);
        let first = channel.next().await.unwrap().unwrap();
        assert_eq!(first.data_utf8(), Some("first"));
        assert_eq!(server.stream_count(), 1);

        drop(channel);
        settle().await;
        assert_eq!(client.stream_count(), 0);
        assert_eq!(server.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_request_channel_empty_outbound_is_half_closed() {
        let (client, mut reader, _writer) = client_with_raw_peer(ConnectionConfig::default());
        let channel = client
            .requester()
            .request_channel(stream::empty().boxed());
        let _consumer = tokio::spawn(async move { channel.collect::<Vec<_>>().await });

        match recv(&mut reader).await {
            Frame::Request(request) => {
                assert_eq!(request.frame_type, FrameType::RequestChannel);
                assert!(request.complete);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_channel_responder_cancel_keeps_responses() {
        let handler = RequestHandler::builder()
            .request_channel(|initial, payloads| {
                let head = stream::once(async move { Ok(initial) }).chain(payloads.take(1));
                let tail = stream::iter((0..3).map(|i| Ok(Payload::from(format!("tail-{i}")))));
                head.chain(tail).boxed()
            })
            .build();
        let (client, server) = connect(handler);

        let sent = Arc::new(AtomicUsize::new(0));
        let counter = sent.clone();
        let outbound = stream::iter(0..)
            .map(move |i: u64| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Payload::from(i.to_string()))
            })
            .boxed();
        let items: Vec<_> = client
            .requester()
            .request_channel(outbound)
            .collect()
            .await;
        let data: Vec<_> = items
            .iter()
            .map(|item| item.as_ref().unwrap().data_utf8().unwrap().to_string())
            .collect();
        assert_eq!(data, vec!["0", "1", "tail-0", "tail-1", "tail-2"]);

        settle().await;
        let stopped_at = sent.load(Ordering::SeqCst);
        // First item, the default prefetch, and one pull parked on credit.
        assert!(stopped_at <= 2 + ConnectionConfig::default().prefetch as usize);
        settle().await;
        assert_eq!(sent.load(Ordering::SeqCst), stopped_at);
        assert_eq!(client.stream_count(), 0);
        assert_eq!(server.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_request_channel_dropped_before_first_item_sends_nothing() {
        let (client, mut reader, mut writer) = client_with_raw_peer(ConnectionConfig::default());
        let mut channel = client
            .requester()
            .request_channel(stream::pending().boxed());
        assert!(futures::poll!(channel.next()).is_pending());
        assert_eq!(client.stream_count(), 1);

        drop(channel);
        assert_eq!(client.stream_count(), 0);

        // The keepalive echo is the first and only frame the peer sees.
        send(&mut writer, Frame::KeepAlive(KeepAliveFrame::new(true))).await;
        assert!(matches!(recv(&mut reader).await, Frame::KeepAlive(_)));
        let next = tokio::time::timeout(Duration::from_millis(50), reader.read_frame()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_fire_and_forget_and_metadata_push() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let metadata_tx = tx.clone();
        let handler = RequestHandler::builder()
            .fire_and_forget(move |payload| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(format!("fnf:{}", payload.data_utf8().unwrap_or("")));
                    Ok::<_, RSocketError>(())
                }
            })
            .metadata_push(move |metadata| {
                let tx = metadata_tx.clone();
                async move {
                    let _ = tx.send(format!("push:{}", String::from_utf8_lossy(&metadata)));
                    Ok::<_, RSocketError>(())
                }
            })
            .build();
        let (client, server) = connect(handler);
        let requester = client.requester();
        requester.fire_and_forget(Payload::from("ping")).await.unwrap();
        requester
            .metadata_push(Bytes::from_static(b"routes"))
            .await
            .unwrap();

        let mut received = Vec::new();
        for _ in 0..2 {
            let item = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            received.push(item);
        }
        received.sort();
        assert_eq!(received, vec!["fnf:ping", "push:routes"]);
        assert_eq!(client.stream_count(), 0);
        assert_eq!(server.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_request_response_drop_sends_cancel() {
        let (client, mut reader, _writer) = client_with_raw_peer(ConnectionConfig::default());
        let requester = client.requester();
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            requester.request_response(Payload::from("slow")),
        )
        .await;
        assert!(result.is_err());

        let stream_id = recv(&mut reader).await.stream_id();
        assert_eq!(recv(&mut reader).await, Frame::Cancel { stream_id });
        assert_eq!(client.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_requests_fail_after_close() {
        let (client, _server) = connect(echo_handler());
        let requester = client.requester();
        client.close();
        assert!(!requester.is_active());

        assert!(matches!(
            requester.request_response(Payload::from("x")).await,
            Err(RSocketError::ConnectionClosed)
        ));
        assert!(requester.fire_and_forget(Payload::from("x")).await.is_err());
        assert!(requester.metadata_push(Bytes::new()).await.is_err());

        let mut stream = requester.request_stream(Payload::from("3"));
        assert!(matches!(
            stream.next().await,
            Some(Err(RSocketError::ConnectionClosed))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_connection_loss_fails_pending_requests() {
        let (client, reader, writer) = client_with_raw_peer(ConnectionConfig::default());
        let requester = client.requester();
        let pending = tokio::spawn(async move { requester.request_response(Payload::from("x")).await });
        settle().await;

        drop(reader);
        drop(writer);
        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(client.stream_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_timeout_closes_connection() {
        let config = ConnectionConfig::default()
            .with_keepalive(Duration::from_secs(1), Duration::from_secs(3));
        let (client, _reader, _writer) = client_with_raw_peer(config);

        let cause = tokio::time::timeout(Duration::from_secs(10), client.closed())
            .await
            .unwrap();
        assert!(matches!(cause, RSocketError::KeepAliveTimeout(d) if d == Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_client_and_server_ids_do_not_collide() {
        let (client, server) = connect(echo_handler());
        let client_side = client.requester();
        let server_side = server.requester();
        // The client serves nothing, so the server's request is rejected.
        let (a, b) = tokio::join!(
            client_side.request_response(Payload::from("up")),
            server_side.request_response(Payload::from("down")),
        );
        assert_eq!(a.unwrap().data_utf8(), Some("up"));
        assert!(matches!(b, Err(RSocketError::ApplicationError(_))));
    }
}
