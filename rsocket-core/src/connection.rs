//! Connection driver.
//!
//! A connection owns the stream registry, the outbound queue and the id
//! allocator, and runs three tasks for its lifetime:
//!
//! - the outbound loop, draining the queue into the transport writer
//! - the inbound loop, decoding frames and routing them by stream id
//! - the keepalive loop
//!
//! Teardown is idempotent: the first cause is stored and every later
//! operation fails fast with it.

use crate::config::ConnectionConfig;
use crate::error::RSocketError;
use crate::handler::StreamHandler;
use crate::keepalive::{self, KeepAlive};
use crate::queue::{frame_queue, FrameQueue, FrameReceiver};
use crate::registry::StreamRegistry;
use crate::requester::Requester;
use crate::responder;
use crate::rsocket::RSocket;
use crate::stream_id::{Side, StreamIdAllocator};
use crate::transport::{FrameReader, FrameWriter, Transport};
use rsocket_protocol::{Frame, SetupFrame};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// State shared by the loops, requesters, responder tasks and handlers.
pub(crate) struct ConnectionState {
    pub(crate) side: Side,
    pub(crate) config: ConnectionConfig,
    pub(crate) registry: StreamRegistry<StreamHandler>,
    pub(crate) queue: FrameQueue,
    pub(crate) ids: StreamIdAllocator,
    pub(crate) token: CancellationToken,
    pub(crate) keepalive: KeepAlive,
    pub(crate) rsocket: Arc<dyn RSocket>,
    terminal: OnceLock<RSocketError>,
}

impl ConnectionState {
    fn new(
        side: Side,
        config: ConnectionConfig,
        rsocket: Arc<dyn RSocket>,
        queue: FrameQueue,
    ) -> Self {
        Self {
            side,
            config,
            registry: StreamRegistry::new(),
            queue,
            ids: StreamIdAllocator::for_side(side),
            token: CancellationToken::new(),
            keepalive: KeepAlive::new(),
            rsocket,
            terminal: OnceLock::new(),
        }
    }

    pub(crate) fn terminal_error(&self) -> Option<RSocketError> {
        self.terminal.get().cloned()
    }

    /// Fails with the terminal cause once the connection is closed.
    pub(crate) fn check_active(&self) -> Result<(), RSocketError> {
        match self.terminal.get() {
            Some(cause) => Err(cause.clone()),
            None => Ok(()),
        }
    }

    /// Allocates an id and registers the handler built for it.
    pub(crate) fn register(
        &self,
        build: impl FnOnce(u32, CancellationToken) -> StreamHandler,
    ) -> Result<Arc<StreamHandler>, RSocketError> {
        self.check_active()?;
        let stream_id = self.ids.next(|id| self.registry.contains(id));
        let handler = Arc::new(build(stream_id, self.token.child_token()));
        if !self.registry.insert(stream_id, handler.clone()) {
            return Err(RSocketError::Protocol(format!(
                "stream id {stream_id} already in use"
            )));
        }
        // Teardown may have drained the registry between the check and the insert.
        if let Err(cause) = self.check_active() {
            self.registry.remove(stream_id);
            return Err(cause);
        }
        Ok(handler)
    }

    /// Sends ERROR(0) describing `cause` to the peer, then tears down.
    pub(crate) fn terminate(&self, cause: RSocketError) {
        if self.terminal.get().is_none() {
            self.queue
                .enqueue_prioritized(Frame::error(0, cause.error_code(), cause.message()));
        }
        self.teardown(cause);
    }

    /// Fails every stream, stops every task and closes the queue.
    pub(crate) fn teardown(&self, cause: RSocketError) {
        if self.terminal.set(cause.clone()).is_err() {
            return;
        }
        tracing::debug!(
            "connection terminated: {} ({} active streams)",
            cause,
            self.registry.len()
        );
        self.token.cancel();
        for handler in self.registry.drain() {
            handler.cleanup(self, &cause);
        }
        self.queue.close(cause);
    }

    fn dispatch(self: &Arc<Self>, frame: Frame) {
        match frame {
            Frame::KeepAlive(keepalive) => keepalive::handle_frame(self, keepalive),
            Frame::MetadataPush { metadata } => {
                let rsocket = self.rsocket.clone();
                let token = self.token.child_token();
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {}
                        result = rsocket.metadata_push(metadata) => {
                            if let Err(e) = result {
                                tracing::warn!("metadata push failed: {}", e);
                            }
                        }
                    }
                });
            }
            Frame::Setup(_) => tracing::debug!("ignoring SETUP on established connection"),
            Frame::Lease(_) => tracing::debug!("ignoring LEASE"),
            Frame::Error(error) if error.stream_id == 0 => {
                tracing::debug!("peer closed connection: {} {}", error.code, error.message);
                self.teardown(RSocketError::from_error_frame(error.code, error.message));
            }
            Frame::Error(error) => match self.registry.get(error.stream_id) {
                Some(handler) => handler.handle_error(
                    self,
                    RSocketError::from_error_frame(error.code, error.message),
                ),
                None => tracing::debug!("stream {}: ERROR for unknown stream", error.stream_id),
            },
            Frame::RequestN { stream_id, n } => {
                if let Some(handler) = self.registry.get(stream_id) {
                    handler.handle_request_n(n);
                }
            }
            Frame::Cancel { stream_id } => match self.registry.get(stream_id) {
                Some(handler) => handler.handle_cancel(self),
                None => tracing::debug!("stream {}: CANCEL for unknown stream", stream_id),
            },
            Frame::Request(request) => match self.registry.get(request.stream_id) {
                Some(handler) if request.frame_type.is_request_type() => {
                    tracing::debug!(
                        "stream {}: ignoring {:?}, stream already active as {:?}",
                        request.stream_id,
                        request.frame_type,
                        handler.kind()
                    );
                }
                Some(handler) => handler.handle_request(self, request),
                None if request.frame_type.is_request_type() => responder::accept(self, request),
                None => tracing::debug!(
                    "stream {}: dropping PAYLOAD for unknown stream",
                    request.stream_id
                ),
            },
        }
    }
}

/// A running RSocket connection.
pub struct Connection {
    state: Arc<ConnectionState>,
}

impl Connection {
    /// Starts a connection over `transport`, serving peer requests with
    /// `rsocket`.
    pub fn start<T: Transport>(
        side: Side,
        transport: T,
        config: ConnectionConfig,
        rsocket: Arc<dyn RSocket>,
    ) -> Self {
        let (reader, writer) = transport.split();
        Self::start_split(side, reader, writer, config, rsocket, None)
    }

    /// Client connection that sends `setup` before any other frame.
    pub fn start_client<T: Transport>(
        transport: T,
        setup: SetupFrame,
        config: ConnectionConfig,
        rsocket: Arc<dyn RSocket>,
    ) -> Self {
        let (reader, writer) = transport.split();
        Self::start_split(Side::Client, reader, writer, config, rsocket, Some(setup))
    }

    /// Starts a connection over already split transport halves.
    pub fn start_split<R: FrameReader, W: FrameWriter>(
        side: Side,
        reader: R,
        writer: W,
        config: ConnectionConfig,
        rsocket: Arc<dyn RSocket>,
        setup: Option<SetupFrame>,
    ) -> Self {
        let (queue, receiver) = frame_queue();
        let state = Arc::new(ConnectionState::new(side, config, rsocket, queue));
        if let Some(setup) = setup {
            state.queue.enqueue_prioritized(Frame::Setup(setup));
        }

        tokio::spawn(outbound_loop(state.clone(), receiver, writer));
        tokio::spawn(inbound_loop(state.clone(), reader));
        tokio::spawn(keepalive::run(state.clone()));

        Self { state }
    }

    /// Handle for initiating requests to the peer.
    pub fn requester(&self) -> Requester {
        Requester::new(self.state.clone())
    }

    pub fn side(&self) -> Side {
        self.state.side
    }

    /// Closes the connection, notifying the peer with CONNECTION_CLOSE.
    pub fn close(&self) {
        self.state.terminate(RSocketError::ConnectionClosed);
    }

    /// Waits until the connection is terminated and returns the cause.
    pub async fn closed(&self) -> RSocketError {
        self.state.token.cancelled().await;
        self.state
            .terminal_error()
            .unwrap_or(RSocketError::ConnectionClosed)
    }

    pub fn is_active(&self) -> bool {
        self.state.terminal_error().is_none()
    }

    pub fn terminal_error(&self) -> Option<RSocketError> {
        self.state.terminal_error()
    }

    /// Number of streams currently registered.
    pub fn stream_count(&self) -> usize {
        self.state.registry.len()
    }

    /// Ids of the streams currently registered.
    pub fn stream_ids(&self) -> Vec<u32> {
        self.state.registry.ids()
    }
}

async fn outbound_loop<W: FrameWriter>(
    state: Arc<ConnectionState>,
    mut receiver: FrameReceiver,
    mut writer: W,
) {
    while let Ok(frame) = receiver.dequeue().await {
        let bytes = match frame.encode() {
            Ok(bytes) => bytes.freeze(),
            Err(e) => {
                tracing::warn!(
                    "stream {}: dropping unencodable {:?}: {}",
                    frame.stream_id(),
                    frame.frame_type(),
                    e
                );
                continue;
            }
        };
        if let Err(e) = writer.write_frame(bytes).await {
            tracing::debug!("write failed: {}", e);
            state.teardown(e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn inbound_loop<R: FrameReader>(state: Arc<ConnectionState>, mut reader: R) {
    loop {
        let read = tokio::select! {
            biased;
            _ = state.token.cancelled() => break,
            read = reader.read_frame() => read,
        };
        let bytes = match read {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                state.teardown(RSocketError::ConnectionClosed);
                break;
            }
            Err(e) => {
                state.teardown(e);
                break;
            }
        };
        match Frame::decode(bytes) {
            Ok(frame) => state.dispatch(frame),
            Err(e) if e.is_ignorable() => {
                tracing::debug!("ignoring frame: {}", e);
            }
            Err(e) => {
                tracing::warn!("invalid frame from peer: {}", e);
                state.terminate(RSocketError::ConnectionError(e.to_string()));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rsocket::{EmptyRSocket, RequestHandler};
    use crate::transport::{LocalReader, LocalTransport, LocalWriter};
    use bytes::Bytes;
    use futures::stream::{self, StreamExt};
    use rsocket_protocol::{ErrorCode, KeepAliveFrame, Payload, RequestFrame};
    use std::time::Duration;

    /// Local connection plus the raw peer end of the transport.
    fn raw_peer(side: Side) -> (Connection, LocalReader, LocalWriter) {
        let (local, remote) = LocalTransport::pair();
        let connection = Connection::start(
            side,
            local,
            ConnectionConfig::default(),
            Arc::new(EmptyRSocket),
        );
        let (reader, writer) = remote.split();
        (connection, reader, writer)
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

    #[tokio::test]
    async fn test_keepalive_is_echoed() {
        let (_connection, mut reader, mut writer) = raw_peer(Side::Server);
        send(&mut writer, Frame::KeepAlive(KeepAliveFrame::new(true))).await;
        assert_eq!(
            recv(&mut reader).await,
            Frame::KeepAlive(KeepAliveFrame::new(false))
        );
    }

    #[tokio::test]
    async fn test_unimplemented_request_is_rejected() {
        let (connection, mut reader, mut writer) = raw_peer(Side::Server);
        send(
            &mut writer,
            RequestFrame::request_response(1, Payload::from("x")).into(),
        )
        .await;
        match recv(&mut reader).await {
            Frame::Error(error) => {
                assert_eq!(error.stream_id, 1);
                assert_eq!(error.code, ErrorCode::ApplicationError);
            }
            other => panic!("unexpected frame {:?}", other),
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connection.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_request_with_local_parity_is_ignored() {
        let (connection, mut reader, mut writer) = raw_peer(Side::Server);
        send(
            &mut writer,
            RequestFrame::request_response(2, Payload::from("x")).into(),
        )
        .await;
        send(&mut writer, Frame::KeepAlive(KeepAliveFrame::new(true))).await;
        // The keepalive echo is the only response.
        assert!(matches!(recv(&mut reader).await, Frame::KeepAlive(_)));
        assert_eq!(connection.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_request_n_keeps_connection() {
        let handler = RequestHandler::builder()
            .request_stream(|_| {
                stream::iter((0..3).map(|i| Ok(Payload::from(i.to_string())))).boxed()
            })
            .build();
        let (local, remote) = LocalTransport::pair();
        let connection = Connection::start(
            Side::Server,
            local,
            ConnectionConfig::default(),
            Arc::new(handler),
        );
        let (mut reader, mut writer) = remote.split();

        // REQUEST_STREAM with no initial credit, then REQUEST_N(0)
        writer
            .write_frame(Bytes::from_static(&[0, 0, 0, 1, 0x18, 0x00, 0, 0, 0, 0]))
            .await
            .unwrap();
        writer
            .write_frame(Bytes::from_static(&[0, 0, 0, 1, 0x20, 0x00, 0, 0, 0, 0]))
            .await
            .unwrap();
        send(&mut writer, Frame::KeepAlive(KeepAliveFrame::new(true))).await;

        // Nothing is emitted without credit.
        assert!(matches!(recv(&mut reader).await, Frame::KeepAlive(_)));
        assert!(connection.is_active());
        assert_eq!(connection.stream_ids(), vec![1]);

        send(&mut writer, Frame::RequestN { stream_id: 1, n: 3 }).await;
        for i in 0..3 {
            match recv(&mut reader).await {
                Frame::Request(frame) => {
                    assert_eq!(frame.stream_id, 1);
                    assert_eq!(frame.payload.data_utf8(), Some(i.to_string().as_str()));
                }
                other => panic!("unexpected frame {:?}", other),
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(connection.is_active());
    }

    #[tokio::test]
    async fn test_zero_stream_error_tears_down() {
        let (connection, _reader, mut writer) = raw_peer(Side::Client);
        send(
            &mut writer,
            Frame::error(0, ErrorCode::ConnectionError, "boom"),
        )
        .await;
        let cause = tokio::time::timeout(Duration::from_secs(1), connection.closed())
            .await
            .unwrap();
        assert!(matches!(cause, RSocketError::ConnectionError(ref m) if m == "boom"));
        assert!(!connection.is_active());
    }

    #[tokio::test]
    async fn test_invalid_frame_sends_connection_error() {
        let (connection, mut reader, mut writer) = raw_peer(Side::Client);
        writer
            .write_frame(bytes::Bytes::from_static(&[0, 0, 0, 1, 0x40, 0x00]))
            .await
            .unwrap();
        match recv(&mut reader).await {
            Frame::Error(error) => {
                assert_eq!(error.stream_id, 0);
                assert_eq!(error.code, ErrorCode::ConnectionError);
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert!(connection.closed().await.is_connection_error());
    }

    #[tokio::test]
    async fn test_transport_eof_tears_down() {
        let (connection, reader, mut writer) = raw_peer(Side::Client);
        drop(reader);
        writer.shutdown().await.unwrap();
        let cause = tokio::time::timeout(Duration::from_secs(1), connection.closed())
            .await
            .unwrap();
        assert!(matches!(cause, RSocketError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_close_notifies_peer() {
        let (connection, mut reader, _writer) = raw_peer(Side::Client);
        connection.close();
        match recv(&mut reader).await {
            Frame::Error(error) => assert_eq!(error.code, ErrorCode::ConnectionClose),
            other => panic!("unexpected frame {:?}", other),
        }
        // Writer is shut down after the queue drains.
        let end = tokio::time::timeout(Duration::from_secs(1), reader.read_frame())
            .await
            .unwrap()
            .unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_setup_sent_first() {
        let (local, remote) = LocalTransport::pair();
        let setup = SetupFrame::new(Duration::from_secs(20), Duration::from_secs(90));
        let _connection = Connection::start_client(
            local,
            setup.clone(),
            ConnectionConfig::default(),
            Arc::new(EmptyRSocket),
        );
        let (mut reader, _writer) = remote.split();
        assert_eq!(recv(&mut reader).await, Frame::Setup(setup));
    }

    #[tokio::test]
    async fn test_register_fails_after_teardown() {
        let (connection, _reader, _writer) = raw_peer(Side::Client);
        connection.close();
        let result = connection.state.register(|id, token| {
            let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
            StreamHandler::requester_stream(id, token, tx)
        });
        assert!(matches!(result, Err(RSocketError::ConnectionClosed)));
        assert_eq!(connection.stream_count(), 0);
    }
}
