//! Per-stream state: fragment reassembly, direction lifecycle and the
//! dispatch of inbound frames for each interaction kind and role.

use crate::connection::ConnectionState;
use crate::error::RSocketError;
use crate::limiter::Limiter;
use crate::responder;
use crate::rsocket::PayloadStream;
use bytes::BytesMut;
use futures::StreamExt;
use parking_lot::Mutex;
use rsocket_protocol::{ErrorCode, Frame, Payload, RequestFrame};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Peer-to-local direction.
pub(crate) const INBOUND: u8 = 0b01;
/// Local-to-peer direction.
pub(crate) const OUTBOUND: u8 = 0b10;
pub(crate) const BOTH: u8 = INBOUND | OUTBOUND;

pub(crate) type InboundSink = mpsc::UnboundedSender<Result<Payload, RSocketError>>;
pub(crate) type InboundSource = mpsc::UnboundedReceiver<Result<Payload, RSocketError>>;
pub(crate) type ResponseSender = oneshot::Sender<Result<Payload, RSocketError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    RequesterResponse,
    RequesterStream,
    RequesterChannel,
    ResponderFireAndForget,
    ResponderResponse,
    ResponderStream,
    ResponderChannel,
}

impl StreamKind {
    pub(crate) fn for_request(frame: &RequestFrame) -> Option<Self> {
        use rsocket_protocol::FrameType;
        match frame.frame_type {
            FrameType::RequestFnf => Some(StreamKind::ResponderFireAndForget),
            FrameType::RequestResponse => Some(StreamKind::ResponderResponse),
            FrameType::RequestStream => Some(StreamKind::ResponderStream),
            FrameType::RequestChannel => Some(StreamKind::ResponderChannel),
            _ => None,
        }
    }

    /// Directions with nothing to carry from the start.
    fn initially_closed(&self) -> u8 {
        match self {
            StreamKind::RequesterResponse | StreamKind::RequesterStream => OUTBOUND,
            StreamKind::ResponderFireAndForget => OUTBOUND,
            _ => 0,
        }
    }

    fn has_outbound_credit(&self) -> bool {
        matches!(
            self,
            StreamKind::RequesterChannel | StreamKind::ResponderStream | StreamKind::ResponderChannel
        )
    }
}

#[derive(Default)]
struct Assembler {
    data: BytesMut,
    metadata: Option<BytesMut>,
    pending: bool,
}

impl Assembler {
    fn append(&mut self, payload: Payload) {
        self.pending = true;
        self.data.extend_from_slice(&payload.data);
        if let Some(metadata) = payload.metadata {
            self.metadata
                .get_or_insert_with(BytesMut::new)
                .extend_from_slice(&metadata);
        }
    }

    fn take(&mut self) -> Option<Payload> {
        if !self.pending {
            return None;
        }
        self.pending = false;
        Some(Payload {
            data: self.data.split().freeze(),
            metadata: self.metadata.take().map(BytesMut::freeze),
        })
    }
}

/// One registered stream.
pub(crate) struct StreamHandler {
    stream_id: u32,
    kind: StreamKind,
    closed: AtomicU8,
    started: AtomicBool,
    initiated: Mutex<bool>,
    assembler: Mutex<Assembler>,
    limiter: Limiter,
    token: CancellationToken,
    inbound: Mutex<Option<InboundSink>>,
    inbound_source: Mutex<Option<InboundSource>>,
    response: Mutex<Option<ResponseSender>>,
}

impl StreamHandler {
    fn new(stream_id: u32, kind: StreamKind, token: CancellationToken, credit: u32) -> Self {
        Self {
            stream_id,
            kind,
            closed: AtomicU8::new(kind.initially_closed()),
            started: AtomicBool::new(false),
            initiated: Mutex::new(kind != StreamKind::RequesterChannel),
            assembler: Mutex::new(Assembler::default()),
            limiter: Limiter::new(credit),
            token,
            inbound: Mutex::new(None),
            inbound_source: Mutex::new(None),
            response: Mutex::new(None),
        }
    }

    pub(crate) fn requester_response(
        stream_id: u32,
        token: CancellationToken,
        response: ResponseSender,
    ) -> Self {
        let handler = Self::new(stream_id, StreamKind::RequesterResponse, token, 0);
        *handler.response.lock() = Some(response);
        handler
    }

    pub(crate) fn requester_stream(
        stream_id: u32,
        token: CancellationToken,
        inbound: InboundSink,
    ) -> Self {
        let handler = Self::new(stream_id, StreamKind::RequesterStream, token, 0);
        *handler.inbound.lock() = Some(inbound);
        handler
    }

    /// Outbound credit starts at zero; the responder grants it with REQUEST_N.
    /// The peer learns of the stream only through [`Self::send_initial`].
    pub(crate) fn requester_channel(
        stream_id: u32,
        token: CancellationToken,
        inbound: InboundSink,
    ) -> Self {
        let handler = Self::new(stream_id, StreamKind::RequesterChannel, token, 0);
        *handler.inbound.lock() = Some(inbound);
        handler
    }

    /// Handler for a stream opened by the peer.
    pub(crate) fn responder(
        stream_id: u32,
        kind: StreamKind,
        initial_request: u32,
        token: CancellationToken,
    ) -> Self {
        let handler = Self::new(stream_id, kind, token, initial_request);
        if kind == StreamKind::ResponderChannel {
            let (tx, rx) = mpsc::unbounded_channel();
            *handler.inbound.lock() = Some(tx);
            *handler.inbound_source.lock() = Some(rx);
        }
        handler
    }

    pub(crate) fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub(crate) fn kind(&self) -> StreamKind {
        self.kind
    }

    pub(crate) fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn take_inbound_source(&self) -> Option<InboundSource> {
        self.inbound_source.lock().take()
    }

    pub(crate) fn is_closed(&self, side: u8) -> bool {
        self.closed.load(Ordering::Acquire) & side == side
    }

    /// Closes the given directions and deregisters the stream once both are
    /// closed. Returns the directions that were still open.
    pub(crate) fn close(&self, state: &ConnectionState, sides: u8) -> u8 {
        let previous = self.closed.fetch_or(sides, Ordering::AcqRel);
        if previous != BOTH && previous | sides == BOTH {
            state.registry.remove(self.stream_id);
        }
        sides & !previous
    }

    /// Enqueues the frame that opens a locally initiated stream, unless the
    /// stream was already closed locally.
    pub(crate) fn send_initial(&self, state: &ConnectionState, frame: Frame) -> bool {
        let mut initiated = self.initiated.lock();
        if self.is_closed(BOTH) {
            return false;
        }
        state.queue.enqueue(frame);
        *initiated = true;
        true
    }

    /// Closes `sides` on behalf of the local consumer. CANCEL is sent only
    /// if the peer knows the stream and its inbound direction was open.
    pub(crate) fn cancel_locally(&self, state: &ConnectionState, sides: u8) -> bool {
        let initiated = self.initiated.lock();
        let open = self.close(state, sides);
        if sides & OUTBOUND != 0 {
            self.stop_outbound();
        }
        let notify = *initiated && open & INBOUND != 0;
        if notify {
            state.queue.enqueue(Frame::Cancel {
                stream_id: self.stream_id,
            });
        }
        notify
    }

    /// Stops local production for this stream.
    pub(crate) fn stop_outbound(&self) {
        self.token.cancel();
        self.limiter.cancel();
    }

    fn push_inbound(&self, payload: Payload) {
        if let Some(sink) = self.inbound.lock().as_ref() {
            let _ = sink.send(Ok(payload));
        }
    }

    fn complete_inbound(&self) {
        self.inbound.lock().take();
    }

    pub(crate) fn fail_inbound(&self, err: RSocketError) {
        if let Some(sink) = self.inbound.lock().take() {
            let _ = sink.send(Err(err));
        }
    }

    fn fail_response(&self, err: RSocketError) {
        if let Some(response) = self.response.lock().take() {
            let _ = response.send(Err(err));
        }
    }

    /// Routes a payload-carrying frame, reassembling fragments first.
    pub(crate) fn handle_request(self: &Arc<Self>, state: &Arc<ConnectionState>, frame: RequestFrame) {
        if self.is_closed(INBOUND) {
            tracing::debug!(
                "stream {}: dropping {:?} after inbound completion",
                self.stream_id,
                frame.frame_type
            );
            return;
        }

        let complete = frame.complete;
        let assembled = {
            let mut assembler = self.assembler.lock();
            let carries_data =
                frame.next || frame.frame_type.is_request_type() || assembler.pending;
            if !carries_data {
                None
            } else if frame.follows && !complete {
                assembler.append(frame.payload);
                return;
            } else if assembler.pending {
                assembler.append(frame.payload);
                assembler.take()
            } else {
                Some(frame.payload)
            }
        };

        if let Some(payload) = assembled {
            self.on_next(state, payload);
        }
        if complete {
            self.on_complete(state);
        }
    }

    fn on_next(self: &Arc<Self>, state: &Arc<ConnectionState>, payload: Payload) {
        match self.kind {
            StreamKind::ResponderFireAndForget
            | StreamKind::ResponderResponse
            | StreamKind::ResponderStream
            | StreamKind::ResponderChannel => {
                if !self.started.swap(true, Ordering::AcqRel) {
                    responder::start(state, self.clone(), payload);
                } else if self.kind == StreamKind::ResponderChannel {
                    self.push_inbound(payload);
                } else {
                    tracing::debug!("stream {}: ignoring extra request payload", self.stream_id);
                }
            }
            StreamKind::RequesterResponse => {
                if let Some(response) = self.response.lock().take() {
                    let _ = response.send(Ok(payload));
                }
                self.close(state, INBOUND);
            }
            StreamKind::RequesterStream | StreamKind::RequesterChannel => {
                self.push_inbound(payload);
            }
        }
    }

    fn on_complete(&self, state: &ConnectionState) {
        match self.kind {
            StreamKind::RequesterResponse => {
                if let Some(response) = self.response.lock().take() {
                    let _ = response.send(Ok(Payload::empty()));
                }
                self.close(state, INBOUND);
            }
            StreamKind::RequesterStream
            | StreamKind::RequesterChannel
            | StreamKind::ResponderChannel => {
                self.complete_inbound();
                self.close(state, INBOUND);
            }
            _ => {
                tracing::debug!("stream {}: ignoring completion", self.stream_id);
            }
        }
    }

    pub(crate) fn handle_request_n(&self, n: u32) {
        if self.kind.has_outbound_credit() {
            self.limiter.update_requests(n);
        } else {
            tracing::debug!("stream {}: ignoring REQUEST_N({})", self.stream_id, n);
        }
    }

    pub(crate) fn handle_cancel(&self, state: &ConnectionState) {
        match self.kind {
            // The responder stopped consuming what we send.
            StreamKind::RequesterChannel => {
                self.close(state, OUTBOUND);
                self.stop_outbound();
            }
            StreamKind::RequesterResponse | StreamKind::RequesterStream => {
                tracing::debug!("stream {}: ignoring CANCEL from responder", self.stream_id);
            }
            _ => {
                self.close(state, BOTH);
                self.stop_outbound();
                self.fail_inbound(RSocketError::Canceled(
                    "stream canceled by requester".to_string(),
                ));
            }
        }
    }

    pub(crate) fn handle_error(&self, state: &ConnectionState, err: RSocketError) {
        self.close(state, BOTH);
        self.stop_outbound();
        self.fail_inbound(err.clone());
        self.fail_response(err);
    }

    /// Terminates the stream because of a local failure. Returns true if
    /// an ERROR frame should be sent to the peer.
    pub(crate) fn fail(&self, state: &ConnectionState, err: RSocketError) -> bool {
        let open = self.close(state, BOTH);
        self.stop_outbound();
        self.fail_inbound(err);
        open & OUTBOUND != 0
    }

    /// Fails the stream with a connection-level cause during teardown.
    pub(crate) fn cleanup(&self, state: &ConnectionState, cause: &RSocketError) {
        self.close(state, BOTH);
        self.stop_outbound();
        self.fail_inbound(cause.clone());
        self.fail_response(cause.clone());
    }
}

/// ERROR frame reporting `err` on a stream. Connection-level codes are not
/// allowed on streams and become APPLICATION_ERROR.
pub(crate) fn error_frame(stream_id: u32, err: &RSocketError) -> Frame {
    let code = match err.error_code() {
        code if code.is_connection_level() => ErrorCode::ApplicationError,
        code => code,
    };
    Frame::error(stream_id, code, err.message())
}

/// Sends every item of `payloads` as PAYLOAD(NEXT), one credit each, then
/// PAYLOAD(COMPLETE) or ERROR.
pub(crate) async fn drain_outbound(
    state: &Arc<ConnectionState>,
    handler: &Arc<StreamHandler>,
    mut payloads: PayloadStream,
) {
    let stream_id = handler.stream_id();
    while let Some(item) = payloads.next().await {
        match item {
            Ok(payload) => {
                if handler.limiter().acquire().await.is_err() || handler.is_closed(OUTBOUND) {
                    return;
                }
                state
                    .queue
                    .enqueue(RequestFrame::next(stream_id, payload).into());
            }
            Err(err) => {
                if handler.fail(state, err.clone()) {
                    state.queue.enqueue(error_frame(stream_id, &err));
                }
                return;
            }
        }
    }
    if handler.close(state, OUTBOUND) & OUTBOUND != 0 {
        state.queue.enqueue(RequestFrame::complete(stream_id).into());
    }
}
