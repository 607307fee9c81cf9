//! Runs the application handler for streams opened by the peer.

use crate::connection::ConnectionState;
use crate::handler::{drain_outbound, error_frame, StreamHandler, StreamKind, BOTH, INBOUND, OUTBOUND};
use crate::inbound::InboundStream;
use futures::StreamExt;
use rsocket_protocol::{Payload, RequestFrame};
use std::sync::Arc;

/// Registers a handler for a request frame received from the peer.
pub(crate) fn accept(state: &Arc<ConnectionState>, frame: RequestFrame) {
    let stream_id = frame.stream_id;
    if state.side.owns(stream_id) {
        tracing::debug!(
            "stream {}: ignoring {:?} carrying a locally owned id",
            stream_id,
            frame.frame_type
        );
        return;
    }
    let Some(kind) = StreamKind::for_request(&frame) else {
        tracing::debug!(
            "stream {}: dropping {:?} for unknown stream",
            stream_id,
            frame.frame_type
        );
        return;
    };

    let handler = Arc::new(StreamHandler::responder(
        stream_id,
        kind,
        frame.initial_request,
        state.token.child_token(),
    ));
    if !state.registry.insert(stream_id, handler.clone()) {
        tracing::debug!("stream {}: already active", stream_id);
        return;
    }
    tracing::debug!("stream {}: accepted {:?}", stream_id, kind);
    handler.handle_request(state, frame);
}

/// Starts the application work once the request payload is assembled.
pub(crate) fn start(state: &Arc<ConnectionState>, handler: Arc<StreamHandler>, payload: Payload) {
    let rsocket = state.rsocket.clone();
    let token = handler.token().clone();
    let stream_id = handler.stream_id();

    match handler.kind() {
        StreamKind::ResponderFireAndForget => {
            handler.close(state, BOTH);
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {}
                    result = rsocket.fire_and_forget(payload) => {
                        if let Err(e) = result {
                            tracing::warn!("stream {}: fire and forget failed: {}", stream_id, e);
                        }
                    }
                }
            });
        }
        StreamKind::ResponderResponse => {
            handler.close(state, INBOUND);
            let state = state.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    result = rsocket.request_response(payload) => result,
                };
                if handler.close(&state, OUTBOUND) & OUTBOUND == 0 {
                    return;
                }
                let frame = match result {
                    Ok(payload) => RequestFrame::next_complete(stream_id, payload).into(),
                    Err(e) => error_frame(stream_id, &e),
                };
                state.queue.enqueue(frame);
            });
        }
        StreamKind::ResponderStream => {
            handler.close(state, INBOUND);
            let payloads = rsocket.request_stream(payload);
            spawn_drain(state.clone(), handler, payloads);
        }
        StreamKind::ResponderChannel => {
            let Some(source) = handler.take_inbound_source() else {
                return;
            };
            let inbound =
                InboundStream::responder(state.clone(), handler.clone(), source, state.config.prefetch);
            let payloads = rsocket.request_channel(payload, inbound.boxed());
            spawn_drain(state.clone(), handler, payloads);
        }
        StreamKind::RequesterResponse
        | StreamKind::RequesterStream
        | StreamKind::RequesterChannel => {}
    }
}

fn spawn_drain(
    state: Arc<ConnectionState>,
    handler: Arc<StreamHandler>,
    payloads: crate::rsocket::PayloadStream,
) {
    let token = handler.token().clone();
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            _ = drain_outbound(&state, &handler, payloads) => {}
        }
    });
}
