//! Consumer side of a stream: hands payloads to the application and
//! grants the peer more credit as they are consumed.

use crate::connection::ConnectionState;
use crate::error::RSocketError;
use crate::handler::{InboundSource, StreamHandler, BOTH, INBOUND};
use futures::Stream;
use rsocket_protocol::{Frame, Payload, MAX_REQUEST_N};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Payloads received on one stream.
///
/// After `request_size` items have been delivered, a REQUEST_N for another
/// `request_size` is sent when the consumer asks for the next item and none
/// is buffered. Dropping the stream before it ends sends CANCEL.
pub struct InboundStream {
    state: Arc<ConnectionState>,
    handler: Arc<StreamHandler>,
    source: InboundSource,
    request_size: u32,
    delivered: u32,
    initial_request: Option<u32>,
    cancel_sides: u8,
    done: bool,
}

impl InboundStream {
    /// Response side of a request-stream or request-channel. The initial
    /// credit already went out with the request frame.
    pub(crate) fn requester(
        state: Arc<ConnectionState>,
        handler: Arc<StreamHandler>,
        source: InboundSource,
        request_size: u32,
    ) -> Self {
        Self {
            state,
            handler,
            source,
            request_size: request_size.max(1),
            delivered: 0,
            initial_request: None,
            cancel_sides: BOTH,
            done: false,
        }
    }

    /// Requester payloads of a channel, as seen by the responder. The first
    /// poll grants the requester `request_size` credits.
    pub(crate) fn responder(
        state: Arc<ConnectionState>,
        handler: Arc<StreamHandler>,
        source: InboundSource,
        request_size: u32,
    ) -> Self {
        let request_size = request_size.max(1);
        Self {
            state,
            handler,
            source,
            request_size,
            delivered: 0,
            initial_request: Some(request_size),
            cancel_sides: INBOUND,
            done: false,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.handler.stream_id()
    }

    fn request(&self, n: u32) {
        self.state.queue.enqueue(Frame::RequestN {
            stream_id: self.handler.stream_id(),
            n,
        });
    }
}

impl Stream for InboundStream {
    type Item = Result<Payload, RSocketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }
        match this.source.poll_recv(cx) {
            Poll::Ready(Some(Ok(payload))) => {
                this.delivered = this.delivered.saturating_add(1);
                Poll::Ready(Some(Ok(payload)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => {
                if let Some(n) = this.initial_request.take() {
                    this.request(n);
                } else if this.request_size < MAX_REQUEST_N && this.delivered >= this.request_size
                {
                    this.delivered = 0;
                    this.request(this.request_size);
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for InboundStream {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if self.handler.cancel_locally(&self.state, self.cancel_sides) {
            tracing::debug!("stream {}: cancelled by consumer", self.handler.stream_id());
        }
    }
}
