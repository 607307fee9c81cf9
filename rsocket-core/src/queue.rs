//! Outbound frame queue with a priority lane.
//!
//! Connection-level frames (keepalive, metadata push, setup) go through the
//! priority lane and are always written before queued stream frames.

use crate::error::RSocketError;
use rsocket_protocol::Frame;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Shared {
    closed: CancellationToken,
    cause: OnceLock<RSocketError>,
}

impl Shared {
    fn cause(&self) -> RSocketError {
        self.cause
            .get()
            .cloned()
            .unwrap_or(RSocketError::ConnectionClosed)
    }
}

/// Creates a connected queue handle and receiver.
pub fn frame_queue() -> (FrameQueue, FrameReceiver) {
    let (priority_tx, priority_rx) = mpsc::unbounded_channel();
    let (normal_tx, normal_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        closed: CancellationToken::new(),
        cause: OnceLock::new(),
    });
    (
        FrameQueue {
            priority: priority_tx,
            normal: normal_tx,
            shared: shared.clone(),
        },
        FrameReceiver {
            priority: priority_rx,
            normal: normal_rx,
            shared,
        },
    )
}

/// Producer side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct FrameQueue {
    priority: mpsc::UnboundedSender<Frame>,
    normal: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
}

impl FrameQueue {
    /// Queues a stream frame. Returns false if the queue is closed.
    pub fn enqueue(&self, frame: Frame) -> bool {
        if self.is_closed() {
            tracing::trace!("dropping {:?} on closed queue", frame.frame_type());
            return false;
        }
        self.normal.send(frame).is_ok()
    }

    /// Queues a connection-level frame ahead of stream frames.
    pub fn enqueue_prioritized(&self, frame: Frame) -> bool {
        if self.is_closed() {
            tracing::trace!("dropping {:?} on closed queue", frame.frame_type());
            return false;
        }
        self.priority.send(frame).is_ok()
    }

    /// Closes both lanes. Frames already queued can still be dequeued.
    pub fn close(&self, cause: RSocketError) {
        let _ = self.shared.cause.set(cause);
        self.shared.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }
}

/// Consumer side of the queue, owned by the outbound loop.
pub struct FrameReceiver {
    priority: mpsc::UnboundedReceiver<Frame>,
    normal: mpsc::UnboundedReceiver<Frame>,
    shared: Arc<Shared>,
}

impl FrameReceiver {
    /// Returns an already queued frame, priority lane first.
    pub fn try_dequeue(&mut self) -> Option<Frame> {
        self.priority
            .try_recv()
            .or_else(|_| self.normal.try_recv())
            .ok()
    }

    /// Waits for the next frame.
    ///
    /// Fails with the close cause once the queue is closed and empty.
    pub async fn dequeue(&mut self) -> Result<Frame, RSocketError> {
        if let Some(frame) = self.try_dequeue() {
            return Ok(frame);
        }
        if self.shared.closed.is_cancelled() {
            return Err(self.shared.cause());
        }

        tokio::select! {
            biased;
            frame = self.priority.recv() => frame.ok_or_else(|| self.shared.cause()),
            frame = self.normal.recv() => frame.ok_or_else(|| self.shared.cause()),
            _ = self.shared.closed.cancelled() => {
                self.try_dequeue().ok_or_else(|| self.shared.cause())
            }
        }
    }
}
