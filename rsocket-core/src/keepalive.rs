//! Connection liveness: periodic KEEPALIVE frames and a lifetime watchdog.

use crate::connection::ConnectionState;
use crate::error::RSocketError;
use parking_lot::Mutex;
use rsocket_protocol::{Frame, KeepAliveFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};

/// Tracks when the peer was last heard from.
pub(crate) struct KeepAlive {
    last_seen: Mutex<Instant>,
}

impl KeepAlive {
    pub(crate) fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn mark(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

/// Handles a KEEPALIVE received from the peer.
pub(crate) fn handle_frame(state: &ConnectionState, frame: KeepAliveFrame) {
    state.keepalive.mark();
    if frame.respond {
        state
            .queue
            .enqueue_prioritized(Frame::KeepAlive(KeepAliveFrame::new(false)));
    }
}

/// Sends KEEPALIVE every interval until the connection ends, tearing it
/// down once the peer has been silent for longer than the max lifetime.
pub(crate) async fn run(state: Arc<ConnectionState>) {
    let interval = state.config.keepalive_interval.max(Duration::from_millis(1));
    let max_lifetime = state.config.keepalive_max_lifetime;
    let mut ticker = time::interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            biased;
            _ = state.token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if state.keepalive.elapsed() > max_lifetime {
            tracing::warn!(
                "no keepalive from peer within {:?}, closing connection",
                max_lifetime
            );
            state.terminate(RSocketError::KeepAliveTimeout(max_lifetime));
            return;
        }
        state
            .queue
            .enqueue_prioritized(Frame::KeepAlive(KeepAliveFrame::new(true)));
    }
}
