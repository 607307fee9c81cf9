//! Per-stream credit accounting for outbound emission.

use crate::error::RSocketError;
use parking_lot::Mutex;
use rsocket_protocol::MAX_REQUEST_N;
use tokio::sync::oneshot;

struct LimiterState {
    credit: u32,
    unbounded: bool,
    cancelled: bool,
    waiter: Option<oneshot::Sender<()>>,
}

impl LimiterState {
    fn add(&mut self, n: u32) {
        if self.unbounded {
            return;
        }
        let total = self.credit as u64 + n as u64;
        if total >= MAX_REQUEST_N as u64 {
            self.unbounded = true;
            self.credit = MAX_REQUEST_N;
        } else {
            self.credit = total as u32;
        }
    }

    fn try_take(&mut self) -> bool {
        if self.unbounded {
            return true;
        }
        if self.credit > 0 {
            self.credit -= 1;
            return true;
        }
        false
    }
}

/// Credit counter with at most one parked emitter.
///
/// A credit of [`MAX_REQUEST_N`] or more means unbounded demand.
pub struct Limiter {
    state: Mutex<LimiterState>,
}

impl Limiter {
    pub fn new(initial: u32) -> Self {
        let mut state = LimiterState {
            credit: 0,
            unbounded: false,
            cancelled: false,
            waiter: None,
        };
        state.add(initial);
        Self {
            state: Mutex::new(state),
        }
    }

    /// Adds `n` credits and wakes a parked emitter. `n == 0` is a no-op.
    pub fn update_requests(&self, n: u32) {
        if n == 0 {
            return;
        }
        let waiter = {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            state.add(n);
            state.waiter.take()
        };
        if let Some(waiter) = waiter {
            let _ = waiter.send(());
        }
    }

    /// Consumes one credit, waiting until one is available.
    ///
    /// Fails with [`RSocketError::Cancelled`] once the limiter is cancelled.
    pub async fn acquire(&self) -> Result<(), RSocketError> {
        loop {
            let wake = {
                let mut state = self.state.lock();
                if state.cancelled {
                    return Err(RSocketError::Cancelled);
                }
                if state.try_take() {
                    return Ok(());
                }
                debug_assert!(
                    state.waiter.as_ref().map_or(true, |w| w.is_closed()),
                    "limiter supports a single waiter"
                );
                let (tx, rx) = oneshot::channel();
                state.waiter = Some(tx);
                rx
            };
            if wake.await.is_err() {
                return Err(RSocketError::Cancelled);
            }
        }
    }

    /// Cancels the limiter, failing the parked and all later acquisitions.
    pub fn cancel(&self) {
        let waiter = {
            let mut state = self.state.lock();
            state.cancelled = true;
            state.waiter.take()
        };
        drop(waiter);
    }

    /// Credits currently available.
    pub fn available(&self) -> u32 {
        self.state.lock().credit
    }

    pub fn is_unbounded(&self) -> bool {
        self.state.lock().unbounded
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Limiter")
            .field("credit", &state.credit)
            .field("unbounded", &state.unbounded)
            .field("cancelled", &state.cancelled)
            .finish()
    }
}
