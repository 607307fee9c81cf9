//! Stream identifier allocation.
//!
//! Clients use odd ids and servers even ids. The counter advances by two
//! and wraps within 31 bits, skipping 0 and any id still registered.

use rsocket_protocol::STREAM_ID_MASK;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Which end of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    /// Returns true if `stream_id` would have been issued by this side.
    pub fn owns(&self, stream_id: u32) -> bool {
        match self {
            Side::Client => stream_id % 2 == 1,
            Side::Server => stream_id != 0 && stream_id % 2 == 0,
        }
    }
}

/// Issues unique stream ids for locally initiated streams.
#[derive(Debug)]
pub struct StreamIdAllocator {
    counter: AtomicU32,
    issued: AtomicBool,
}

impl StreamIdAllocator {
    /// Allocator whose first id is 1.
    pub fn client() -> Self {
        Self::with_seed(u32::MAX)
    }

    /// Allocator whose first id is 2.
    pub fn server() -> Self {
        Self::with_seed(0)
    }

    pub fn for_side(side: Side) -> Self {
        match side {
            Side::Client => Self::client(),
            Side::Server => Self::server(),
        }
    }

    /// Allocator starting from an arbitrary counter value.
    pub fn with_seed(seed: u32) -> Self {
        Self {
            counter: AtomicU32::new(seed),
            issued: AtomicBool::new(false),
        }
    }

    /// Returns the next id for which `in_use` is false.
    pub fn next(&self, in_use: impl Fn(u32) -> bool) -> u32 {
        loop {
            let id = self.counter.fetch_add(2, Ordering::AcqRel).wrapping_add(2) & STREAM_ID_MASK;
            if id != 0 && !in_use(id) {
                self.issued.store(true, Ordering::Release);
                return id;
            }
        }
    }

    /// Returns true if `stream_id` is not above the most recently issued id.
    pub fn is_before_or_current(&self, stream_id: u32) -> bool {
        if !self.issued.load(Ordering::Acquire) {
            return false;
        }
        let current = self.counter.load(Ordering::Acquire) & STREAM_ID_MASK;
        stream_id > 0 && stream_id <= current
    }
}
