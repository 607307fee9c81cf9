//! Per-connection tuning.

use rsocket_protocol::MAX_REQUEST_N;
use std::time::Duration;

/// Default keepalive interval.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Default time without any KEEPALIVE before the connection is dropped.
pub const DEFAULT_KEEPALIVE_MAX_LIFETIME: Duration = Duration::from_secs(90);

/// Default number of items requested up front by stream consumers.
pub const DEFAULT_PREFETCH: u32 = 64;

/// Settings shared by both ends of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// How often a KEEPALIVE is sent.
    pub keepalive_interval: Duration,
    /// Connection is torn down if nothing arrives for this long.
    pub keepalive_max_lifetime: Duration,
    /// Credit requested by stream and channel consumers, and the batch size
    /// of later REQUEST_N frames.
    pub prefetch: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            keepalive_max_lifetime: DEFAULT_KEEPALIVE_MAX_LIFETIME,
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keepalive(mut self, interval: Duration, max_lifetime: Duration) -> Self {
        self.keepalive_interval = interval;
        self.keepalive_max_lifetime = max_lifetime;
        self
    }

    /// Sets the prefetch, clamped to `1..=MAX_REQUEST_N`.
    pub fn with_prefetch(mut self, prefetch: u32) -> Self {
        self.prefetch = prefetch.clamp(1, MAX_REQUEST_N);
        self
    }
}
