//! Broker-wide delivery counters.
//!
//! Plain atomics, no locks; workers and the housekeeping loop read
//! them for $SYS-style reporting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Broker delivery metrics.
#[derive(Debug)]
pub struct BrokerMetrics {
    /// Publishes handed to the send layer.
    pub msgs_sent: AtomicU64,
    /// Messages refused admission and discarded.
    pub msgs_dropped: AtomicU64,
    /// Messages retired by the expiry sweep.
    pub msgs_expired: AtomicU64,
}

impl BrokerMetrics {
    pub const fn new() -> Self {
        Self {
            msgs_sent: AtomicU64::new(0),
            msgs_dropped: AtomicU64::new(0),
            msgs_expired: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn add_msgs_sent(&self, n: u64) {
        self.msgs_sent.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_msgs_dropped(&self, n: u64) {
        self.msgs_dropped.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_msgs_expired(&self, n: u64) {
        self.msgs_expired.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn msgs_sent(&self) -> u64 {
        self.msgs_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn msgs_dropped(&self) -> u64 {
        self.msgs_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn msgs_expired(&self) -> u64 {
        self.msgs_expired.load(Ordering::Relaxed)
    }
}

impl Default for BrokerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
