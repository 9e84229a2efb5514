//! Transport statistics
//!
//! Counters shared by every channel an [`EventLoopGroup`] drives. All
//! fields are atomics updated with relaxed ordering; the numbers are for
//! observability, not for synchronization.
//!
//! [`EventLoopGroup`]: crate::runtime::EventLoopGroup

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated channel and I/O counters.
#[derive(Debug, Default)]
pub struct TransportStats {
    channels_opened: AtomicU64,
    channels_active: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_open(&self) {
        self.channels_opened.fetch_add(1, Ordering::Relaxed);
        self.channels_active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_close(&self) {
        self.channels_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }

    /// Total channels ever registered.
    pub fn channels_opened(&self) -> u64 {
        self.channels_opened.load(Ordering::Relaxed)
    }

    /// Channels currently open.
    pub fn channels_active(&self) -> u64 {
        self.channels_active.load(Ordering::Relaxed)
    }

    /// Total bytes read from all channels.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Total bytes written to all channels.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_tracking() {
        let stats = TransportStats::new();

        stats.record_open();
        stats.record_open();
        stats.record_read(100);
        stats.record_written(50);
        stats.record_close();

        assert_eq!(stats.channels_opened(), 2);
        assert_eq!(stats.channels_active(), 1);
        assert_eq!(stats.bytes_read(), 100);
        assert_eq!(stats.bytes_written(), 50);
    }
}
