//! Relay packet counters
//!
//! Diagnostics only; nothing in the relay depends on these values.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the relay counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Packets accepted by the stack's input path
    pub inbound_packets: u64,
    pub inbound_bytes: u64,
    /// Packets delivered to the host by polling
    pub outbound_packets: u64,
    pub outbound_bytes: u64,
    /// Packets dropped because the output queue was full
    pub dropped_packets: u64,
    /// Packets discarded because the poll buffer was too small
    pub oversized_packets: u64,
    /// Inbound packets the stack refused
    pub write_errors: u64,
    /// Packets waiting in the output queue
    pub queued: usize,
}

impl RelayStats {
    /// Format as human-readable string
    pub fn format(&self) -> String {
        format!(
            "IN: {} pkts ({:.2}MB), OUT: {} pkts ({:.2}MB), dropped: {}, oversized: {}, errors: {}, queued: {}",
            self.inbound_packets,
            self.inbound_bytes as f64 / (1024.0 * 1024.0),
            self.outbound_packets,
            self.outbound_bytes as f64 / (1024.0 * 1024.0),
            self.dropped_packets,
            self.oversized_packets,
            self.write_errors,
            self.queued
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct RelayCounters {
    inbound_packets: AtomicU64,
    inbound_bytes: AtomicU64,
    outbound_packets: AtomicU64,
    outbound_bytes: AtomicU64,
    dropped_packets: AtomicU64,
    oversized_packets: AtomicU64,
    write_errors: AtomicU64,
}

impl RelayCounters {
    /// Returns the new inbound packet count
    pub(crate) fn record_inbound(&self, len: usize) -> u64 {
        self.inbound_bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.inbound_packets.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the new outbound packet count
    pub(crate) fn record_outbound(&self, len: usize) -> u64 {
        self.outbound_bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.outbound_packets.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the new drop count
    pub(crate) fn record_drop(&self) -> u64 {
        self.dropped_packets.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_oversized(&self) {
        self.oversized_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.inbound_packets,
            &self.inbound_bytes,
            &self.outbound_packets,
            &self.outbound_bytes,
            &self.dropped_packets,
            &self.oversized_packets,
            &self.write_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self, queued: usize) -> RelayStats {
        RelayStats {
            inbound_packets: self.inbound_packets.load(Ordering::Relaxed),
            inbound_bytes: self.inbound_bytes.load(Ordering::Relaxed),
            outbound_packets: self.outbound_packets.load(Ordering::Relaxed),
            outbound_bytes: self.outbound_bytes.load(Ordering::Relaxed),
            dropped_packets: self.dropped_packets.load(Ordering::Relaxed),
            oversized_packets: self.oversized_packets.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            queued,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_reset() {
        let counters = RelayCounters::default();

        assert_eq!(counters.record_inbound(100), 1);
        assert_eq!(counters.record_inbound(50), 2);
        assert_eq!(counters.record_outbound(40), 1);
        assert_eq!(counters.record_drop(), 1);

        let stats = counters.snapshot(3);
        assert_eq!(stats.inbound_bytes, 150);
        assert_eq!(stats.outbound_bytes, 40);
        assert_eq!(stats.queued, 3);

        counters.reset();
        assert_eq!(counters.snapshot(0), RelayStats::default());
    }

    #[test]
    fn test_format_summary() {
        let stats = RelayStats {
            inbound_packets: 3,
            inbound_bytes: 2 * 1024 * 1024,
            outbound_packets: 1,
            dropped_packets: 4,
            queued: 2,
            ..RelayStats::default()
        };

        assert_eq!(
            stats.format(),
            "IN: 3 pkts (2.00MB), OUT: 1 pkts (0.00MB), dropped: 4, oversized: 0, errors: 0, queued: 2"
        );
    }
}
