//! Service counters
//!
//! Lock-free counters shared by every task of the daemon. They report what
//! was dropped or served and never influence behavior.

use crate::types::Action;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared across producers, the actor and the control server
#[derive(Debug, Default)]
pub struct ServiceStats {
    registers: AtomicU64,
    unregisters: AtomicU64,
    publishes: AtomicU64,
    flush_requests: AtomicU64,
    decode_failures: AtomicU64,
    lost_samples: AtomicU64,
    mailbox_drops: AtomicU64,
    empty_flushes: AtomicU64,
    samples_flushed: AtomicU64,
    orphan_publishes: AtomicU64,
    malformed_requests: AtomicU64,
    client_connections: AtomicU64,
    active_records: AtomicU64,
}

/// Point-in-time copy of the service counters
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub event_type_breakdown: EventTypeBreakdown,
    /// Records rejected by the decoder
    pub decode_failures: u64,
    /// Samples the kernel reported as lost from the perf buffers
    pub lost_samples: u64,
    /// Events and requests dropped because the mailbox was full
    pub mailbox_drops: u64,
    /// Flushes that returned no samples
    pub empty_flushes: u64,
    pub samples_flushed: u64,
    /// Publishes for connections without a record
    pub orphan_publishes: u64,
    pub malformed_requests: u64,
    pub client_connections: u64,
    /// Records currently held by the trace store
    pub active_records: u64,
}

/// Events applied by the correlation actor, by action
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct EventTypeBreakdown {
    pub register: u64,
    pub unregister: u64,
    pub publish: u64,
    pub flush: u64,
}

impl EventTypeBreakdown {
    pub fn total(&self) -> u64 {
        self.register + self.unregister + self.publish + self.flush
    }
}

impl ServiceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an event applied by the actor
    pub fn record_action(&self, action: Action) {
        let counter = match action {
            Action::Register => &self.registers,
            Action::Unregister => &self.unregisters,
            Action::Publish => &self.publishes,
            Action::Flush => &self.flush_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost_samples(&self, lost: u64) {
        self.lost_samples.fetch_add(lost, Ordering::Relaxed);
    }

    /// Count a dropped mailbox send, returning the new total
    pub fn record_mailbox_drop(&self) -> u64 {
        self.mailbox_drops.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count a served flush and the samples it returned
    pub fn record_flush(&self, samples: usize) {
        if samples == 0 {
            self.empty_flushes.fetch_add(1, Ordering::Relaxed);
        }
        self.samples_flushed
            .fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_orphan_publish(&self) {
        self.orphan_publishes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_request(&self) {
        self.malformed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an accepted client, returning its sequence number
    pub fn record_client_connection(&self) -> u64 {
        self.client_connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn set_active_records(&self, records: usize) {
        self.active_records.store(records as u64, Ordering::Relaxed);
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn mailbox_drops(&self) -> u64 {
        self.mailbox_drops.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            event_type_breakdown: EventTypeBreakdown {
                register: self.registers.load(Ordering::Relaxed),
                unregister: self.unregisters.load(Ordering::Relaxed),
                publish: self.publishes.load(Ordering::Relaxed),
                flush: self.flush_requests.load(Ordering::Relaxed),
            },
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            lost_samples: self.lost_samples.load(Ordering::Relaxed),
            mailbox_drops: self.mailbox_drops.load(Ordering::Relaxed),
            empty_flushes: self.empty_flushes.load(Ordering::Relaxed),
            samples_flushed: self.samples_flushed.load(Ordering::Relaxed),
            orphan_publishes: self.orphan_publishes.load(Ordering::Relaxed),
            malformed_requests: self.malformed_requests.load(Ordering::Relaxed),
            client_connections: self.client_connections.load(Ordering::Relaxed),
            active_records: self.active_records.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_breakdown() {
        let stats = ServiceStats::new();
        stats.record_action(Action::Register);
        stats.record_action(Action::Publish);
        stats.record_action(Action::Publish);
        stats.record_action(Action::Flush);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.event_type_breakdown.register, 1);
        assert_eq!(snapshot.event_type_breakdown.publish, 2);
        assert_eq!(snapshot.event_type_breakdown.unregister, 0);
        assert_eq!(snapshot.event_type_breakdown.total(), 4);
    }

    #[test]
    fn test_flush_counters() {
        let stats = ServiceStats::new();
        stats.record_flush(0);
        stats.record_flush(3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.empty_flushes, 1);
        assert_eq!(snapshot.samples_flushed, 3);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = ServiceStats::new();
        assert_eq!(stats.record_mailbox_drop(), 1);
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"mailbox_drops\":1"));
    }
}
