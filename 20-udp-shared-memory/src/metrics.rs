//! Per-node counters.
//!
//! Counters only ever go up and are read with relaxed ordering: a snapshot is
//! approximate when taken while traffic is flowing, which is all an operator
//! needs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::store::AppliedOutcome;

#[derive(Debug, Default)]
pub struct Metrics {
    received_packets: AtomicU64,
    sent_packets: AtomicU64,
    forward_key_set: AtomicU64,
    forward_key_del: AtomicU64,
    lost_packet_count: AtomicU64,
    out_of_order_count: AtomicU64,
    delete_unknown_key_count: AtomicU64,
    malformed_packet_count: AtomicU64,
    oversized_packet_count: AtomicU64,
    send_error_count: AtomicU64,
}

/// Point-in-time copy of a node's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub received_packets: u64,
    pub sent_packets: u64,
    pub forward_key_set: u64,
    pub forward_key_del: u64,
    /// Reserved. UDP loss is invisible to the receiver, so nothing populates it.
    pub lost_packet_count: u64,
    pub out_of_order_count: u64,
    pub delete_unknown_key_count: u64,
    pub malformed_packet_count: u64,
    pub oversized_packet_count: u64,
    pub send_error_count: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            received_packets: read(&self.received_packets),
            sent_packets: read(&self.sent_packets),
            forward_key_set: read(&self.forward_key_set),
            forward_key_del: read(&self.forward_key_del),
            lost_packet_count: read(&self.lost_packet_count),
            out_of_order_count: read(&self.out_of_order_count),
            delete_unknown_key_count: read(&self.delete_unknown_key_count),
            malformed_packet_count: read(&self.malformed_packet_count),
            oversized_packet_count: read(&self.oversized_packet_count),
            send_error_count: read(&self.send_error_count),
        }
    }

    pub(crate) fn record_received(&self) {
        bump(&self.received_packets);
    }

    pub(crate) fn record_sent(&self) {
        bump(&self.sent_packets);
    }

    pub(crate) fn record_send_error(&self) {
        bump(&self.send_error_count);
    }

    pub(crate) fn record_malformed(&self) {
        bump(&self.malformed_packet_count);
    }

    pub(crate) fn record_oversized(&self) {
        bump(&self.oversized_packet_count);
    }

    pub(crate) fn record_outcome(&self, outcome: AppliedOutcome) {
        let counter = match outcome {
            AppliedOutcome::Applied => &self.forward_key_set,
            AppliedOutcome::Deleted => &self.forward_key_del,
            AppliedOutcome::StaleOutOfOrder => &self.out_of_order_count,
            AppliedOutcome::DeleteOfUnknownKey => &self.delete_unknown_key_count,
        };
        bump(counter);
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "received_packets         {}", self.received_packets)?;
        writeln!(f, "sent_packets             {}", self.sent_packets)?;
        writeln!(f, "forward_key_set          {}", self.forward_key_set)?;
        writeln!(f, "forward_key_del          {}", self.forward_key_del)?;
        writeln!(f, "lost_packet_count        {}", self.lost_packet_count)?;
        writeln!(f, "out_of_order_count       {}", self.out_of_order_count)?;
        writeln!(f, "delete_unknown_key_count {}", self.delete_unknown_key_count)?;
        writeln!(f, "malformed_packet_count   {}", self.malformed_packet_count)?;
        writeln!(f, "oversized_packet_count   {}", self.oversized_packet_count)?;
        write!(f, "send_error_count         {}", self.send_error_count)
    }
}
