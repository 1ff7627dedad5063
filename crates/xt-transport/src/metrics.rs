//! Transport counters
//!
//! Lock-free counters shared by the worker loops, the submitters and the
//! compressor. Read them through [`TransportMetrics::snapshot`].
//!
//! ## Usage
//!
//! ```ignore
//! use xt_transport::metrics::TransportMetrics;
//!
//! let metrics = TransportMetrics::new();
//! metrics.record_request_submitted();
//! assert_eq!(metrics.snapshot().requests_submitted, 1);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters for the request, push and update paths and for compression.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    pub requests_submitted: AtomicU64,
    pub requests_completed: AtomicU64,
    pub requests_failed: AtomicU64,
    /// Requests evicted from a full request buffer
    pub requests_dropped: AtomicU64,
    pub reply_timeouts: AtomicU64,
    pub protocol_mismatches: AtomicU64,
    /// Send, receive or acquire failures on any channel
    pub channel_errors: AtomicU64,
    pub reconnects: AtomicU64,

    pub push_enqueued: AtomicU64,
    pub push_sent: AtomicU64,
    /// Frames evicted from a full push buffer or refused by a full channel
    pub push_dropped: AtomicU64,
    pub push_send_failures: AtomicU64,

    pub updates_received: AtomicU64,
    pub updates_dispatched: AtomicU64,
    /// Queued updates superseded by a newer one for the same key
    pub updates_coalesced: AtomicU64,
    /// Updates evicted from a full update buffer
    pub updates_dropped: AtomicU64,
    pub updates_malformed: AtomicU64,
    pub callback_panics: AtomicU64,

    pub compressions: AtomicU64,
    pub decompressions: AtomicU64,
    pub compression_failures: AtomicU64,
    /// Gauge: level used by the next compress call
    pub compression_level: AtomicI64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request_submitted(&self) {
        self.requests_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_completed(&self) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A queued request was evicted; it also counts as failed.
    pub fn record_request_dropped(&self) {
        self.requests_dropped.fetch_add(1, Ordering::Relaxed);
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reply_timeout(&self) {
        self.reply_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_mismatch(&self) {
        self.protocol_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_channel_error(&self) {
        self.channel_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push_enqueued(&self) {
        self.push_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push_sent(&self) {
        self.push_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push_dropped(&self) {
        self.push_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push_send_failure(&self) {
        self.push_send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update_received(&self) {
        self.updates_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update_dispatched(&self) {
        self.updates_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_updates_coalesced(&self, count: u64) {
        self.updates_coalesced.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_update_dropped(&self) {
        self.updates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update_malformed(&self) {
        self.updates_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compression(&self, level: i32) {
        self.compressions.fetch_add(1, Ordering::Relaxed);
        self.compression_level.store(level as i64, Ordering::Relaxed);
    }

    pub fn record_compression_level(&self, level: i32) {
        self.compression_level.store(level as i64, Ordering::Relaxed);
    }

    pub fn record_decompression(&self) {
        self.decompressions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compression_failure(&self) {
        self.compression_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current counters. Queue fields are left at zero; the transport
    /// facade fills them in.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_submitted: self.requests_submitted.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_dropped: self.requests_dropped.load(Ordering::Relaxed),
            reply_timeouts: self.reply_timeouts.load(Ordering::Relaxed),
            protocol_mismatches: self.protocol_mismatches.load(Ordering::Relaxed),
            channel_errors: self.channel_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            push_enqueued: self.push_enqueued.load(Ordering::Relaxed),
            push_sent: self.push_sent.load(Ordering::Relaxed),
            push_dropped: self.push_dropped.load(Ordering::Relaxed),
            push_send_failures: self.push_send_failures.load(Ordering::Relaxed),
            updates_received: self.updates_received.load(Ordering::Relaxed),
            updates_dispatched: self.updates_dispatched.load(Ordering::Relaxed),
            updates_coalesced: self.updates_coalesced.load(Ordering::Relaxed),
            updates_dropped: self.updates_dropped.load(Ordering::Relaxed),
            updates_malformed: self.updates_malformed.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
            compressions: self.compressions.load(Ordering::Relaxed),
            decompressions: self.decompressions.load(Ordering::Relaxed),
            compression_failures: self.compression_failures.load(Ordering::Relaxed),
            compression_level: self.compression_level.load(Ordering::Relaxed) as i32,
            ..MetricsSnapshot::default()
        }
    }
}

/// Point-in-time view of the transport
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_submitted: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub requests_dropped: u64,
    pub reply_timeouts: u64,
    pub protocol_mismatches: u64,
    pub channel_errors: u64,
    pub reconnects: u64,
    pub push_enqueued: u64,
    pub push_sent: u64,
    pub push_dropped: u64,
    pub push_send_failures: u64,
    pub updates_received: u64,
    pub updates_dispatched: u64,
    pub updates_coalesced: u64,
    pub updates_dropped: u64,
    pub updates_malformed: u64,
    pub callback_panics: u64,
    pub compressions: u64,
    pub decompressions: u64,
    pub compression_failures: u64,
    pub compression_level: i32,
    pub request_queue_depth: usize,
    pub request_queue_capacity: usize,
    pub push_queue_depth: usize,
    pub push_queue_capacity: usize,
    pub update_queue_depth: usize,
    pub update_queue_capacity: usize,
}

impl MetricsSnapshot {
    /// Requests still waiting for a terminal outcome.
    pub fn requests_outstanding(&self) -> u64 {
        self.requests_submitted
            .saturating_sub(self.requests_completed + self.requests_failed)
    }
}
