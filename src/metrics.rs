//! Metrics instrumentation for xds-dns.
//!
//! All metrics are prefixed with `xds_dns.`

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a DNS request.
pub fn record_query(record_type: &str, result: QueryResult, duration: Duration) {
    let result_str = match result {
        QueryResult::Success => "success",
        QueryResult::NxDomain => "nxdomain",
        QueryResult::ServFail => "servfail",
    };

    counter!("xds_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("xds_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    /// At least one answer record.
    Success,
    /// No answers for any question.
    NxDomain,
    /// Request carried no questions.
    ServFail,
}

/// Record answer records returned for a successful response.
pub fn record_answers_returned(count: usize) {
    histogram!("xds_dns.query.answers_returned").record(count as f64);
}

/// Record a committed snapshot built from a discovery response.
pub fn record_snapshot_commit(entries: usize, dropped: usize) {
    counter!("xds_dns.feed.snapshot.commit.count").increment(1);
    histogram!("xds_dns.feed.snapshot.entries").record(entries as f64);
    histogram!("xds_dns.feed.snapshot.dropped").record(dropped as f64);
}

/// Record a resource skipped while building a snapshot.
pub fn record_resource_dropped(reason: DropReason) {
    let reason_str = match reason {
        DropReason::Decode => "decode",
        DropReason::ResolutionNone => "resolution_none",
        DropReason::NoAddresses => "no_addresses",
    };

    counter!("xds_dns.feed.resource.dropped.count", "reason" => reason_str).increment(1);
}

/// Why a resource contributed no names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Resource failed to decode.
    Decode,
    /// Caller supplies the address.
    ResolutionNone,
    /// No usable address and no default.
    NoAddresses,
}

/// Record an acknowledgment handed to the feed.
pub fn record_ack_sent() {
    counter!("xds_dns.feed.ack.count").increment(1);
}

/// Record a feed reconnect.
pub fn record_feed_reconnect(reason: ReconnectReason) {
    let reason_str = match reason {
        ReconnectReason::StreamEnded => "stream_ended",
        ReconnectReason::Error => "error",
        ReconnectReason::InitialConnect => "initial_connect",
    };

    counter!("xds_dns.feed.reconnect.count", "reason" => reason_str).increment(1);
}

/// Reconnect reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// Control plane closed the stream.
    StreamEnded,
    /// Connect or stream error.
    Error,
    /// First stream to the control plane.
    InitialConnect,
}

/// Record store size (call periodically).
pub fn record_store_counts(entries: usize, wildcards: usize) {
    gauge!("xds_dns.store.entries.count").set(entries as f64);
    gauge!("xds_dns.store.wildcards.count").set(wildcards as f64);
}

/// Record the number of committed snapshots.
pub fn record_generation(generation: u64) {
    gauge!("xds_dns.store.generation").set(generation as f64);
}

/// Record readiness state.
pub fn record_ready_state(ready: bool) {
    gauge!("xds_dns.store.ready").set(if ready { 1.0 } else { 0.0 });
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
