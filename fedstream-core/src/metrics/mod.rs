//! Metrics for authoring, streams and federation
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

pub const OBJECTS_AUTHORED: &str = "fedstream.objects.authored";
pub const OBJECTS_DELETED: &str = "fedstream.objects.deleted";
pub const SIGNATURE_REJECTS: &str = "fedstream.signature.rejects";
pub const STREAM_POSTS: &str = "fedstream.stream.posts";
pub const STREAM_POST_FAILURES: &str = "fedstream.stream.post_failures";
pub const FANOUT_FAILURES: &str = "fedstream.fanout.failures";
pub const FANOUT_DURATION_MS: &str = "fedstream.fanout.duration_ms";
pub const ENTITIES_SYNCED: &str = "fedstream.federation.entities_synced";
pub const PEER_SYNC_FAILURES: &str = "fedstream.federation.peer_failures";

/// Register descriptions for every metric this crate emits
pub fn init_metrics() {
    describe_counter!(OBJECTS_AUTHORED, "Messages and associations accepted and stored");
    describe_counter!(OBJECTS_DELETED, "Messages and associations removed");
    describe_counter!(SIGNATURE_REJECTS, "Authoring requests rejected by signature verification");
    describe_counter!(STREAM_POSTS, "Events appended to stream logs");
    describe_counter!(STREAM_POST_FAILURES, "Stream log appends that failed");
    describe_counter!(FANOUT_FAILURES, "Streams left undelivered after all fan-out attempts");
    describe_histogram!(FANOUT_DURATION_MS, "Fan-out duration per authoring call in milliseconds");
    describe_counter!(ENTITIES_SYNCED, "Remote entity records applied by federation sync");
    describe_counter!(PEER_SYNC_FAILURES, "Peer sync rounds that failed");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Counter with a `kind` label (message / association)
pub fn record_kind_counter(name: &'static str, kind: &'static str) {
    counter!(name, "kind" => kind).increment(1);
}

/// Record a histogram metric
pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Stop the timer and record the duration in milliseconds
    pub fn stop(self) {
        let duration = self.start.elapsed();
        histogram!(self.name).record(duration.as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        init_metrics();
        record_counter(STREAM_POSTS, 1);
        record_kind_counter(OBJECTS_AUTHORED, "message");
        record_histogram(FANOUT_DURATION_MS, 1.5);
        Timer::new(FANOUT_DURATION_MS).stop();
    }
}
