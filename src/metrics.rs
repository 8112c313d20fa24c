// Atomic-counter metrics sink, modeled on the teacher's `PublisherStats`
// (`streams/publisher.rs`): a snapshot struct of plain numbers backed by
// `AtomicU64` counters that live as long as the process.
//
// Out of scope per spec §1; this exists only so the rest of the crate has
// somewhere real to report to instead of threading `Option<Metrics>`
// through every call site.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::collaborators::MetricsSink;

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    pub messages_decoded: u64,
    pub messages_decode_failed: u64,
    pub messages_auth_failed: u64,
    pub messages_duplicate: u64,
    pub buffers_flushed: u64,
    pub buffers_flush_failed: u64,
    pub commits_issued: u64,
    pub sessions_overflowed: u64,
    pub partitions_revoked: u64,
}

#[derive(Default)]
pub struct IngesterMetrics {
    messages_decoded: AtomicU64,
    messages_decode_failed: AtomicU64,
    messages_auth_failed: AtomicU64,
    messages_duplicate: AtomicU64,
    buffers_flushed: AtomicU64,
    buffers_flush_failed: AtomicU64,
    commits_issued: AtomicU64,
    sessions_overflowed: AtomicU64,
    partitions_revoked: AtomicU64,
}

impl IngesterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_decoded: self.messages_decoded.load(Ordering::Relaxed),
            messages_decode_failed: self.messages_decode_failed.load(Ordering::Relaxed),
            messages_auth_failed: self.messages_auth_failed.load(Ordering::Relaxed),
            messages_duplicate: self.messages_duplicate.load(Ordering::Relaxed),
            buffers_flushed: self.buffers_flushed.load(Ordering::Relaxed),
            buffers_flush_failed: self.buffers_flush_failed.load(Ordering::Relaxed),
            commits_issued: self.commits_issued.load(Ordering::Relaxed),
            sessions_overflowed: self.sessions_overflowed.load(Ordering::Relaxed),
            partitions_revoked: self.partitions_revoked.load(Ordering::Relaxed),
        }
    }

    fn counter_ref(&self, name: &'static str) -> Option<&AtomicU64> {
        match name {
            "messages_decoded" => Some(&self.messages_decoded),
            "messages_decode_failed" => Some(&self.messages_decode_failed),
            "messages_auth_failed" => Some(&self.messages_auth_failed),
            "messages_duplicate" => Some(&self.messages_duplicate),
            "buffers_flushed" => Some(&self.buffers_flushed),
            "buffers_flush_failed" => Some(&self.buffers_flush_failed),
            "commits_issued" => Some(&self.commits_issued),
            "sessions_overflowed" => Some(&self.sessions_overflowed),
            "partitions_revoked" => Some(&self.partitions_revoked),
            _ => None,
        }
    }
}

impl MetricsSink for IngesterMetrics {
    fn counter(&self, name: &'static str, value: u64) {
        match self.counter_ref(name) {
            Some(counter) => {
                counter.fetch_add(value, Ordering::Relaxed);
            }
            None => tracing::warn!(name, "counter incremented with unknown name"),
        }
    }

    fn gauge(&self, name: &'static str, value: f64) {
        tracing::trace!(name, value, "gauge");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = IngesterMetrics::new();
        metrics.counter("messages_decoded", 3);
        metrics.counter("messages_decoded", 2);
        metrics.counter("buffers_flushed", 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_decoded, 5);
        assert_eq!(snapshot.buffers_flushed, 1);
        assert_eq!(snapshot.commits_issued, 0);
    }

    #[test]
    fn unknown_counter_name_does_not_panic() {
        let metrics = IngesterMetrics::new();
        metrics.counter("not_a_real_counter", 1);
    }
}
