// Offset Commit Coordinator (spec §4.4).
//
// Computes, per owned partition, the greatest offset safe to commit and
// forwards it to the log client. Never commits twice with the same or a
// lower value (spec §8 invariant 2, "monotone commits").

use dashmap::DashMap;
use std::sync::Arc;

use crate::collaborators::LogClient;
use crate::error::Result;
use crate::partition_tracker::PartitionTracker;
use crate::registry::SessionRegistry;

pub struct OffsetCommitCoordinator {
    log_client: Arc<dyn LogClient>,
    last_committed: DashMap<i32, u64>,
}

impl OffsetCommitCoordinator {
    pub fn new(log_client: Arc<dyn LogClient>) -> Self {
        Self {
            log_client,
            last_committed: DashMap::new(),
        }
    }

    pub fn last_committed(&self, partition: i32) -> Option<u64> {
        self.last_committed.get(&partition).map(|v| *v)
    }

    /// Seeds the coordinator's notion of `lastCommitted(P)` from whatever
    /// the log client reports on assignment (spec §4.6), so a freshly
    /// (re)owned partition doesn't re-commit an offset already recorded by
    /// a previous generation of this consumer.
    pub fn seed(&self, partition: i32, offset: u64) {
        self.last_committed.insert(partition, offset);
    }

    pub fn forget(&self, partition: i32) {
        self.last_committed.remove(&partition);
    }

    /// Runs the algorithm in spec §4.4 for a single partition. Returns
    /// `Ok(Some(offset))` if a commit was issued, `Ok(None)` if nothing
    /// changed (either `L` is unset, or the candidate didn't advance past
    /// `lastCommitted`).
    pub async fn run_for_partition(
        &self,
        topic: &str,
        partition: i32,
        tracker: &PartitionTracker,
        registry: &SessionRegistry,
    ) -> Result<Option<u64>> {
        let Some(last_message_offset) = tracker.last_message_offset(partition) else {
            return Ok(None);
        };
        let l_plus_one = last_message_offset + 1;
        let blocking_lowest = registry.lowest_offset_for_partition(partition).await;
        let candidate = match blocking_lowest {
            Some(b) => l_plus_one.min(b),
            None => l_plus_one,
        };

        let last_committed = self.last_committed(partition).unwrap_or(0);
        if candidate <= last_committed {
            return Ok(None);
        }

        self.log_client.commit(topic, partition, candidate).await?;
        self.last_committed.insert(partition, candidate);
        tracing::debug!(partition, candidate, "committed offset");
        Ok(Some(candidate))
    }

    /// Runs the coordinator across every partition in `partitions`,
    /// tolerating per-partition commit failures (spec §7: "CommitError --
    /// retried on next tick; not fatal").
    pub async fn run(
        &self,
        topic: &str,
        partitions: &[i32],
        tracker: &PartitionTracker,
        registry: &SessionRegistry,
    ) -> Vec<(i32, Result<Option<u64>>)> {
        let mut results = Vec::with_capacity(partitions.len());
        for &partition in partitions {
            let outcome = self.run_for_partition(topic, partition, tracker, registry).await;
            if let Err(e) = &outcome {
                tracing::warn!(partition, error = %e, "commit failed, will retry next tick");
            }
            results.push((partition, outcome));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FlushReason;
    use crate::fakes::{InMemoryBlobSink, InMemoryLogClient};
    use crate::message::Message;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn msg(offset: u64, ts: i64) -> Message {
        Message {
            topic: "main".to_string(),
            partition: 1,
            offset,
            timestamp_ms: ts,
            key: None,
            payload: br#"{"a":1}"#.to_vec(),
            trace_id: None,
        }
    }

    /// S1 from spec §8: two messages for one blocking session, then flush,
    /// then commit advances to one past the newest offset.
    #[tokio::test]
    async fn s1_simple_commit() {
        let dir = tempdir().unwrap();
        let log_client = Arc::new(InMemoryLogClient::default());
        let blob_sink: Arc<dyn crate::collaborators::BlobSink> = Arc::new(InMemoryBlobSink::default());
        let tracker = PartitionTracker::new();
        let registry = SessionRegistry::new();
        let coordinator = OffsetCommitCoordinator::new(log_client.clone());
        // A consumer resuming at offset 1 was, by definition, already
        // committed at 1 -- seed that starting position explicitly so the
        // scenario's "nothing should commit yet" premise holds.
        coordinator.seed(1, 1);

        registry.route_message(dir.path(), 1, 1, "sid1", &msg(1, 1000), 1).await.unwrap();
        tracker.observe(1, 1, 1000);
        registry.route_message(dir.path(), 1, 1, "sid1", &msg(2, 2000), 1).await.unwrap();
        tracker.observe(1, 2, 2000);

        let outcome = coordinator.run_for_partition("main", 1, &tracker, &registry).await.unwrap();
        assert_eq!(outcome, None, "sid1 still open, nothing should commit");

        registry.flush_partition(1, FlushReason::BufferAge, &blob_sink).await;
        let outcome = coordinator.run_for_partition("main", 1, &tracker, &registry).await.unwrap();
        assert_eq!(outcome, Some(3));
        assert_eq!(log_client.committed_offset("main", 1), Some(3));
    }

    /// S2 from spec §8: one session flushes and stops blocking, but a
    /// second, later-arriving session on the same partition is still open
    /// at a lower offset than `L` -- the candidate must stay pinned to
    /// that session's lowest offset instead of jumping to `L + 1`.
    #[tokio::test]
    async fn s2_blocking_session() {
        let dir = tempdir().unwrap();
        let log_client = Arc::new(InMemoryLogClient::default());
        let blob_sink: Arc<dyn crate::collaborators::BlobSink> = Arc::new(InMemoryBlobSink::default());
        let tracker = PartitionTracker::new();
        let registry = SessionRegistry::new();
        let coordinator = OffsetCommitCoordinator::new(log_client.clone());

        registry.route_message(dir.path(), 1, 1, "sid1", &msg(1, 1000), 1).await.unwrap();
        tracker.observe(1, 1, 1000);
        registry.flush_partition(1, FlushReason::BufferAge, &blob_sink).await;

        let outcome = coordinator.run_for_partition("main", 1, &tracker, &registry).await.unwrap();
        assert_eq!(outcome, Some(2), "sid1 flushed, nothing should block L + 1");

        registry.route_message(dir.path(), 1, 1, "sid2", &msg(5, 2000), 1).await.unwrap();
        tracker.observe(1, 5, 2000);

        // L + 1 would be 6, but sid2's buffer is still open starting at
        // offset 5, so the candidate is capped at 5 instead of jumping to 6.
        let outcome = coordinator.run_for_partition("main", 1, &tracker, &registry).await.unwrap();
        assert_eq!(outcome, Some(5));

        // And it must not re-advance past 5 until sid2 itself flushes, even
        // though more messages keep arriving on the partition.
        tracker.observe(1, 6, 2500);
        let outcome = coordinator.run_for_partition("main", 1, &tracker, &registry).await.unwrap();
        assert_eq!(outcome, None, "sid2 still open at offset 5, must keep blocking");
        assert_eq!(coordinator.last_committed(1), Some(5));
    }

    /// S3 from spec §8: every message in the batch belongs to a disabled
    /// team (no buffer ever created), so `B = infinity` and the
    /// coordinator commits `L + 1`.
    #[tokio::test]
    async fn s3_entire_batch_disabled() {
        let log_client = Arc::new(InMemoryLogClient::default());
        let tracker = PartitionTracker::new();
        let registry = SessionRegistry::new();
        let coordinator = OffsetCommitCoordinator::new(log_client.clone());

        tracker.observe(1, 12, 1000);
        tracker.observe(1, 13, 1000);

        let outcome = coordinator.run_for_partition("main", 1, &tracker, &registry).await.unwrap();
        assert_eq!(outcome, Some(14));
    }

    #[tokio::test]
    async fn commit_sequence_is_strictly_increasing() {
        let log_client = Arc::new(InMemoryLogClient::default());
        let tracker = PartitionTracker::new();
        let registry = SessionRegistry::new();
        let coordinator = OffsetCommitCoordinator::new(log_client.clone());

        tracker.observe(1, 0, 1000);
        coordinator.run_for_partition("main", 1, &tracker, &registry).await.unwrap();
        // Re-running with no new messages must not re-commit the same offset.
        let repeat = coordinator.run_for_partition("main", 1, &tracker, &registry).await.unwrap();
        assert_eq!(repeat, None);

        tracker.observe(1, 5, 2000);
        coordinator.run_for_partition("main", 1, &tracker, &registry).await.unwrap();

        let history = log_client.history();
        let offsets: Vec<u64> = history.iter().map(|(_, _, offset)| *offset).collect();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]), "{offsets:?} must be strictly increasing");
    }
}
