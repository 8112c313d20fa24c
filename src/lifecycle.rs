// Partition Lifecycle Controller (spec §4.6): `Unowned -> Assigning ->
// Owned -> Revoking -> Unowned`.
//
// Serializing lifecycle callbacks against batch handling (spec §5) is the
// caller's job, not this type's -- `Ingester` holds the single mutex that
// guards both, the same way the registry stays agnostic of the partition
// tracker (spec §9 "Cyclic references").

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::FlushReason;
use crate::collaborators::{BlobSink, LogClient};
use crate::commit::OffsetCommitCoordinator;
use crate::error::{IngestError, Result};
use crate::partition_tracker::PartitionTracker;
use crate::registry::{FlushOutcome, SessionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Unowned,
    Assigning,
    Owned,
    Revoking,
}

pub struct PartitionLifecycleController {
    topic: String,
    registry: Arc<SessionRegistry>,
    tracker: Arc<PartitionTracker>,
    commit_coordinator: Arc<OffsetCommitCoordinator>,
    blob_sink: Arc<dyn BlobSink>,
    log_client: Arc<dyn LogClient>,
    debug_partition: Option<i32>,
    revocation_deadline: Duration,
    states: DashMap<i32, PartitionState>,
}

impl PartitionLifecycleController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topic: String,
        registry: Arc<SessionRegistry>,
        tracker: Arc<PartitionTracker>,
        commit_coordinator: Arc<OffsetCommitCoordinator>,
        blob_sink: Arc<dyn BlobSink>,
        log_client: Arc<dyn LogClient>,
        debug_partition: Option<i32>,
        revocation_deadline: Duration,
    ) -> Self {
        Self {
            topic,
            registry,
            tracker,
            commit_coordinator,
            blob_sink,
            log_client,
            debug_partition,
            revocation_deadline,
            states: DashMap::new(),
        }
    }

    pub fn state(&self, partition: i32) -> PartitionState {
        self.states.get(&partition).map(|s| *s).unwrap_or(PartitionState::Unowned)
    }

    pub fn owned_partitions(&self) -> Vec<i32> {
        self.states
            .iter()
            .filter(|e| *e.value() == PartitionState::Owned)
            .map(|e| *e.key())
            .collect()
    }

    fn log_if_debug(&self, partition: i32, message: &str) {
        if self.debug_partition == Some(partition) {
            tracing::info!(partition, "{message}");
        } else {
            tracing::debug!(partition, "{message}");
        }
    }

    /// Spec §4.6 "Assignment": fetch `lastCommitted(P)` to seed the commit
    /// coordinator, then transition to `Owned`.
    pub async fn assign(&self, partitions: &[i32]) -> Result<()> {
        for &partition in partitions {
            self.states.insert(partition, PartitionState::Assigning);
            let committed = self.log_client.committed(&self.topic, partition).await?.unwrap_or(0);
            self.commit_coordinator.seed(partition, committed);
            self.states.insert(partition, PartitionState::Owned);
            self.log_if_debug(partition, "partition assigned");
        }
        Ok(())
    }

    /// Spec §4.6 "Revocation", steps 1-5. Steps 1-4 run for every
    /// partition in `partitions` before this returns, so the caller is
    /// free to acknowledge revocation to the broker immediately after.
    ///
    /// Flush and commit each carry the configured deadline (spec §5 "all
    /// suspension points carry a deadline"); a partition that blows its
    /// deadline is logged and reported via `RevocationReport::timed_out`
    /// rather than left to hang (spec §7 `RevocationTimeout`).
    ///
    /// The returned report carries every `FlushOutcome`, not just the
    /// failures, plus a pre-teardown snapshot of each partition's
    /// `last_message_offset` -- the caller needs both to advance the
    /// session/persistent watermarks for sessions that flushed
    /// successfully here, the same way the periodic maintenance pass does.
    /// Without that, a session that shares a partition with one that fails
    /// to flush during revocation would have its own already-durable
    /// messages redelivered with no watermark to catch the replay.
    pub async fn revoke(&self, partitions: &[i32]) -> RevocationReport {
        // Step 1: mark Revoking. Removing buffers from the active set
        // happens per-partition in step 4's `destroy_partition`, which is
        // also where new messages for a still-owned sibling partition
        // remain untouched.
        for &partition in partitions {
            self.states.insert(partition, PartitionState::Revoking);
        }

        let mut timed_out = Vec::new();
        let mut flush_outcomes: Vec<FlushOutcome> = Vec::new();
        for &partition in partitions {
            match tokio::time::timeout(
                self.revocation_deadline,
                self.registry.flush_partition(partition, FlushReason::PartitionRevoked, &self.blob_sink),
            )
            .await
            {
                Ok(outcomes) => {
                    for outcome in &outcomes {
                        if let Err(e) = &outcome.result {
                            tracing::warn!(
                                partition = outcome.partition,
                                session_id = %outcome.session_id,
                                error = %e,
                                "flush failed during revocation"
                            );
                        }
                    }
                    flush_outcomes.extend(outcomes);
                }
                Err(_) => {
                    let err = IngestError::RevocationTimeout(partition);
                    tracing::error!(partition, error = %err, "revocation deadline exceeded while flushing, proceeding to shutdown to avoid split-brain");
                    timed_out.push(partition);
                }
            }
        }

        let flush_failures: Vec<(i32, String)> = flush_outcomes
            .iter()
            .filter_map(|o| match &o.result {
                Err(_) => Some((o.partition, o.session_id.clone())),
                Ok(()) => None,
            })
            .collect();

        let mut committed = Vec::new();
        for &partition in partitions {
            match tokio::time::timeout(
                self.revocation_deadline,
                self.commit_coordinator.run_for_partition(&self.topic, partition, &self.tracker, &self.registry),
            )
            .await
            {
                Ok(Ok(Some(offset))) => committed.push((partition, offset)),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => tracing::warn!(partition, error = %e, "commit failed during revocation"),
                Err(_) => {
                    let err = IngestError::RevocationTimeout(partition);
                    tracing::error!(partition, error = %err, "revocation deadline exceeded while committing, proceeding to shutdown to avoid split-brain");
                    timed_out.push(partition);
                }
            }
        }

        // Snapshot before teardown removes the tracker entry below --
        // `last_message_offset` is gone the instant `tracker.remove` runs.
        let last_offsets: Vec<(i32, u64)> =
            partitions.iter().filter_map(|&p| self.tracker.last_message_offset(p).map(|o| (p, o))).collect();

        for &partition in partitions {
            self.registry.destroy_partition(partition).await;
            self.tracker.remove(partition);
            self.commit_coordinator.forget(partition);
            self.states.remove(&partition);
            self.log_if_debug(partition, "partition revoked and torn down");
        }

        RevocationReport { committed, flush_failures, flush_outcomes, last_offsets, timed_out }
    }
}

#[derive(Debug, Default)]
pub struct RevocationReport {
    pub committed: Vec<(i32, u64)>,
    pub flush_failures: Vec<(i32, String)>,
    /// Every flush attempt from this revocation, successes included --
    /// the caller routes these through the same watermark-advance logic
    /// the periodic flush path uses before acknowledging the broker.
    pub flush_outcomes: Vec<FlushOutcome>,
    /// `(partition, last_message_offset)` captured just before teardown
    /// removed it from the tracker, for subsystem watermark advancement.
    pub last_offsets: Vec<(i32, u64)>,
    /// Partitions whose flush or commit step exceeded the revocation
    /// deadline (spec §7 `RevocationTimeout`).
    pub timed_out: Vec<i32>,
}
