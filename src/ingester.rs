// Top-level wiring (spec §2 "Data/control flow"): decodes and routes one
// batch of messages, and runs the periodic maintenance pass that flushes,
// sweeps overflow, and commits.

use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use crate::collaborators::{BlobSink, KvStore, LogClient, MetricsSink, TeamResolver};
use crate::commit::OffsetCommitCoordinator;
use crate::config::Config;
use crate::error::Result;
use crate::lifecycle::{PartitionLifecycleController, RevocationReport};
use crate::message::{decode_payload, Message};
use crate::overflow::OverflowDetector;
use crate::partition_tracker::PartitionTracker;
use crate::registry::SessionRegistry;
use crate::watermark::{PersistentHighWaterMarker, SessionHighWaterMarker};

/// Subsystems whose persistent watermark should advance alongside the
/// partition's `lastMessageOffset` on every successful flush (spec §4.3
/// "Generalizes the above for multiple downstream pipelines"). Empty by
/// default; a deployment wires in whatever consumes this ingester's
/// output in lockstep.
#[derive(Default)]
pub struct Subsystems(pub Vec<String>);

pub struct Ingester {
    config: Config,
    registry: Arc<SessionRegistry>,
    tracker: Arc<PartitionTracker>,
    session_watermarker: SessionHighWaterMarker,
    persistent_watermarker: PersistentHighWaterMarker,
    subsystems: Subsystems,
    commit_coordinator: Arc<OffsetCommitCoordinator>,
    overflow_detector: Option<OverflowDetector>,
    lifecycle: PartitionLifecycleController,
    team_resolver: Arc<dyn TeamResolver>,
    blob_sink: Arc<dyn BlobSink>,
    metrics: Arc<dyn MetricsSink>,
    /// Serializes lifecycle callbacks against batch handling (spec §5).
    batch_lock: AsyncMutex<()>,
}

impl Ingester {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        log_client: Arc<dyn LogClient>,
        blob_sink: Arc<dyn BlobSink>,
        kv: Arc<dyn KvStore>,
        team_resolver: Arc<dyn TeamResolver>,
        metrics: Arc<dyn MetricsSink>,
        subsystems: Subsystems,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let tracker = Arc::new(PartitionTracker::new());
        let commit_coordinator = Arc::new(OffsetCommitCoordinator::new(log_client.clone()));
        let topic = config.topic().to_string();

        let session_watermarker = SessionHighWaterMarker::new(
            kv.clone(),
            config.kv_key_prefix.clone(),
            config.consumer_group.clone(),
            topic.clone(),
        );
        let persistent_watermarker = PersistentHighWaterMarker::new(
            kv.clone(),
            config.kv_key_prefix.clone(),
            config.consumer_group.clone(),
            topic.clone(),
        );

        let overflow_detector = if config.overflow_enabled && !config.consume_overflow {
            Some(OverflowDetector::new(
                kv.clone(),
                &config.kv_key_prefix,
                config.overflow_burst_bytes,
                config.overflow_replenish_bytes_per_second,
                config.overflow_ttl_seconds,
                config.overflow_min_sessions_per_batch,
            ))
        } else {
            None
        };

        let lifecycle = PartitionLifecycleController::new(
            topic,
            registry.clone(),
            tracker.clone(),
            commit_coordinator.clone(),
            blob_sink.clone(),
            log_client,
            config.debug_partition,
            config.revocation_deadline(),
        );

        Self {
            config,
            registry,
            tracker,
            session_watermarker,
            persistent_watermarker,
            subsystems,
            commit_coordinator,
            overflow_detector,
            lifecycle,
            team_resolver,
            blob_sink,
            metrics,
            batch_lock: AsyncMutex::new(()),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &PartitionLifecycleController {
        &self.lifecycle
    }

    pub fn session_watermark(&self) -> &SessionHighWaterMarker {
        &self.session_watermarker
    }

    pub async fn assign(&self, partitions: &[i32]) -> Result<()> {
        let _guard = self.batch_lock.lock().await;
        self.lifecycle.assign(partitions).await
    }

    /// Revokes the given partitions and, before returning, routes every
    /// successful flush through the same watermark-advance path the
    /// periodic maintenance pass uses -- otherwise a session that flushed
    /// during revocation would have no recorded watermark, and its
    /// already-durable messages would be reprocessed from scratch on
    /// replay (see `apply_flush_outcomes`).
    pub async fn revoke(&self, partitions: &[i32]) -> RevocationReport {
        let _guard = self.batch_lock.lock().await;
        let mut report = self.lifecycle.revoke(partitions).await;
        let outcomes = std::mem::take(&mut report.flush_outcomes);
        let last_offsets: std::collections::HashMap<i32, u64> = report.last_offsets.iter().copied().collect();

        if let Err(e) = self.apply_flush_outcomes(outcomes, |p| last_offsets.get(&p).copied()).await {
            tracing::warn!(error = %e, "failed applying watermark advances after revocation");
        }
        if !report.timed_out.is_empty() {
            tracing::error!(
                partitions = ?report.timed_out,
                "revocation timed out for one or more partitions, shutdown recommended to avoid split-brain"
            );
        }
        report
    }

    /// Decodes, team-resolves, watermark-filters, and routes one batch of
    /// messages (spec §2). Per-message errors never fail the batch (spec
    /// §7): decode and auth failures are skipped, local disk failures on
    /// `add` propagate and fail the batch so the broker redelivers.
    pub async fn handle_batch(&self, messages: Vec<Message>) -> Result<()> {
        let _guard = self.batch_lock.lock().await;
        let spill_dir = std::path::Path::new(&self.config.local_spill_directory);

        for message in messages {
            let partition = message.partition;
            self.tracker.observe(partition, message.offset, message.timestamp_ms);
            let debug = self.config.debug_partition == Some(partition);

            let decoded = match decode_payload(&message.payload) {
                Ok(decoded) => decoded,
                Err(e) => {
                    self.metrics.counter("messages_decode_failed", 1);
                    if debug {
                        tracing::info!(partition, offset = message.offset, error = %e, "decode failed");
                    }
                    continue;
                }
            };

            let team = match self.team_resolver.resolve(&decoded.team_token).await? {
                Some(team) if team.recording_enabled => team,
                _ => {
                    self.metrics.counter("messages_auth_failed", 1);
                    continue;
                }
            };

            if self
                .session_watermarker
                .is_duplicate(partition, &decoded.session_id, message.offset)
                .await?
            {
                self.metrics.counter("messages_duplicate", 1);
                continue;
            }

            self.metrics.counter("messages_decoded", 1);
            let event_count = decoded.event_records.len() as u64;
            self.registry
                .route_message(spill_dir, partition, team.id, &decoded.session_id, &message, event_count)
                .await?;

            if let Some(overflow) = &self.overflow_detector {
                let overflowed = overflow
                    .on_message_accepted(team.id, &decoded.session_id, message.size_bytes(), message.timestamp_ms)
                    .await?;
                if overflowed {
                    self.metrics.counter("sessions_overflowed", 1);
                }
            }

            if debug {
                tracing::info!(partition, offset = message.offset, session_id = %decoded.session_id, "message routed");
            }
        }
        Ok(())
    }

    /// Advances the session and persistent watermarks for every
    /// successful flush in `outcomes`. `last_offset` resolves a
    /// partition's `lastMessageOffset` for the persistent watermark (spec
    /// §4.3); the periodic path reads it live off the tracker, while the
    /// revocation path must pass in a pre-teardown snapshot since
    /// `PartitionLifecycleController::revoke` removes the tracker entry
    /// for each partition it tears down before this is ever called.
    async fn apply_flush_outcomes(
        &self,
        outcomes: Vec<crate::registry::FlushOutcome>,
        last_offset: impl Fn(i32) -> Option<u64>,
    ) -> Result<()> {
        for outcome in outcomes {
            match outcome.result {
                Ok(()) => {
                    self.metrics.counter("buffers_flushed", 1);
                    self.session_watermarker
                        .advance(outcome.partition, &outcome.session_id, outcome.newest_offset)
                        .await?;
                    for subsystem in &self.subsystems.0 {
                        if let Some(offset) = last_offset(outcome.partition) {
                            self.persistent_watermarker
                                .advance(outcome.partition, subsystem, offset)
                                .await?;
                        }
                    }
                }
                Err(e) => {
                    self.metrics.counter("buffers_flush_failed", 1);
                    tracing::warn!(partition = outcome.partition, session_id = %outcome.session_id, error = %e, "flush failed");
                }
            }
        }
        Ok(())
    }

    /// Periodic maintenance pass (spec §2): flush buffers past threshold,
    /// sweep the overflow set, and run the commit coordinator.
    pub async fn run_maintenance(&self, now_ms: i64) -> Result<()> {
        let max_age = self.config.max_buffer_age();
        let max_size = self.config.max_buffer_size_bytes;
        let partition_idle_ms = self.config.partition_idle().as_millis() as i64;

        for partition in self.lifecycle.owned_partitions() {
            if let Some(last_ts) = self.tracker.last_message_timestamp_ms(partition) {
                if now_ms.saturating_sub(last_ts) >= partition_idle_ms {
                    let outcomes = self
                        .registry
                        .flush_partition(partition, crate::buffer::FlushReason::PartitionShutdown, &self.blob_sink)
                        .await;
                    self.apply_flush_outcomes(outcomes, |p| self.tracker.last_message_offset(p)).await?;
                }
            }
        }

        let outcomes = self
            .registry
            .flush_ready(max_age, max_size, &self.blob_sink, now_ms)
            .await;
        self.apply_flush_outcomes(outcomes, |p| self.tracker.last_message_offset(p)).await?;

        if let Some(overflow) = &self.overflow_detector {
            overflow.sweep(now_ms).await?;
        }

        let owned = self.lifecycle.owned_partitions();
        let results = self
            .commit_coordinator
            .run(self.config.topic(), &owned, &self.tracker, &self.registry)
            .await;
        for (partition, result) in results {
            match result {
                Ok(Some(_)) => self.metrics.counter("commits_issued", 1),
                Ok(None) => {}
                Err(e) => tracing::warn!(partition, error = %e, "commit failed, retrying next tick"),
            }
        }
        Ok(())
    }
}
