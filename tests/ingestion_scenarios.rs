// End-to-end scenarios, run against the in-memory fakes.

use std::sync::Arc;
use tempfile::tempdir;

use session_ingester::collaborators::{BlobSink, KvStore, MetricsSink, TeamResolver};
use session_ingester::config::Config;
use session_ingester::fakes::{InMemoryBlobSink, InMemoryKvStore, InMemoryLogClient, InMemoryTeamResolver};
use session_ingester::message::{Message, Team};
use session_ingester::metrics::IngesterMetrics;
use session_ingester::{Ingester, Subsystems};

fn msg(partition: i32, offset: u64, ts: i64, payload: Vec<u8>) -> Message {
    Message {
        topic: "main".to_string(),
        partition,
        offset,
        timestamp_ms: ts,
        key: None,
        payload,
        trace_id: None,
    }
}

fn payload(token: &str, session_id: &str, bytes: usize) -> Vec<u8> {
    let filler = "x".repeat(bytes);
    format!(r#"{{"team_token":"{token}","session_id":"{session_id}","event_records":[{{"f":"{filler}"}}]}}"#)
        .into_bytes()
}

fn harness(
    dir: &std::path::Path,
    consume_overflow: bool,
) -> (Ingester, Arc<InMemoryLogClient>, Arc<InMemoryBlobSink>, Arc<InMemoryKvStore>) {
    let mut config = Config::default();
    config.local_spill_directory = dir.to_string_lossy().to_string();
    config.consume_overflow = consume_overflow;

    let log_client = Arc::new(InMemoryLogClient::default());
    let blob_sink = Arc::new(InMemoryBlobSink::default());
    let kv = Arc::new(InMemoryKvStore::default());
    let team_resolver: Arc<dyn TeamResolver> = Arc::new(
        InMemoryTeamResolver::default().with_team("tok", Team { id: 1, name: "acme".into(), recording_enabled: true }),
    );
    let metrics: Arc<dyn MetricsSink> = Arc::new(IngesterMetrics::new());

    let ingester = Ingester::new(
        config,
        log_client.clone(),
        blob_sink.clone() as Arc<dyn BlobSink>,
        kv.clone() as Arc<dyn KvStore>,
        team_resolver,
        metrics,
        Subsystems::default(),
    );
    (ingester, log_client, blob_sink, kv)
}

/// S1 -- simple commit: sid1 blocks until flushed, then commit jumps past it.
#[tokio::test]
async fn s1_simple_commit() {
    let dir = tempdir().unwrap();
    let (ingester, log_client, _, _) = harness(dir.path(), false);
    // A consumer about to be handed offset 1 was, by definition, already
    // committed at 1 -- seed that so assign's fetch reflects a realistic
    // starting position instead of an impossible "nothing ever committed".
    log_client.commit("main", 1, 1).await.unwrap();
    ingester.assign(&[1]).await.unwrap();

    ingester
        .handle_batch(vec![
            msg(1, 1, 1000, payload("tok", "sid1", 10)),
            msg(1, 2, 1000, payload("tok", "sid1", 10)),
        ])
        .await
        .unwrap();

    ingester.run_maintenance(1000).await.unwrap();
    assert_eq!(log_client.committed_offset("main", 1), Some(1), "sid1 still open, blocks at 1");

    // Force the buffer past its age threshold so maintenance flushes it.
    ingester.run_maintenance(1000 + 10 * 60 * 1000).await.unwrap();
    assert_eq!(log_client.committed_offset("main", 1), Some(3));
}

/// S3 -- entire batch disabled: commit still advances past L even though
/// no buffer was ever created.
#[tokio::test]
async fn s3_entire_batch_disabled() {
    let dir = tempdir().unwrap();
    let (ingester, log_client, _, _) = harness(dir.path(), false);
    ingester.assign(&[1]).await.unwrap();

    ingester
        .handle_batch(vec![
            msg(1, 12, 1000, payload("no-such-token", "sid1", 10)),
            msg(1, 13, 1000, payload("no-such-token", "sid1", 10)),
        ])
        .await
        .unwrap();

    ingester.run_maintenance(1000).await.unwrap();
    assert_eq!(log_client.committed_offset("main", 1), Some(14));
}

/// S4 -- overflow burst: ten 150kB messages 10ms apart vastly exceeds a
/// 1MB burst / 1kB-per-second allowance and must land in the overflow set.
#[tokio::test]
async fn s4_overflow_burst() {
    let dir = tempdir().unwrap();
    let (ingester, _, _, kv) = harness(dir.path(), false);
    ingester.assign(&[1]).await.unwrap();

    let mut batch = Vec::new();
    for i in 0..10u64 {
        batch.push(msg(1, i + 1, (i * 10) as i64, payload("tok", "sid1", 150_000)));
    }
    ingester.handle_batch(batch).await.unwrap();

    let members = kv.sorted_set_members("capture/capture-overflow/replay");
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].0, "sid1");
}

/// S5 -- overflow backfill: the same totals spread 150s apart stay within
/// the replenishment rate and never overflow.
#[tokio::test]
async fn s5_overflow_backfill() {
    let dir = tempdir().unwrap();
    let (ingester, _, _, kv) = harness(dir.path(), false);
    ingester.assign(&[1]).await.unwrap();

    let mut batch = Vec::new();
    for i in 0..10u64 {
        batch.push(msg(1, i + 1, (i * 150_000) as i64, payload("tok", "sid1", 150_000)));
    }
    ingester.handle_batch(batch).await.unwrap();

    let members = kv.sorted_set_members("capture/capture-overflow/replay");
    assert!(members.is_empty());
}

/// S6 -- revocation midstream: only the revoked partition's buffers are
/// flushed, committed, and destroyed; the sibling partition is untouched.
/// Both sessions flushed successfully, so both must come out of
/// revocation with an advanced session watermark -- otherwise a replay of
/// partition 1 would reprocess and re-spill a session that already made
/// it to blob storage.
#[tokio::test]
async fn s6_revocation_midstream() {
    let dir = tempdir().unwrap();
    let (ingester, log_client, _, _) = harness(dir.path(), false);
    ingester.assign(&[1, 2]).await.unwrap();

    ingester
        .handle_batch(vec![
            msg(1, 1, 1000, payload("tok", "sid1", 10)),
            msg(1, 2, 1000, payload("tok", "sid2", 10)),
            msg(2, 1, 1000, payload("tok", "sid3", 10)),
        ])
        .await
        .unwrap();

    assert!(ingester.registry().contains(1, 1, "sid1"));
    assert!(ingester.registry().contains(1, 1, "sid2"));
    assert!(ingester.registry().contains(2, 1, "sid3"));

    let report = ingester.revoke(&[1]).await;

    assert_eq!(report.committed, vec![(1, 3)]);
    assert_eq!(log_client.committed_offset("main", 1), Some(3));
    assert!(!ingester.registry().contains(1, 1, "sid1"));
    assert!(!ingester.registry().contains(1, 1, "sid2"));
    assert!(ingester.registry().contains(2, 1, "sid3"), "partition 2 must be untouched");

    assert_eq!(ingester.session_watermark().get(1, "sid1").await.unwrap(), Some(1));
    assert_eq!(ingester.session_watermark().get(1, "sid2").await.unwrap(), Some(2));
}

/// sid1 and sid2 share partition 1; sid2's flush fails during revocation
/// (so the commit candidate stays capped at sid2's offset) but sid1's
/// still has to come out with an advanced watermark -- otherwise replaying
/// partition 1 from the uncommitted offset would reprocess sid1 a second
/// time even though it's already durable.
#[tokio::test]
async fn revocation_advances_watermark_for_sibling_that_flushed() {
    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.local_spill_directory = dir.path().to_string_lossy().to_string();

    let log_client = Arc::new(InMemoryLogClient::default());
    let blob_sink: Arc<dyn BlobSink> = Arc::new(session_ingester::fakes::SelectiveFailBlobSink::new("sid2"));
    let kv = Arc::new(InMemoryKvStore::default());
    let team_resolver: Arc<dyn TeamResolver> = Arc::new(
        InMemoryTeamResolver::default().with_team("tok", Team { id: 1, name: "acme".into(), recording_enabled: true }),
    );
    let metrics: Arc<dyn MetricsSink> = Arc::new(IngesterMetrics::new());
    let ingester = Ingester::new(
        config,
        log_client.clone(),
        blob_sink,
        kv.clone() as Arc<dyn KvStore>,
        team_resolver,
        metrics,
        Subsystems::default(),
    );

    ingester.assign(&[1]).await.unwrap();
    ingester
        .handle_batch(vec![
            msg(1, 1, 1000, payload("tok", "sid1", 10)),
            msg(1, 2, 1000, payload("tok", "sid2", 10)),
        ])
        .await
        .unwrap();

    let report = ingester.revoke(&[1]).await;

    assert!(report.committed.is_empty(), "sid2 never flushed, so nothing can commit past it");
    assert_eq!(
        ingester.session_watermark().get(1, "sid1").await.unwrap(),
        Some(1),
        "sid1 flushed successfully and must not be redelivered"
    );
    assert_eq!(ingester.session_watermark().get(1, "sid2").await.unwrap(), None);
}

/// S2 -- blocking session: a still-open session at the partition's lowest
/// offset caps the commit candidate at its own offset, no matter how far
/// ahead the rest of the partition has flushed.
#[tokio::test]
async fn s2_blocking_session() {
    let dir = tempdir().unwrap();
    let (ingester, log_client, _, _) = harness(dir.path(), false);
    ingester.assign(&[1]).await.unwrap();

    ingester
        .handle_batch(vec![msg(1, 1, 1000, payload("tok", "sid1", 10))])
        .await
        .unwrap();
    ingester.run_maintenance(1000 + 10 * 60 * 1000).await.unwrap();
    assert_eq!(log_client.committed_offset("main", 1), Some(2), "sid1 flushed, nothing should block L + 1");

    ingester
        .handle_batch(vec![msg(1, 5, 2000, payload("tok", "sid2", 10))])
        .await
        .unwrap();
    ingester.run_maintenance(2000).await.unwrap();
    assert_eq!(log_client.committed_offset("main", 1), Some(5), "sid2 just arrived, nothing blocks behind it yet");

    ingester
        .handle_batch(vec![msg(1, 6, 2500, payload("tok", "sid3", 10))])
        .await
        .unwrap();
    ingester.run_maintenance(2500).await.unwrap();
    assert_eq!(
        log_client.committed_offset("main", 1),
        Some(5),
        "sid2 still open at offset 5, must keep blocking the candidate"
    );
}

/// The overflow-reading secondary instance never runs its own detector
/// (spec §4.5, §6): `ConsumeOverflow = true` disables it entirely, no
/// matter how large a batch it's handed.
#[tokio::test]
async fn consume_overflow_instance_never_runs_its_own_detector() {
    let dir = tempdir().unwrap();
    let (ingester, _, _, kv) = harness(dir.path(), true);
    ingester.assign(&[1]).await.unwrap();

    let mut batch = Vec::new();
    for i in 0..10u64 {
        batch.push(msg(1, i + 1, (i * 10) as i64, payload("tok", "sid1", 150_000)));
    }
    ingester.handle_batch(batch).await.unwrap();

    let members = kv.sorted_set_members("capture/capture-overflow/replay");
    assert!(members.is_empty());
}
