// Narrow capability interfaces for everything the spec treats as an
// external collaborator: the log client, the blob sink, the shared kv
// store, and team/auth lookup. The ingester never assumes a richer API
// than what's declared here -- this is what lets `src/fakes.rs` stand in
// for all four in tests without a broker, bucket, or Redis instance
// anywhere nearby.

use async_trait::async_trait;
use crate::error::Result;
use crate::message::Team;

/// The log client: broker connection, group membership, and the fetch
/// loop are out of scope (spec §1); this is only the commit half.
#[async_trait]
pub trait LogClient: Send + Sync {
    async fn commit(&self, topic: &str, partition: i32, offset: u64) -> Result<()>;
    async fn committed(&self, topic: &str, partition: i32) -> Result<Option<u64>>;
}

/// Opaque blob sink keyed by path. Idempotent by path -- retries must use
/// the same path (spec §5).
#[async_trait]
pub trait BlobSink: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()>;
}

/// The shared kv store backing session/persistent watermarks and the
/// overflow set. Hash operations back the two watermark maps; sorted-set
/// operations back the overflow set (spec §6 "kv keys").
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<u64>>;
    async fn hash_set(&self, key: &str, field: &str, value: u64) -> Result<()>;

    /// Adds `member` with `score` only if not already present. Returns
    /// `true` if it was newly added.
    async fn zadd_nx(&self, key: &str, member: &str, score: f64) -> Result<bool>;

    /// Removes members scored below `max_score`; returns the count removed.
    async fn zremrangebyscore(&self, key: &str, max_score: f64) -> Result<u64>;
}

/// Team/authorization lookup by API token.
#[async_trait]
pub trait TeamResolver: Send + Sync {
    async fn resolve(&self, team_token: &str) -> Result<Option<Team>>;
}

/// Counters and gauges. Out of scope per spec §1 ("Metrics, logging, and
/// process bootstrap"); kept as a no-cost capability interface so the
/// ingester can still emit them without depending on a specific backend.
pub trait MetricsSink: Send + Sync {
    fn counter(&self, name: &'static str, value: u64);
    fn gauge(&self, name: &'static str, value: f64);
}

/// A `MetricsSink` that discards everything. Used whenever
/// `Config::metrics_enabled` is false, or as a default in tests that don't
/// care about counters.
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn counter(&self, _name: &'static str, _value: u64) {}
    fn gauge(&self, _name: &'static str, _value: f64) {}
}
