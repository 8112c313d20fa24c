// Overflow Detector (spec §4.5): a per-`(team, session)` token bucket that
// flags sessions whose byte rate exceeds their allowance and publishes
// them to a shared quarantine set.
//
// Only the primary consumer instance runs this -- the overflow-reading
// secondary instance (`Config::consume_overflow == true`) never calls
// `on_message_accepted`, since its whole purpose is to drain the sessions
// this detector already flagged (spec §4.5, §6).

use dashmap::DashMap;
use std::sync::Arc;

use crate::collaborators::KvStore;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_seen_ms: i64,
}

pub struct OverflowDetector {
    kv: Arc<dyn KvStore>,
    overflow_set_key: String,
    capacity: f64,
    refill_per_ms: f64,
    ttl_seconds: u64,
    min_sessions_per_batch: usize,
    buckets: DashMap<(u64, String), Bucket>,
}

impl OverflowDetector {
    pub fn new(
        kv: Arc<dyn KvStore>,
        kv_key_prefix: &str,
        capacity_bytes: u64,
        replenish_bytes_per_second: u64,
        ttl_seconds: u64,
        min_sessions_per_batch: usize,
    ) -> Self {
        Self {
            kv,
            // Spec §6 "kv keys": literal, not parametrized by consumer
            // group -- both the `main` and `overflow` topic instances
            // share one quarantine set.
            overflow_set_key: format!("{kv_key_prefix}/capture-overflow/replay"),
            capacity: capacity_bytes as f64,
            refill_per_ms: replenish_bytes_per_second as f64 / 1000.0,
            ttl_seconds,
            min_sessions_per_batch,
            buckets: DashMap::new(),
        }
    }

    pub fn min_sessions_per_batch(&self) -> usize {
        self.min_sessions_per_batch
    }

    /// Refills the bucket for `(team_id, session_id)` to `now_ms`, then
    /// subtracts `size_bytes`. Returns `true` if the session overflowed
    /// (tokens went negative).
    fn debit(&self, team_id: u64, session_id: &str, size_bytes: u64, now_ms: i64) -> bool {
        let mut entry = self
            .buckets
            .entry((team_id, session_id.to_string()))
            .or_insert(Bucket {
                tokens: self.capacity,
                last_seen_ms: now_ms,
            });

        let elapsed_ms = (now_ms - entry.last_seen_ms).max(0) as f64;
        entry.tokens = (entry.tokens + elapsed_ms * self.refill_per_ms).min(self.capacity);
        entry.last_seen_ms = now_ms;
        entry.tokens -= size_bytes as f64;

        entry.tokens < 0.0
    }

    /// Called once per accepted message (spec §4.5: "on each message
    /// acceptance"). On overflow, records the session in the shared
    /// quarantine set and sweeps expired entries.
    pub async fn on_message_accepted(
        &self,
        team_id: u64,
        session_id: &str,
        size_bytes: u64,
        now_ms: i64,
    ) -> Result<bool> {
        let overflowed = self.debit(team_id, session_id, size_bytes, now_ms);
        if overflowed {
            let now_s = now_ms as f64 / 1000.0;
            let expiry = now_s + self.ttl_seconds as f64;
            self.kv.zadd_nx(&self.overflow_set_key, session_id, expiry).await?;
            self.kv.zremrangebyscore(&self.overflow_set_key, now_s).await?;
            tracing::info!(team_id, session_id, "session overflowed, added to quarantine set");
        }
        Ok(overflowed)
    }

    /// Drops bucket state for a session that has been destroyed, so a new
    /// session reusing the same id later doesn't inherit stale tokens.
    pub fn forget(&self, team_id: u64, session_id: &str) {
        self.buckets.remove(&(team_id, session_id.to_string()));
    }

    /// Periodic GC of the quarantine set independent of any new overflow
    /// (spec §2 maintenance pass "(b) run the overflow detector across all
    /// active buffers"). Returns the number of entries removed.
    pub async fn sweep(&self, now_ms: i64) -> Result<u64> {
        self.kv
            .zremrangebyscore(&self.overflow_set_key, now_ms as f64 / 1000.0)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::InMemoryKvStore;

    fn detector(capacity: u64, refill_per_sec: u64) -> OverflowDetector {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::default());
        OverflowDetector::new(kv, "capture", capacity, refill_per_sec, 86_400, 1)
    }

    /// S4 from spec §8: a burst that exceeds capacity in one shot.
    #[tokio::test]
    async fn s4_overflow_burst() {
        let detector = detector(1_000_000, 1_000);
        let overflowed = detector
            .on_message_accepted(1, "sid1", 2_000_000, 0)
            .await
            .unwrap();
        assert!(overflowed);
    }

    #[tokio::test]
    async fn staying_under_capacity_never_overflows() {
        let detector = detector(1_000_000, 1_000);
        for i in 0..10 {
            let overflowed = detector
                .on_message_accepted(1, "sid1", 50_000, i * 1000)
                .await
                .unwrap();
            assert!(!overflowed);
        }
    }

    /// Spec §8 invariant 5: receiving more than `BurstBytes + k *
    /// ReplenishBytesPerSecond` within `k` seconds overflows, for any `k`.
    #[tokio::test]
    async fn sustained_rate_above_replenishment_eventually_overflows() {
        let detector = detector(1_000, 100);
        let mut overflowed_once = false;
        for i in 0..20 {
            let overflowed = detector
                .on_message_accepted(1, "sid1", 200, i * 1000)
                .await
                .unwrap();
            overflowed_once |= overflowed;
        }
        assert!(overflowed_once);
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let detector = detector(1_000, 1_000);
        assert!(!detector.on_message_accepted(1, "sid1", 1_000, 0).await.unwrap());
        // Bucket now empty; an immediate second message of any size overflows.
        assert!(detector.on_message_accepted(1, "sid1", 1, 0).await.unwrap());
        // After a full second, capacity has refilled entirely.
        assert!(!detector.on_message_accepted(1, "sid1", 1_000, 1000).await.unwrap());
    }

    /// S5 from spec §8: overflow entries are published with "add if not
    /// present" semantics and the set is swept of expired entries on write.
    #[tokio::test]
    async fn overflow_set_is_written_with_add_if_absent_and_swept() {
        let kv = Arc::new(InMemoryKvStore::default());
        let kv_dyn: Arc<dyn KvStore> = kv.clone();
        let detector = OverflowDetector::new(kv_dyn, "capture", 100, 10, 1, 1);

        assert!(detector.on_message_accepted(1, "sid1", 200, 0).await.unwrap());
        let members = kv.sorted_set_members("capture/capture-overflow/replay");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0, "sid1");

        // A repeat overflow for the same session 500ms later must not
        // change its recorded expiry -- add-if-absent semantics.
        detector.on_message_accepted(1, "sid1", 500, 500).await.unwrap();
        let members = kv.sorted_set_members("capture/capture-overflow/replay");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].1, members[0].1, "score unchanged by the second add");

        // Far in the future sid1's entry (ttl = 1s) has expired; a new
        // overflow from sid2 sweeps it out when it writes.
        assert!(detector
            .on_message_accepted(2, "sid2", 200, 10_000)
            .await
            .unwrap());
        let members = kv.sorted_set_members("capture/capture-overflow/replay");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0, "sid2");
    }
}
