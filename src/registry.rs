// Session Registry (spec §4.2): the mapping
// `(partition, team_id, session_id) -> SessionBuffer` for partitions this
// consumer currently owns, plus a per-partition index for O(P)
// enumeration during revocation.
//
// Per the design notes (spec §9 "Cyclic references"), this is a flat
// store keyed by ids rather than a graph of cross-references -- the
// buffer doesn't know about the registry, and the registry doesn't know
// about the partition tracker or the watermarkers. Orchestration across
// those lives one level up, in `ingester.rs`.

use dashmap::{DashMap, DashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

use crate::buffer::{FlushReason, SessionBuffer};
use crate::collaborators::BlobSink;
use crate::error::Result;
use crate::message::Message;

type Key = (i32, u64, String);

/// The outcome of one buffer's flush attempt, carried back up to the
/// ingester so it can update the session high-water mark on success.
#[derive(Debug)]
pub struct FlushOutcome {
    pub partition: i32,
    pub team_id: u64,
    pub session_id: String,
    pub newest_offset: u64,
    pub result: Result<()>,
}

#[derive(Default)]
pub struct SessionRegistry {
    buffers: DashMap<Key, AsyncMutex<SessionBuffer>>,
    partition_index: DashMap<i32, DashSet<(u64, String)>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, partition: i32, team_id: u64, session_id: &str) -> bool {
        self.buffers
            .contains_key(&(partition, team_id, session_id.to_string()))
    }

    /// Routes one message into (creating if absent) the buffer for
    /// `(partition, team_id, session_id)`.
    pub async fn route_message(
        &self,
        spill_dir: &Path,
        partition: i32,
        team_id: u64,
        session_id: &str,
        message: &Message,
        event_count: u64,
    ) -> Result<()> {
        let key = (partition, team_id, session_id.to_string());
        if !self.buffers.contains_key(&key) {
            let buffer = SessionBuffer::open(team_id, session_id.to_string(), partition, spill_dir, message)?;
            self.buffers.insert(key.clone(), AsyncMutex::new(buffer));
            self.partition_index
                .entry(partition)
                .or_default()
                .insert((team_id, session_id.to_string()));
        }
        let entry = self.buffers.get(&key).expect("just ensured present");
        let mut buffer = entry.lock().await;
        buffer.add(message, event_count)
    }

    pub fn sessions_in_partition(&self, partition: i32) -> Vec<(u64, String)> {
        self.partition_index
            .get(&partition)
            .map(|set| set.iter().map(|r| r.clone()).collect())
            .unwrap_or_default()
    }

    /// `B` in the commit coordinator's formula (spec §4.4 step 2): the
    /// lowest offset among this partition's still-blocking buffers, or
    /// `None` if every buffer in the partition is already durable.
    pub async fn lowest_offset_for_partition(&self, partition: i32) -> Option<u64> {
        let mut min: Option<u64> = None;
        for (team_id, session_id) in self.sessions_in_partition(partition) {
            let key = (partition, team_id, session_id);
            if let Some(entry) = self.buffers.get(&key) {
                let buffer = entry.lock().await;
                if let Some(lowest) = buffer.lowest_offset() {
                    min = Some(min.map_or(lowest, |m| m.min(lowest)));
                }
            }
        }
        min
    }

    /// Flushes every `Open` buffer in `partition` with the given reason,
    /// regardless of age or size (used for partition shutdown/revocation).
    pub async fn flush_partition(
        &self,
        partition: i32,
        reason: FlushReason,
        sink: &Arc<dyn BlobSink>,
    ) -> Vec<FlushOutcome> {
        let mut outcomes = Vec::new();
        for (team_id, session_id) in self.sessions_in_partition(partition) {
            let key = (partition, team_id, session_id.clone());
            if let Some(entry) = self.buffers.get(&key) {
                let mut buffer = entry.lock().await;
                if buffer.state() != crate::buffer::BufferState::Open {
                    continue;
                }
                let newest_offset = buffer.newest_offset();
                let result = buffer.flush(reason, sink).await;
                outcomes.push(FlushOutcome {
                    partition,
                    team_id,
                    session_id,
                    newest_offset,
                    result,
                });
            }
        }
        outcomes
    }

    /// Scans every owned buffer and flushes those whose age or size cross
    /// the configured threshold (spec §4.1 "Flush policy inputs").
    pub async fn flush_ready(
        &self,
        max_age: Duration,
        max_size_bytes: u64,
        sink: &Arc<dyn BlobSink>,
        now_ms: i64,
    ) -> Vec<FlushOutcome> {
        let mut outcomes = Vec::new();
        let keys: Vec<Key> = self.buffers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            let Some(entry) = self.buffers.get(&key) else { continue };
            let mut buffer = entry.lock().await;
            if buffer.state() != crate::buffer::BufferState::Open {
                continue;
            }
            let age_ms = now_ms.saturating_sub(buffer.oldest_timestamp_ms());
            let reason = if age_ms >= max_age.as_millis() as i64 {
                Some(FlushReason::BufferAge)
            } else if buffer.size_bytes() >= max_size_bytes {
                Some(FlushReason::BufferSize)
            } else {
                None
            };
            let Some(reason) = reason else { continue };
            let newest_offset = buffer.newest_offset();
            let (partition, team_id, session_id) = key.clone();
            let result = buffer.flush(reason, sink).await;
            outcomes.push(FlushOutcome {
                partition,
                team_id,
                session_id,
                newest_offset,
                result,
            });
        }
        outcomes
    }

    /// Removes every buffer owned by `partition` from the active set,
    /// destroying each one. Used by revocation (spec §4.6 steps 1 and 4)
    /// and by partition-idle shutdown.
    pub async fn destroy_partition(&self, partition: i32) -> usize {
        let keys = self.sessions_in_partition(partition);
        let count = keys.len();
        for (team_id, session_id) in &keys {
            let key = (partition, *team_id, session_id.clone());
            if let Some((_, buffer)) = self.buffers.remove(&key) {
                buffer.into_inner().destroy();
            }
        }
        self.partition_index.remove(&partition);
        count
    }

    pub fn total_buffers(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::InMemoryBlobSink;
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

    #[tokio::test]
    async fn route_message_creates_and_appends() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::new();
        registry
            .route_message(dir.path(), 1, 7, "sid1", &msg(1, 1000), 1)
            .await
            .unwrap();
        registry
            .route_message(dir.path(), 1, 7, "sid1", &msg(2, 2000), 1)
            .await
            .unwrap();

        assert!(registry.contains(1, 7, "sid1"));
        assert_eq!(registry.lowest_offset_for_partition(1).await, Some(1));
    }

    #[tokio::test]
    async fn flush_partition_destroys_nothing_but_marks_flushed() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::new();
        let sink: Arc<dyn BlobSink> = Arc::new(InMemoryBlobSink::default());
        registry
            .route_message(dir.path(), 1, 7, "sid1", &msg(1, 1000), 1)
            .await
            .unwrap();

        let outcomes = registry.flush_partition(1, FlushReason::PartitionRevoked, &sink).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(registry.lowest_offset_for_partition(1).await, None);
    }

    #[tokio::test]
    async fn destroy_partition_removes_all_sessions() {
        let dir = tempdir().unwrap();
        let registry = SessionRegistry::new();
        registry
            .route_message(dir.path(), 2, 1, "sid-a", &msg(1, 1000), 1)
            .await
            .unwrap();
        registry
            .route_message(dir.path(), 2, 1, "sid-b", &msg(1, 1000), 1)
            .await
            .unwrap();

        let destroyed = registry.destroy_partition(2).await;
        assert_eq!(destroyed, 2);
        assert_eq!(registry.total_buffers(), 0);
        assert!(registry.sessions_in_partition(2).is_empty());
    }
}
