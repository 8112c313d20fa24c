// Session and Persistent High-Water Marks (spec §4.4 and §3).
//
// Both are hashes in the shared kv store, keyed by
// `{prefix}/{scope}/{group}/{topic}/{partition}` (spec §6), mapping a
// narrower key (`session_id` or `subsystem`) to the last offset that
// scope has durably processed. Both are monotonically non-decreasing --
// a write that would lower the stored offset is silently dropped rather
// than applied, since offsets only ever move forward as replay catches
// back up to where a previous generation of this consumer left off.

use std::sync::Arc;

use crate::collaborators::KvStore;
use crate::error::Result;

fn session_key(prefix: &str, group: &str, topic: &str, partition: i32) -> String {
    format!("{prefix}/sessions/{group}/{topic}/{partition}")
}

fn subsystem_key(prefix: &str, group: &str, topic: &str, partition: i32) -> String {
    format!("{prefix}/subsystems/{group}/{topic}/{partition}")
}

pub struct SessionHighWaterMarker {
    kv: Arc<dyn KvStore>,
    prefix: String,
    group: String,
    topic: String,
}

impl SessionHighWaterMarker {
    pub fn new(kv: Arc<dyn KvStore>, prefix: String, group: String, topic: String) -> Self {
        Self { kv, prefix, group, topic }
    }

    /// Returns the last durably-flushed offset for `session_id` on
    /// `partition`, if any watermark has been recorded.
    pub async fn get(&self, partition: i32, session_id: &str) -> Result<Option<u64>> {
        let key = session_key(&self.prefix, &self.group, &self.topic, partition);
        self.kv.hash_get(&key, session_id).await
    }

    /// Advances the watermark for `session_id` to `offset`, unless that
    /// would move it backwards.
    pub async fn advance(&self, partition: i32, session_id: &str, offset: u64) -> Result<()> {
        let key = session_key(&self.prefix, &self.group, &self.topic, partition);
        if let Some(existing) = self.kv.hash_get(&key, session_id).await? {
            if existing >= offset {
                return Ok(());
            }
        }
        self.kv.hash_set(&key, session_id, offset).await
    }

    /// Spec §4.3: a message is a duplicate replay if the session's
    /// watermark is already at or past its offset.
    pub async fn is_duplicate(&self, partition: i32, session_id: &str, offset: u64) -> Result<bool> {
        Ok(self
            .get(partition, session_id)
            .await?
            .map(|wm| wm >= offset)
            .unwrap_or(false))
    }
}

pub struct PersistentHighWaterMarker {
    kv: Arc<dyn KvStore>,
    prefix: String,
    group: String,
    topic: String,
}

impl PersistentHighWaterMarker {
    pub fn new(kv: Arc<dyn KvStore>, prefix: String, group: String, topic: String) -> Self {
        Self { kv, prefix, group, topic }
    }

    pub async fn get(&self, partition: i32, subsystem: &str) -> Result<Option<u64>> {
        let key = subsystem_key(&self.prefix, &self.group, &self.topic, partition);
        self.kv.hash_get(&key, subsystem).await
    }

    pub async fn advance(&self, partition: i32, subsystem: &str, offset: u64) -> Result<()> {
        let key = subsystem_key(&self.prefix, &self.group, &self.topic, partition);
        if let Some(existing) = self.kv.hash_get(&key, subsystem).await? {
            if existing >= offset {
                return Ok(());
            }
        }
        self.kv.hash_set(&key, subsystem, offset).await
    }
}
