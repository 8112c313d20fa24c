// In-memory fakes for the four collaborator traits (spec §9 "Dynamic
// dispatch of collaborators"). These back the crate's own test suite and
// are exported so downstream integration tests and local smoke runs don't
// need a broker, bucket, or Redis instance either.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::collaborators::{BlobSink, KvStore, LogClient, TeamResolver};
use crate::error::{IngestError, Result};
use crate::message::Team;

/// Records every committed offset per `(topic, partition)`, exposing them
/// for assertions (spec §8 scenarios reference literal committed offsets).
#[derive(Default)]
pub struct InMemoryLogClient {
    committed: DashMap<(String, i32), u64>,
    /// Full history of commits, in call order -- used to assert monotonicity.
    history: Mutex<Vec<(String, i32, u64)>>,
}

impl InMemoryLogClient {
    pub fn history(&self) -> Vec<(String, i32, u64)> {
        self.history.lock().clone()
    }

    pub fn committed_offset(&self, topic: &str, partition: i32) -> Option<u64> {
        self.committed.get(&(topic.to_string(), partition)).map(|v| *v)
    }
}

#[async_trait]
impl LogClient for InMemoryLogClient {
    async fn commit(&self, topic: &str, partition: i32, offset: u64) -> Result<()> {
        self.committed.insert((topic.to_string(), partition), offset);
        self.history.lock().push((topic.to_string(), partition, offset));
        Ok(())
    }

    async fn committed(&self, topic: &str, partition: i32) -> Result<Option<u64>> {
        Ok(self.committed_offset(topic, partition))
    }
}

/// Stores blobs by path in memory.
#[derive(Default)]
pub struct InMemoryBlobSink {
    objects: DashMap<String, Vec<u8>>,
}

impl InMemoryBlobSink {
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.get(path).map(|v| v.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }
}

#[async_trait]
impl BlobSink for InMemoryBlobSink {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects.insert(path.to_string(), bytes);
        Ok(())
    }
}

/// A blob sink that always fails -- used to exercise the flush-failure
/// retry path (spec §4.1).
pub struct AlwaysFailBlobSink;

#[async_trait]
impl BlobSink for AlwaysFailBlobSink {
    async fn put(&self, _path: &str, _bytes: Vec<u8>) -> Result<()> {
        Err(IngestError::Flush("simulated upload failure".to_string()))
    }
}

/// A blob sink that fails only uploads whose path contains `needle`,
/// delegating everything else to an in-memory store -- used to exercise a
/// partition where one session's flush fails and a sibling's succeeds.
#[derive(Default)]
pub struct SelectiveFailBlobSink {
    needle: String,
    inner: InMemoryBlobSink,
}

impl SelectiveFailBlobSink {
    pub fn new(needle: impl Into<String>) -> Self {
        Self { needle: needle.into(), inner: InMemoryBlobSink::default() }
    }
}

#[async_trait]
impl BlobSink for SelectiveFailBlobSink {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        if path.contains(&self.needle) {
            return Err(IngestError::Flush(format!("simulated upload failure for {path}")));
        }
        self.inner.put(path, bytes).await
    }
}

/// A minimal kv store: hashes plus one sorted set per key, held in memory.
#[derive(Default)]
pub struct InMemoryKvStore {
    hashes: DashMap<String, HashMap<String, u64>>,
    sorted_sets: DashMap<String, HashMap<String, f64>>,
}

impl InMemoryKvStore {
    pub fn sorted_set_members(&self, key: &str) -> Vec<(String, f64)> {
        self.sorted_sets
            .get(key)
            .map(|set| set.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<u64>> {
        Ok(self.hashes.get(key).and_then(|h| h.get(field).copied()))
    }

    async fn hash_set(&self, key: &str, field: &str, value: u64) -> Result<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn zadd_nx(&self, key: &str, member: &str, score: f64) -> Result<bool> {
        let mut set = self.sorted_sets.entry(key.to_string()).or_default();
        if set.contains_key(member) {
            Ok(false)
        } else {
            set.insert(member.to_string(), score);
            Ok(true)
        }
    }

    async fn zremrangebyscore(&self, key: &str, max_score: f64) -> Result<u64> {
        let mut set = match self.sorted_sets.get_mut(key) {
            Some(set) => set,
            None => return Ok(0),
        };
        let before = set.len();
        set.retain(|_, score| *score >= max_score);
        Ok((before - set.len()) as u64)
    }
}

/// Resolves teams from a fixed table, configured by the test.
#[derive(Default)]
pub struct InMemoryTeamResolver {
    teams: DashMap<String, Team>,
}

impl InMemoryTeamResolver {
    pub fn with_team(self, token: impl Into<String>, team: Team) -> Self {
        self.teams.insert(token.into(), team);
        self
    }
}

#[async_trait]
impl TeamResolver for InMemoryTeamResolver {
    async fn resolve(&self, team_token: &str) -> Result<Option<Team>> {
        Ok(self.teams.get(team_token).map(|t| t.clone()))
    }
}
