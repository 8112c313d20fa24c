//! `KvStore` backed by Redis, via `redis`'s async `ConnectionManager`
//! (auto-reconnecting, safe to clone and share across tasks).

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::collaborators::KvStore;
use crate::error::{IngestError, Result};

pub struct RedisKvStore {
    conn: ConnectionManager,
}

impl RedisKvStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| IngestError::Kv(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| IngestError::Kv(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<u64>> {
        self.conn
            .clone()
            .hget(key, field)
            .await
            .map_err(|e| IngestError::Kv(e.to_string()))
    }

    async fn hash_set(&self, key: &str, field: &str, value: u64) -> Result<()> {
        self.conn
            .clone()
            .hset(key, field, value)
            .await
            .map_err(|e| IngestError::Kv(e.to_string()))
    }

    async fn zadd_nx(&self, key: &str, member: &str, score: f64) -> Result<bool> {
        let added: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| IngestError::Kv(e.to_string()))?;
        Ok(added > 0)
    }

    async fn zremrangebyscore(&self, key: &str, max_score: f64) -> Result<u64> {
        let removed: u64 = self
            .conn
            .clone()
            .zrembyscore(key, f64::NEG_INFINITY, max_score)
            .await
            .map_err(|e| IngestError::Kv(e.to_string()))?;
        Ok(removed)
    }
}
