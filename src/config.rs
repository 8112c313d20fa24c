// Runtime configuration for a single ingester instance.
//
// Defaults come first (mirroring every threshold in the design), then an
// optional TOML file overlays them, then environment variables prefixed
// `SESSION_INGEST_` take final precedence. This three-layer load order is
// the same one the teacher sketches in `main.rs` (file under the install
// directory, falling back to `Default`), generalized to also read env
// vars so the two topic-bound instances (`main` and `overflow`, see
// spec §6) can share one binary and differ only by environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_buffer_age_seconds: u64,
    pub max_buffer_size_bytes: u64,
    pub partition_idle_seconds: u64,
    pub commit_interval_seconds: u64,
    pub revocation_deadline_seconds: u64,
    pub overflow_enabled: bool,
    pub overflow_burst_bytes: u64,
    pub overflow_replenish_bytes_per_second: u64,
    pub overflow_min_sessions_per_batch: usize,
    pub overflow_ttl_seconds: u64,
    pub debug_partition: Option<i32>,
    pub local_spill_directory: String,
    pub consume_overflow: bool,
    pub metrics_enabled: bool,
    pub kv_key_prefix: String,
    pub consumer_group: String,

    /// Only read by `main.rs` when the corresponding adapter feature is
    /// compiled in; the core ingestion logic never touches these.
    pub kafka_bootstrap_servers: String,
    pub blob_bucket: String,
    pub redis_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_buffer_age_seconds: 5 * 60,
            max_buffer_size_bytes: 50 * 1024 * 1024,
            partition_idle_seconds: 60,
            commit_interval_seconds: 5,
            revocation_deadline_seconds: 30,
            overflow_enabled: true,
            overflow_burst_bytes: 1_000_000,
            overflow_replenish_bytes_per_second: 1_000,
            overflow_min_sessions_per_batch: 1,
            overflow_ttl_seconds: 24 * 60 * 60,
            debug_partition: None,
            local_spill_directory: "./spill".to_string(),
            consume_overflow: false,
            metrics_enabled: true,
            kv_key_prefix: "capture".to_string(),
            consumer_group: "session-recording-ingester".to_string(),
            kafka_bootstrap_servers: "localhost:9092".to_string(),
            blob_bucket: "session-recordings".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}

impl Config {
    pub fn max_buffer_age(&self) -> Duration {
        Duration::from_secs(self.max_buffer_age_seconds)
    }

    pub fn partition_idle(&self) -> Duration {
        Duration::from_secs(self.partition_idle_seconds)
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_secs(self.commit_interval_seconds)
    }

    /// Deadline for each partition's flush+commit during revocation (spec
    /// §5 "all suspension points carry a deadline", §7 `RevocationTimeout`).
    pub fn revocation_deadline(&self) -> Duration {
        Duration::from_secs(self.revocation_deadline_seconds)
    }

    pub fn overflow_ttl(&self) -> Duration {
        Duration::from_secs(self.overflow_ttl_seconds)
    }

    /// Topic this instance consumes from, per spec §6 (`main` or `overflow`).
    pub fn topic(&self) -> &'static str {
        if self.consume_overflow {
            "overflow"
        } else {
            "main"
        }
    }

    /// Loads defaults, overlays an optional TOML file, then environment
    /// variables. Unknown env vars are ignored; malformed values error out
    /// rather than silently falling back, since a misconfigured threshold
    /// (e.g. a garbled `MaxBufferSizeBytes`) would silently change offset
    /// safety guarantees.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            _ => Config::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        macro_rules! env_u64 {
            ($field:ident, $name:expr) => {
                if let Ok(v) = std::env::var($name) {
                    self.$field = v
                        .parse()
                        .map_err(|_| IngestError::Config(format!("{} must be a u64", $name)))?;
                }
            };
        }
        macro_rules! env_bool {
            ($field:ident, $name:expr) => {
                if let Ok(v) = std::env::var($name) {
                    self.$field = v
                        .parse()
                        .map_err(|_| IngestError::Config(format!("{} must be a bool", $name)))?;
                }
            };
        }

        env_u64!(max_buffer_age_seconds, "SESSION_INGEST_MAX_BUFFER_AGE_SECONDS");
        env_u64!(max_buffer_size_bytes, "SESSION_INGEST_MAX_BUFFER_SIZE_BYTES");
        env_u64!(partition_idle_seconds, "SESSION_INGEST_PARTITION_IDLE_SECONDS");
        env_u64!(commit_interval_seconds, "SESSION_INGEST_COMMIT_INTERVAL_SECONDS");
        env_u64!(revocation_deadline_seconds, "SESSION_INGEST_REVOCATION_DEADLINE_SECONDS");
        env_bool!(overflow_enabled, "SESSION_INGEST_OVERFLOW_ENABLED");
        env_u64!(overflow_burst_bytes, "SESSION_INGEST_OVERFLOW_BURST_BYTES");
        env_u64!(
            overflow_replenish_bytes_per_second,
            "SESSION_INGEST_OVERFLOW_REPLENISH_BYTES_PER_SECOND"
        );
        env_bool!(consume_overflow, "SESSION_INGEST_CONSUME_OVERFLOW");
        env_bool!(metrics_enabled, "SESSION_INGEST_METRICS_ENABLED");

        if let Ok(v) = std::env::var("SESSION_INGEST_DEBUG_PARTITION") {
            self.debug_partition = Some(
                v.parse()
                    .map_err(|_| IngestError::Config("SESSION_INGEST_DEBUG_PARTITION must be an i32".into()))?,
            );
        }
        if let Ok(v) = std::env::var("SESSION_INGEST_LOCAL_SPILL_DIRECTORY") {
            self.local_spill_directory = v;
        }
        if let Ok(v) = std::env::var("SESSION_INGEST_KAFKA_BOOTSTRAP_SERVERS") {
            self.kafka_bootstrap_servers = v;
        }
        if let Ok(v) = std::env::var("SESSION_INGEST_BLOB_BUCKET") {
            self.blob_bucket = v;
        }
        if let Ok(v) = std::env::var("SESSION_INGEST_REDIS_URL") {
            self.redis_url = v;
        }

        Ok(())
    }
}
