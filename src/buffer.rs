// Session Buffer (spec §4.1): an append-only accumulator for one
// (team, session) pair within a single partition, spilled to disk as a
// gzip-compressed JSONL stream plus a JSON sidecar, and flushed to the
// blob sink on demand.
//
// The buffer is a pure data object -- it knows nothing about age/size
// thresholds or partition idleness. Those triggers live in the registry's
// flush-scheduling pass (spec §4.1 "Rationale"), so the buffer stays easy
// to reason about and easy to fake in tests.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::collaborators::BlobSink;
use crate::error::{IngestError, Result};
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Open,
    Flushing,
    Flushed,
    Destroyed,
}

impl BufferState {
    fn as_str(self) -> &'static str {
        match self {
            BufferState::Open => "open",
            BufferState::Flushing => "flushing",
            BufferState::Flushed => "flushed",
            BufferState::Destroyed => "destroyed",
        }
    }
}

/// Why a flush was triggered. Purely informational (logging, blob path
/// choice is unaffected), but kept as its own type per spec §4.1 so the
/// registry's scheduling pass has a closed set of reasons to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    BufferAge,
    BufferSize,
    PartitionShutdown,
    PartitionRevoked,
}

impl FlushReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FlushReason::BufferAge => "buffer_age",
            FlushReason::BufferSize => "buffer_size",
            FlushReason::PartitionShutdown => "partition_shutdown",
            FlushReason::PartitionRevoked => "partition_revoked",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferMetadata {
    #[serde(rename = "oldestOffset")]
    pub oldest_offset: u64,
    #[serde(rename = "newestOffset")]
    pub newest_offset: u64,
    #[serde(rename = "eventCount")]
    pub event_count: u64,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
    #[serde(rename = "firstTimestamp")]
    pub first_timestamp: i64,
    #[serde(rename = "lastTimestamp")]
    pub last_timestamp: i64,
}

pub struct SessionBuffer {
    pub team_id: u64,
    pub session_id: String,
    pub partition: i32,

    oldest_offset: u64,
    newest_offset: u64,
    oldest_timestamp_ms: i64,
    newest_timestamp_ms: i64,
    size_bytes: u64,
    event_count: u64,
    state: BufferState,

    spill_path: PathBuf,
    metadata_path: PathBuf,
    encoder: Option<GzEncoder<File>>,
}

impl SessionBuffer {
    /// Opens a fresh buffer for `(team_id, session_id)` in `partition`,
    /// rooted under `spill_dir`. The spill file names use a per-buffer
    /// uuid nonce so two generations of the same session never collide on
    /// disk even if destruction races creation.
    pub fn open(
        team_id: u64,
        session_id: String,
        partition: i32,
        spill_dir: &Path,
        first_message: &Message,
    ) -> Result<Self> {
        let nonce = Uuid::new_v4();
        let stem = format!("{team_id}.{session_id}.{nonce}");
        let spill_path = spill_dir.join(format!("{stem}.jsonl.gz"));
        let metadata_path = spill_dir.join(format!("{stem}.metadata.json"));

        std::fs::create_dir_all(spill_dir)?;
        let file = File::create(&spill_path)?;
        let encoder = GzEncoder::new(file, Compression::default());

        Ok(Self {
            team_id,
            session_id,
            partition,
            oldest_offset: first_message.offset,
            newest_offset: first_message.offset,
            oldest_timestamp_ms: first_message.timestamp_ms,
            newest_timestamp_ms: first_message.timestamp_ms,
            size_bytes: 0,
            event_count: 0,
            state: BufferState::Open,
            spill_path,
            metadata_path,
            encoder: Some(encoder),
        })
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn oldest_offset(&self) -> u64 {
        self.oldest_offset
    }

    pub fn newest_offset(&self) -> u64 {
        self.newest_offset
    }

    pub fn oldest_timestamp_ms(&self) -> i64 {
        self.oldest_timestamp_ms
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Returns `oldestOffset` while the buffer still blocks a commit
    /// (`Open` or `Flushing`), or `None` once it's durable (spec §4.1).
    pub fn lowest_offset(&self) -> Option<u64> {
        match self.state {
            BufferState::Open | BufferState::Flushing => Some(self.oldest_offset),
            BufferState::Flushed | BufferState::Destroyed => None,
        }
    }

    /// Appends one message's payload to the compressed spill stream.
    /// Requires `state == Open`.
    pub fn add(&mut self, message: &Message, event_count: u64) -> Result<()> {
        if self.state != BufferState::Open {
            return Err(IngestError::BufferClosed(self.state.as_str()));
        }
        let encoder = self
            .encoder
            .as_mut()
            .expect("encoder present while state == Open");
        encoder
            .write_all(&message.payload)
            .and_then(|_| encoder.write_all(b"\n"))
            .map_err(|e| IngestError::BufferWrite(e.to_string()))?;

        self.newest_offset = message.offset;
        self.newest_timestamp_ms = self.newest_timestamp_ms.max(message.timestamp_ms);
        self.oldest_timestamp_ms = self.oldest_timestamp_ms.min(message.timestamp_ms);
        self.size_bytes += message.size_bytes();
        self.event_count += event_count;
        Ok(())
    }

    fn blob_path_prefix(&self) -> String {
        format!(
            "team_{}/session_{}/data-{}-{}",
            self.team_id, self.session_id, self.oldest_timestamp_ms, self.newest_timestamp_ms
        )
    }

    fn metadata(&self) -> BufferMetadata {
        BufferMetadata {
            oldest_offset: self.oldest_offset,
            newest_offset: self.newest_offset,
            event_count: self.event_count,
            size_bytes: self.size_bytes,
            first_timestamp: self.oldest_timestamp_ms,
            last_timestamp: self.newest_timestamp_ms,
        }
    }

    /// `Open -> Flushing -> Flushed`. On upload failure the buffer returns
    /// to `Open` (the spill file is reopened for append) and this returns
    /// `IngestError::Flush`; offsets are unchanged so a retry is valid
    /// (spec §4.1).
    pub async fn flush(&mut self, reason: FlushReason, sink: &Arc<dyn BlobSink>) -> Result<()> {
        if self.state != BufferState::Open {
            return Err(IngestError::BufferClosed(self.state.as_str()));
        }
        self.state = BufferState::Flushing;
        tracing::debug!(
            team_id = self.team_id,
            session_id = %self.session_id,
            partition = self.partition,
            reason = reason.as_str(),
            "flushing session buffer"
        );

        match self.do_flush(sink).await {
            Ok(()) => {
                self.state = BufferState::Flushed;
                Ok(())
            }
            Err(e) => {
                self.reopen_for_append()?;
                self.state = BufferState::Open;
                Err(e)
            }
        }
    }

    async fn do_flush(&mut self, sink: &Arc<dyn BlobSink>) -> Result<()> {
        let encoder = self.encoder.take().expect("encoder present while Flushing");
        encoder
            .finish()
            .map_err(|e| IngestError::Flush(e.to_string()))?;

        let data_bytes = std::fs::read(&self.spill_path).map_err(|e| IngestError::Flush(e.to_string()))?;
        let metadata_bytes =
            serde_json::to_vec(&self.metadata()).map_err(|e| IngestError::Flush(e.to_string()))?;
        std::fs::write(&self.metadata_path, &metadata_bytes)
            .map_err(|e| IngestError::Flush(e.to_string()))?;

        let prefix = self.blob_path_prefix();
        sink.put(&format!("{prefix}.jsonl.gz"), data_bytes)
            .await
            .map_err(|e| IngestError::Flush(e.to_string()))?;
        sink.put(&format!("{prefix}.metadata.json"), metadata_bytes)
            .await
            .map_err(|e| IngestError::Flush(e.to_string()))?;
        Ok(())
    }

    fn reopen_for_append(&mut self) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.spill_path)?;
        self.encoder = Some(GzEncoder::new(file, Compression::default()));
        Ok(())
    }

    /// Deletes on-disk files and transitions to `Destroyed`. Idempotent.
    pub fn destroy(&mut self) {
        if self.state == BufferState::Destroyed {
            return;
        }
        self.encoder = None;
        let _ = std::fs::remove_file(&self.spill_path);
        let _ = std::fs::remove_file(&self.metadata_path);
        self.state = BufferState::Destroyed;
    }
}

impl Drop for SessionBuffer {
    fn drop(&mut self) {
        if self.state != BufferState::Destroyed && self.state != BufferState::Flushed {
            tracing::warn!(
                team_id = self.team_id,
                session_id = %self.session_id,
                state = self.state.as_str(),
                "session buffer dropped without flush or destroy"
            );
        }
    }
}
