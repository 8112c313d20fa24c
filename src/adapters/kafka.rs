//! `LogClient` backed by `rdkafka`'s consumer offset-commit API.
//!
//! The fetch loop and group membership callbacks that actually deliver
//! batches and invoke `Ingester::assign`/`revoke` live in the binary's
//! `ConsumerContext` (out of scope per spec §1); this adapter only
//! implements the commit half the core logic depends on.

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::ClientConfig;
use std::time::Duration;

use crate::collaborators::LogClient;
use crate::error::{IngestError, Result};

pub struct KafkaLogClient {
    consumer: BaseConsumer,
    group_id: String,
}

impl KafkaLogClient {
    pub fn new(bootstrap_servers: &str, group_id: &str) -> Result<Self> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| IngestError::Config(format!("kafka consumer init failed: {e}")))?;

        Ok(Self { consumer, group_id: group_id.to_string() })
    }
}

#[async_trait]
impl LogClient for KafkaLogClient {
    async fn commit(&self, topic: &str, partition: i32, offset: u64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset as i64))
            .map_err(|e| IngestError::Commit(e.to_string()))?;
        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Sync)
            .map_err(|e| {
                tracing::warn!(topic, partition, error = %e, group = %self.group_id, "kafka commit failed");
                IngestError::Commit(e.to_string())
            })
    }

    async fn committed(&self, topic: &str, partition: i32) -> Result<Option<u64>> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(topic, partition);
        let committed = self
            .consumer
            .committed_offsets(tpl, Duration::from_secs(10))
            .map_err(|e| IngestError::Commit(e.to_string()))?;

        Ok(committed
            .elements()
            .iter()
            .find_map(|e| match e.offset() {
                Offset::Offset(o) if o >= 0 => Some(o as u64),
                _ => None,
            }))
    }
}
