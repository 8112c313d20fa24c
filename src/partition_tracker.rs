// Partition Tracker (spec §4.4 / §3 "Partition Metrics"): the source of
// truth for "which offset would be safe to commit if no session were
// blocking" -- the highest message offset ever observed on a partition,
// and the wall-clock time of that message (used by the partition-idle
// flush trigger).

use dashmap::DashMap;

#[derive(Debug, Clone, Copy)]
pub struct PartitionMetrics {
    pub last_message_offset: u64,
    pub last_message_timestamp_ms: i64,
}

#[derive(Default)]
pub struct PartitionTracker {
    partitions: DashMap<i32, PartitionMetrics>,
}

impl PartitionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message's offset and timestamp for `partition`, creating
    /// the entry on first observation. Called for every message, including
    /// ones dropped by the watermark filter or routed to a disabled team
    /// -- `lastMessageOffset` must advance regardless (spec §4.3, §4.4
    /// "whole batch dropped").
    pub fn observe(&self, partition: i32, offset: u64, timestamp_ms: i64) {
        self.partitions
            .entry(partition)
            .and_modify(|m| {
                m.last_message_offset = m.last_message_offset.max(offset);
                m.last_message_timestamp_ms = m.last_message_timestamp_ms.max(timestamp_ms);
            })
            .or_insert(PartitionMetrics {
                last_message_offset: offset,
                last_message_timestamp_ms: timestamp_ms,
            });
    }

    pub fn last_message_offset(&self, partition: i32) -> Option<u64> {
        self.partitions.get(&partition).map(|m| m.last_message_offset)
    }

    pub fn last_message_timestamp_ms(&self, partition: i32) -> Option<i64> {
        self.partitions.get(&partition).map(|m| m.last_message_timestamp_ms)
    }

    /// Deleted on revocation (spec §3 "Partition Metrics ... deleted on
    /// revocation").
    pub fn remove(&self, partition: i32) {
        self.partitions.remove(&partition);
    }

    pub fn owned_partitions(&self) -> Vec<i32> {
        self.partitions.iter().map(|e| *e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_creates_entry_on_first_message() {
        let tracker = PartitionTracker::new();
        assert_eq!(tracker.last_message_offset(1), None);
        tracker.observe(1, 10, 1000);
        assert_eq!(tracker.last_message_offset(1), Some(10));
        assert_eq!(tracker.last_message_timestamp_ms(1), Some(1000));
    }

    #[test]
    fn observe_tracks_the_highest_offset_seen() {
        let tracker = PartitionTracker::new();
        tracker.observe(1, 5, 1000);
        tracker.observe(1, 9, 2000);
        assert_eq!(tracker.last_message_offset(1), Some(9));
    }

    #[test]
    fn remove_deletes_metrics() {
        let tracker = PartitionTracker::new();
        tracker.observe(1, 5, 1000);
        tracker.remove(1);
        assert_eq!(tracker.last_message_offset(1), None);
    }
}
