use crate::core::error::Result;
use crate::core::registry::QueueKey;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Consumer-group consumption progress, per queue.
///
/// `min_consumed_offset` is the conservative high-water mark: the lowest
/// committed offset across every group subscribed to the queue, -1 when no
/// group subscribes. Index entries at or below it are consumed by everyone
/// and safe to reclaim.
pub trait OffsetManager: Send + Sync {
    fn min_consumed_offset(&self, topic: &str, queue_id: u32) -> i64;
    fn delete_queue_offset(&self, topic: &str, queue_id: u32) -> Result<()>;
    fn consumer_group_count(&self) -> usize;
}

/// In-memory offset manager tracking committed offsets per consumer group
#[derive(Default)]
pub struct MemoryOffsetManager {
    groups: RwLock<HashMap<String, HashMap<QueueKey, i64>>>,
}

impl MemoryOffsetManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a group's committed offset for a queue
    pub fn commit_offset(&self, group: &str, topic: &str, queue_id: u32, offset: i64) {
        self.groups
            .write()
            .entry(group.to_string())
            .or_default()
            .insert(QueueKey::new(topic, queue_id), offset);
    }
}

impl OffsetManager for MemoryOffsetManager {
    fn min_consumed_offset(&self, topic: &str, queue_id: u32) -> i64 {
        let key = QueueKey::new(topic, queue_id);
        self.groups
            .read()
            .values()
            .filter_map(|offsets| offsets.get(&key).copied())
            .min()
            .unwrap_or(-1)
    }

    fn delete_queue_offset(&self, topic: &str, queue_id: u32) -> Result<()> {
        let key = QueueKey::new(topic, queue_id);
        for offsets in self.groups.write().values_mut() {
            offsets.remove(&key);
        }
        debug!("Dropped consumer offsets for {}-{}", topic, queue_id);
        Ok(())
    }

    fn consumer_group_count(&self) -> usize {
        self.groups.read().len()
    }
}
