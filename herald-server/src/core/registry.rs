use crate::core::queue::Queue;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

/// Composite identifier of a queue within the broker.
///
/// A tagged pair rather than a formatted string so topics containing `-`
/// stay unambiguous; the `Display` form exists for logging only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub topic: String,
    pub queue_id: u32,
}

impl QueueKey {
    pub fn new(topic: impl Into<String>, queue_id: u32) -> Self {
        Self {
            topic: topic.into(),
            queue_id,
        }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.queue_id)
    }
}

/// Concurrent mapping from `QueueKey` to the live `Queue` instance.
///
/// Source of truth for which queues exist in memory. Reads never contend
/// with each other; `values` hands out a weakly-consistent snapshot, so an
/// iteration may miss entries inserted or removed after it was taken, but
/// every reference it yields is a valid queue. Admin writers additionally
/// serialise on the queue service's mutation mutex.
#[derive(Clone, Default)]
pub struct QueueRegistry {
    queues: Arc<RwLock<HashMap<QueueKey, Arc<Queue>>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &QueueKey) -> Option<Arc<Queue>> {
        self.queues.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &QueueKey) -> bool {
        self.queues.read().contains_key(key)
    }

    /// Insert the queue unless its key is already present.
    /// Returns false (leaving the resident queue in place) on conflict.
    pub fn try_insert(&self, queue: Arc<Queue>) -> bool {
        let key = queue.key();
        match self.queues.write().entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(queue);
                true
            }
        }
    }

    pub fn remove(&self, key: &QueueKey) -> Option<Arc<Queue>> {
        self.queues.write().remove(key)
    }

    /// Snapshot of every resident queue
    pub fn values(&self) -> Vec<Arc<Queue>> {
        self.queues.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queues.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.read().is_empty()
    }

    pub fn clear(&self) {
        self.queues.write().clear();
    }
}
