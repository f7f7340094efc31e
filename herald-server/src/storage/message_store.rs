use crate::core::error::Result;
use crate::core::registry::QueueKey;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// Interface onto the broker's append-only message log.
///
/// The queue service never reads payloads; it only tells the log which
/// prefix of a queue is consumed (so the log may compact it), asks the log
/// to drop a removed queue's messages, and checks whether evicted index
/// entries can be batch-loaded back in later.
pub trait MessageStore: Send + Sync {
    fn delete_queue_message(&self, topic: &str, queue_id: u32) -> Result<()>;
    fn update_consumed_queue_offset(&self, topic: &str, queue_id: u32, consumed_offset: i64)
    -> Result<()>;
    /// Whether evicted index entries can be re-faulted from the log.
    /// Cache eviction is only safe when this holds.
    fn supports_batch_load_queue_index(&self) -> bool;
    /// Byte position past the last appended message, -1 on an empty log
    fn current_message_position(&self) -> i64;
}

/// In-memory message log: an advancing byte cursor plus per-queue consumed
/// watermarks. Carries no payloads; enough for wiring and tests.
pub struct MemoryMessageStore {
    position: AtomicI64,
    consumed: RwLock<HashMap<QueueKey, i64>>,
    supports_batch_load: bool,
}

impl MemoryMessageStore {
    pub fn new(supports_batch_load: bool) -> Self {
        Self {
            position: AtomicI64::new(0),
            consumed: RwLock::new(HashMap::new()),
            supports_batch_load,
        }
    }

    /// Append a message, returning its position in the log
    pub fn append_message(&self, payload: &[u8]) -> i64 {
        self.position
            .fetch_add(payload.len() as i64, Ordering::AcqRel)
    }

    /// Consumed watermark last reported for a queue, if any
    pub fn consumed_queue_offset(&self, topic: &str, queue_id: u32) -> Option<i64> {
        self.consumed
            .read()
            .get(&QueueKey::new(topic, queue_id))
            .copied()
    }
}

impl MessageStore for MemoryMessageStore {
    fn delete_queue_message(&self, topic: &str, queue_id: u32) -> Result<()> {
        self.consumed.write().remove(&QueueKey::new(topic, queue_id));
        debug!("Dropped message log entries for {}-{}", topic, queue_id);
        Ok(())
    }

    fn update_consumed_queue_offset(
        &self,
        topic: &str,
        queue_id: u32,
        consumed_offset: i64,
    ) -> Result<()> {
        self.consumed
            .write()
            .insert(QueueKey::new(topic, queue_id), consumed_offset);
        Ok(())
    }

    fn supports_batch_load_queue_index(&self) -> bool {
        self.supports_batch_load
    }

    fn current_message_position(&self) -> i64 {
        let position = self.position.load(Ordering::Acquire);
        if position == 0 { -1 } else { position }
    }
}
