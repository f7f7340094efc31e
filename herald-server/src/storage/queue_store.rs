use crate::core::error::Result;
use crate::core::queue::{PersistedQueue, QUEUE_META_FILE};
use std::path::PathBuf;
use tracing::debug;

/// Persistent store of queue metadata.
///
/// The store owns the per-queue directory namespace: creating a queue
/// reserves `<base>/<topic>/<queue_id>`, deleting it tears the directory
/// down. All calls arrive serialised under the queue service's mutation
/// mutex.
pub trait QueueStore: Send + Sync {
    fn create_queue(&self, queue: &PersistedQueue) -> Result<()>;
    fn update_queue(&self, queue: &PersistedQueue) -> Result<()>;
    fn delete_queue(&self, topic: &str, queue_id: u32) -> Result<()>;
    fn get_queue(&self, topic: &str, queue_id: u32) -> Result<Option<PersistedQueue>>;
}

/// Queue store keeping one JSON document per queue directory
pub struct FileQueueStore {
    base_path: PathBuf,
}

impl FileQueueStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn queue_dir(&self, topic: &str, queue_id: u32) -> PathBuf {
        self.base_path.join(topic).join(queue_id.to_string())
    }

    fn write_document(&self, queue: &PersistedQueue) -> Result<()> {
        let dir = self.queue_dir(&queue.topic, queue.queue_id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(
            dir.join(QUEUE_META_FILE),
            serde_json::to_string_pretty(queue)?,
        )?;
        Ok(())
    }
}

impl QueueStore for FileQueueStore {
    fn create_queue(&self, queue: &PersistedQueue) -> Result<()> {
        debug!("Persisting queue {}-{}", queue.topic, queue.queue_id);
        self.write_document(queue)
    }

    fn update_queue(&self, queue: &PersistedQueue) -> Result<()> {
        self.write_document(queue)
    }

    fn delete_queue(&self, topic: &str, queue_id: u32) -> Result<()> {
        let dir = self.queue_dir(topic, queue_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        // Drop the topic directory once its last queue is gone
        let _ = std::fs::remove_dir(self.base_path.join(topic));
        debug!("Deleted queue {}-{} from store", topic, queue_id);
        Ok(())
    }

    fn get_queue(&self, topic: &str, queue_id: u32) -> Result<Option<PersistedQueue>> {
        let path = self.queue_dir(topic, queue_id).join(QUEUE_META_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}
