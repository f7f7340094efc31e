use crate::config::{QueueChunkConfig, QueueServiceConfig};
use crate::core::error::{BrokerError, Result};
use crate::core::queue::{PersistedQueue, Queue, QueueStatus};
use crate::core::registry::{QueueKey, QueueRegistry};
use crate::scheduler::Scheduler;
use crate::storage::{MessageStore, OffsetManager, QueueStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const RECLAIM_TASK: &str = "remove-consumed-queue-index";
const EVICT_TASK: &str = "remove-exceed-cache-queue-index";

/// Aggregate queue population counters
#[derive(Debug, Clone, Serialize)]
pub struct QueueServiceStats {
    pub queue_count: usize,
    pub topic_count: usize,
    pub queue_index_count: usize,
    pub unconsumed_message_count: i64,
    pub min_message_offset: i64,
}

/// Owner of the broker's queue population.
///
/// Holds every live `Queue`, rebuilds that population from the chunk
/// directory tree at startup, mediates all admin mutations against the
/// queue store, the message store and the offset manager, and runs the two
/// periodic passes that bound index-cache memory.
///
/// Every mutation serialises on one process-wide mutex, held across the
/// store I/O it guards; read queries never take it.
pub struct QueueService {
    config: QueueServiceConfig,
    chunk_config: QueueChunkConfig,
    registry: QueueRegistry,
    queue_store: Arc<dyn QueueStore>,
    message_store: Arc<dyn MessageStore>,
    offset_manager: Arc<dyn OffsetManager>,
    scheduler: Scheduler,
    admin_lock: Mutex<()>,
    reclaim_running: AtomicBool,
    evict_running: AtomicBool,
}

impl QueueService {
    pub fn new(
        config: QueueServiceConfig,
        chunk_config: QueueChunkConfig,
        queue_store: Arc<dyn QueueStore>,
        message_store: Arc<dyn MessageStore>,
        offset_manager: Arc<dyn OffsetManager>,
    ) -> Self {
        Self {
            config,
            chunk_config,
            registry: QueueRegistry::new(),
            queue_store,
            message_store,
            offset_manager,
            scheduler: Scheduler::new(),
            admin_lock: Mutex::new(()),
            reclaim_running: AtomicBool::new(false),
            evict_running: AtomicBool::new(false),
        }
    }

    /// Idempotent bring-up: reset the registry, repopulate it from the
    /// chunk directory tree, then register the maintenance tasks.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.scheduler.stop_task(RECLAIM_TASK);
        self.scheduler.stop_task(EVICT_TASK);
        self.registry.clear();

        self.load_queues()?;

        let service = Arc::clone(self);
        let reclaim_interval =
            Duration::from_millis(self.config.remove_consumed_queue_index_interval_ms);
        self.scheduler.start_task(
            RECLAIM_TASK,
            move || service.remove_consumed_queue_index(),
            reclaim_interval,
            reclaim_interval,
        );

        let service = Arc::clone(self);
        let evict_interval =
            Duration::from_millis(self.config.remove_exceed_max_cache_queue_index_interval_ms);
        self.scheduler.start_task(
            EVICT_TASK,
            move || service.remove_exceed_max_cache_queue_index(),
            evict_interval,
            evict_interval,
        );

        info!("Queue service started: {} queues resident", self.registry.len());
        Ok(())
    }

    /// Reverse-order teardown: close every queue, drop the registry,
    /// stop the maintenance tasks.
    pub fn shutdown(&self) {
        for queue in self.registry.values() {
            if let Err(e) = queue.close() {
                warn!("Failed to close queue {}: {}", queue.key(), e);
            }
        }
        self.registry.clear();
        self.scheduler.stop_task(RECLAIM_TASK);
        self.scheduler.stop_task(EVICT_TASK);
        info!("Queue service shut down");
    }

    /// Walk `<base_path>/<topic>/<queue_id>` and repopulate the registry.
    /// A directory that does not parse as a queue id is a startup fault.
    fn load_queues(&self) -> Result<()> {
        let base = &self.chunk_config.base_path;
        if !base.is_dir() {
            debug!("Chunk base path {:?} absent, starting empty", base);
            return Ok(());
        }

        let mut topic_dirs: Vec<std::path::PathBuf> = std::fs::read_dir(base)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        topic_dirs.sort_by_key(|p| p.to_string_lossy().to_lowercase());

        for topic_dir in topic_dirs {
            let topic = topic_dir
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    BrokerError::Storage(format!("unreadable topic directory {:?}", topic_dir))
                })?
                .to_string();

            let mut queue_dirs: Vec<std::path::PathBuf> = std::fs::read_dir(&topic_dir)?
                .collect::<std::io::Result<Vec<_>>>()?
                .into_iter()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            queue_dirs.sort_by_key(|p| p.to_string_lossy().to_lowercase());

            for queue_dir in queue_dirs {
                let queue_id: u32 = queue_dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| {
                        BrokerError::Storage(format!(
                            "chunk directory {:?} is not a queue id",
                            queue_dir
                        ))
                    })?;

                let queue = Arc::new(Queue::new(topic.clone(), queue_id, base));
                queue.load()?;
                self.registry.try_insert(queue);
            }
        }

        info!("Loaded {} queues from {:?}", self.registry.len(), base);
        Ok(())
    }

    // ==================== Admin mutations ====================

    pub fn create_topic(&self, topic: &str, initial_queue_count: u32) -> Result<()> {
        let _guard = self.admin_lock.lock();
        self.create_topic_locked(topic, initial_queue_count)
    }

    fn create_topic_locked(&self, topic: &str, initial_queue_count: u32) -> Result<()> {
        if topic.is_empty() {
            return Err(BrokerError::InvalidArgument("topic is empty".to_string()));
        }
        if initial_queue_count == 0 || initial_queue_count > self.config.topic_max_queue_count {
            return Err(BrokerError::InvalidArgument(format!(
                "initial queue count {} out of range (1..={})",
                initial_queue_count, self.config.topic_max_queue_count
            )));
        }

        for queue_id in 0..initial_queue_count {
            let queue = Arc::new(Queue::new(topic, queue_id, &self.chunk_config.base_path));
            queue.load()?;
            if !self.registry.contains_key(&queue.key()) {
                self.queue_store.create_queue(&persisted_record(&queue))?;
            }
            self.registry.try_insert(queue);
        }

        info!("Created topic '{}' with {} queues", topic, initial_queue_count);
        Ok(())
    }

    /// Add one queue to a topic, returning the allocated queue id.
    /// Ids grow from the current maximum and freed ids are not reused
    /// unless the removed id was the highest.
    pub fn add_queue(&self, topic: &str) -> Result<u32> {
        let _guard = self.admin_lock.lock();

        let existing: Vec<u32> = self
            .registry
            .values()
            .into_iter()
            .filter(|q| q.topic() == topic)
            .map(|q| q.queue_id())
            .collect();

        if existing.len() as u32 >= self.config.topic_max_queue_count {
            return Err(BrokerError::InvalidArgument(format!(
                "topic '{}' already has the maximum of {} queues",
                topic, self.config.topic_max_queue_count
            )));
        }

        let queue_id = existing.iter().max().map(|max| max + 1).unwrap_or(0);

        let queue = Arc::new(Queue::new(topic, queue_id, &self.chunk_config.base_path));
        queue.load()?;
        self.queue_store.create_queue(&persisted_record(&queue))?;
        self.registry.try_insert(queue);

        info!("Added queue {} to topic '{}'", queue_id, topic);
        Ok(queue_id)
    }

    /// Remove a queue that is disabled and fully drained.
    ///
    /// Deletion order is fixed: message store, offset manager, queue store,
    /// registry. A failure aborts the remaining steps and surfaces; partial
    /// deletion is logged for the operator to retry.
    pub fn remove_queue(&self, topic: &str, queue_id: u32) -> Result<()> {
        let _guard = self.admin_lock.lock();

        let key = QueueKey::new(topic, queue_id);
        let Some(queue) = self.registry.get(&key) else {
            return Ok(());
        };

        if queue.status() != QueueStatus::Disabled {
            return Err(BrokerError::Precondition(format!(
                "queue {} must be disabled before removal",
                key
            )));
        }
        if queue.message_real_count() > 0 {
            return Err(BrokerError::Precondition(format!(
                "queue {} still has messages",
                key
            )));
        }

        // Close first so a concurrent maintenance tick holding a stale
        // snapshot cannot write while the on-disk state is torn down
        queue.close()?;

        if let Err(e) = self.message_store.delete_queue_message(topic, queue_id) {
            error!("Removing queue {} aborted at message store: {}", key, e);
            return Err(e);
        }
        if let Err(e) = self.offset_manager.delete_queue_offset(topic, queue_id) {
            error!(
                "Removing queue {} aborted at offset manager (message data already gone): {}",
                key, e
            );
            return Err(e);
        }
        if let Err(e) = self.queue_store.delete_queue(topic, queue_id) {
            error!(
                "Removing queue {} aborted at queue store (message data and offsets already gone): {}",
                key, e
            );
            return Err(e);
        }

        self.registry.remove(&key);
        info!("Removed queue {}", key);
        Ok(())
    }

    pub fn enable_queue(&self, topic: &str, queue_id: u32) -> Result<()> {
        self.set_queue_status(topic, queue_id, QueueStatus::Enabled)
    }

    pub fn disable_queue(&self, topic: &str, queue_id: u32) -> Result<()> {
        self.set_queue_status(topic, queue_id, QueueStatus::Disabled)
    }

    /// Flip the persisted status first, then mirror it in memory.
    /// Silently a no-op unless the queue exists in both places.
    fn set_queue_status(&self, topic: &str, queue_id: u32, status: QueueStatus) -> Result<()> {
        let _guard = self.admin_lock.lock();

        let Some(queue) = self.registry.get(&QueueKey::new(topic, queue_id)) else {
            return Ok(());
        };
        let Some(mut persisted) = self.queue_store.get_queue(topic, queue_id)? else {
            return Ok(());
        };

        persisted.setting.status = status;
        self.queue_store.update_queue(&persisted)?;
        queue.set_status(status);
        debug!("Queue {}-{} status set to {:?}", topic, queue_id, status);
        Ok(())
    }

    /// Exact-topic queues, creating the topic first when auto-create is on
    /// and the topic has no queues yet.
    pub fn get_or_create_queues(
        &self,
        topic: &str,
        status: Option<QueueStatus>,
    ) -> Result<Vec<Arc<Queue>>> {
        let _guard = self.admin_lock.lock();

        let exists = self.registry.values().iter().any(|q| q.topic() == topic);
        if !exists && self.config.auto_create_topic {
            self.create_topic_locked(topic, self.config.topic_default_queue_count)?;
        }

        Ok(self.find_queues(topic, status))
    }

    // ==================== Read-only queries ====================

    pub fn get_all_topics(&self) -> Vec<String> {
        let topics: BTreeSet<String> = self
            .registry
            .values()
            .into_iter()
            .map(|q| q.topic().to_string())
            .collect();
        topics.into_iter().collect()
    }

    pub fn get_all_queue_count(&self) -> usize {
        self.registry.len()
    }

    /// Index entries resident across every queue cache
    pub fn get_all_queue_index_count(&self) -> usize {
        self.registry
            .values()
            .iter()
            .map(|q| q.message_count())
            .sum()
    }

    pub fn get_all_queue_unconsumed_message_count(&self) -> i64 {
        self.registry
            .values()
            .iter()
            .map(|q| q.message_real_count())
            .sum()
    }

    /// Minimum resident queue offset across the registry, -1 when empty
    pub fn get_queue_min_message_offset(&self) -> i64 {
        self.registry
            .values()
            .iter()
            .map(|q| q.min_queue_offset())
            .min()
            .unwrap_or(-1)
    }

    pub fn is_queue_exist(&self, topic: &str, queue_id: u32) -> bool {
        self.registry.contains_key(&QueueKey::new(topic, queue_id))
    }

    pub fn get_queue(&self, topic: &str, queue_id: u32) -> Option<Arc<Queue>> {
        self.registry.get(&QueueKey::new(topic, queue_id))
    }

    pub fn get_queue_current_offset(&self, topic: &str, queue_id: u32) -> i64 {
        self.get_queue(topic, queue_id)
            .map(|q| q.current_offset())
            .unwrap_or(-1)
    }

    pub fn get_queue_min_offset(&self, topic: &str, queue_id: u32) -> i64 {
        self.get_queue(topic, queue_id)
            .map(|q| q.min_queue_offset())
            .unwrap_or(-1)
    }

    /// Admin fuzzy search: every queue whose topic contains the substring
    pub fn query_queues(&self, topic: &str) -> Vec<Arc<Queue>> {
        let mut queues: Vec<Arc<Queue>> = self
            .registry
            .values()
            .into_iter()
            .filter(|q| q.topic().contains(topic))
            .collect();
        queues.sort_by(|a, b| (a.topic(), a.queue_id()).cmp(&(b.topic(), b.queue_id())));
        queues
    }

    /// Exact-topic queues, optionally filtered by status, ordered by id
    pub fn find_queues(&self, topic: &str, status: Option<QueueStatus>) -> Vec<Arc<Queue>> {
        let mut queues: Vec<Arc<Queue>> = self
            .registry
            .values()
            .into_iter()
            .filter(|q| q.topic() == topic)
            .filter(|q| status.is_none_or(|s| q.status() == s))
            .collect();
        queues.sort_by_key(|q| q.queue_id());
        queues
    }

    pub fn stats(&self) -> QueueServiceStats {
        QueueServiceStats {
            queue_count: self.get_all_queue_count(),
            topic_count: self.get_all_topics().len(),
            queue_index_count: self.get_all_queue_index_count(),
            unconsumed_message_count: self.get_all_queue_unconsumed_message_count(),
            min_message_offset: self.get_queue_min_message_offset(),
        }
    }

    // ==================== Maintenance ====================

    /// Reclaim index entries every subscribed group has consumed.
    /// Single-flight: an overlapping tick is skipped, not queued.
    pub fn remove_consumed_queue_index(&self) {
        if self
            .reclaim_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Consumed index reclaim still running, skipping tick");
            return;
        }

        let result = self.reclaim_consumed_entries();
        self.reclaim_running.store(false, Ordering::Release);

        if let Err(e) = result {
            error!("Consumed index reclaim failed: {}", e);
        }
    }

    fn reclaim_consumed_entries(&self) -> Result<()> {
        if self.offset_manager.consumer_group_count() == 0 {
            return Ok(());
        }

        for queue in self.registry.values() {
            let consumed = self
                .offset_manager
                .min_consumed_offset(queue.topic(), queue.queue_id());
            // The offset manager may report past what we have written
            // (stale metadata); never reclaim beyond the write position
            let consumed = consumed.min(queue.current_offset());

            queue.remove_all_previous_queue_index(consumed);
            self.message_store
                .update_consumed_queue_offset(queue.topic(), queue.queue_id(), consumed)?;
        }
        Ok(())
    }

    /// Evict unconsumed index entries proportionally from every queue's
    /// newest end once the aggregate cache exceeds its ceiling.
    /// Single-flight, separate flag from the reclaim pass.
    pub fn remove_exceed_max_cache_queue_index(&self) {
        if self
            .evict_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Cache eviction still running, skipping tick");
            return;
        }

        let result = self.evict_exceeding_entries();
        self.evict_running.store(false, Ordering::Release);

        if let Err(e) = result {
            error!("Queue index cache eviction failed: {}", e);
        }
    }

    fn evict_exceeding_entries(&self) -> Result<()> {
        // Eviction is only safe when dropped entries can be faulted back
        // in from the message log
        if !self.message_store.supports_batch_load_queue_index() {
            return Ok(());
        }

        let max_cache = self.config.queue_index_max_cache_size as i64;
        let exceed = self.get_all_queue_index_count() as i64 - max_cache;
        if exceed <= 0 {
            return Ok(());
        }

        // Consumed entries are the cheap ones; reclaim those first. Goes
        // through the single-flight wrapper so a concurrently running
        // reclaim tick is not doubled up.
        self.remove_consumed_queue_index();

        let snapshot: Vec<(Arc<Queue>, usize)> = self
            .registry
            .values()
            .into_iter()
            .map(|q| {
                let count = q.message_count();
                (q, count)
            })
            .collect();
        let total_unconsumed: i64 = snapshot.iter().map(|(_, c)| *c as i64).sum();

        let unconsumed_exceed = total_unconsumed - max_cache;
        if unconsumed_exceed <= 0 {
            return Ok(());
        }

        let mut total_removed = 0usize;
        for (queue, count) in snapshot {
            let require_remove = unconsumed_exceed * count as i64 / total_unconsumed;
            if require_remove > 0 {
                total_removed +=
                    queue.remove_required_queue_index_from_last(require_remove as usize);
            }
        }

        if total_removed > 0 {
            info!(
                "Evicted {} unconsumed queue index entries ({} resident, ceiling {})",
                total_removed,
                self.get_all_queue_index_count(),
                max_cache
            );
        }
        Ok(())
    }
}

fn persisted_record(queue: &Queue) -> PersistedQueue {
    PersistedQueue {
        topic: queue.topic().to_string(),
        queue_id: queue.queue_id(),
        setting: queue.setting(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::storage::{FileQueueStore, MemoryMessageStore, MemoryOffsetManager};
    use std::path::Path;
    use tempfile::tempdir;

    struct Fixture {
        service: Arc<QueueService>,
        message_store: Arc<MemoryMessageStore>,
        offset_manager: Arc<MemoryOffsetManager>,
    }

    fn fixture(base: &Path) -> Fixture {
        fixture_with(base, |_| {})
    }

    fn fixture_with(base: &Path, tweak: impl FnOnce(&mut BrokerConfig)) -> Fixture {
        let mut config = BrokerConfig::default();
        config.chunk.base_path = base.to_path_buf();
        tweak(&mut config);

        let message_store = Arc::new(MemoryMessageStore::new(true));
        let offset_manager = Arc::new(MemoryOffsetManager::new());
        let service = Arc::new(QueueService::new(
            config.queue,
            config.chunk,
            Arc::new(FileQueueStore::new(base)),
            message_store.clone(),
            offset_manager.clone(),
        ));
        Fixture {
            service,
            message_store,
            offset_manager,
        }
    }

    #[test]
    fn test_create_topic_validates_arguments() {
        let dir = tempdir().unwrap();
        let f = fixture_with(dir.path(), |c| c.queue.topic_max_queue_count = 8);

        assert!(matches!(
            f.service.create_topic("", 1),
            Err(BrokerError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.service.create_topic("orders", 0),
            Err(BrokerError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.service.create_topic("orders", 9),
            Err(BrokerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_create_topic_is_idempotent() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path());

        f.service.create_topic("orders", 4).unwrap();
        assert_eq!(f.service.get_all_queue_count(), 4);
        let first: Vec<Arc<Queue>> = f.service.find_queues("orders", None);

        f.service.create_topic("orders", 4).unwrap();
        assert_eq!(f.service.get_all_queue_count(), 4);

        // Resident queues were not displaced by the second call
        let second = f.service.find_queues("orders", None);
        for (a, b) in first.iter().zip(second.iter()) {
            assert!(Arc::ptr_eq(a, b));
        }
    }

    #[test]
    fn test_add_queue_allocates_monotonic_ids() {
        let dir = tempdir().unwrap();
        let f = fixture_with(dir.path(), |c| c.queue.topic_max_queue_count = 2);

        assert_eq!(f.service.add_queue("orders").unwrap(), 0);
        assert_eq!(f.service.add_queue("orders").unwrap(), 1);
        assert!(matches!(
            f.service.add_queue("orders"),
            Err(BrokerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_add_queue_reuses_only_highest_freed_id() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path());
        f.service.create_topic("orders", 3).unwrap();

        // Removing the highest id shifts the max down, so it is reused
        f.service.disable_queue("orders", 2).unwrap();
        f.service.remove_queue("orders", 2).unwrap();
        assert_eq!(f.service.add_queue("orders").unwrap(), 2);

        // Removing a middle id leaves a hole that is never refilled
        f.service.disable_queue("orders", 1).unwrap();
        f.service.remove_queue("orders", 1).unwrap();
        assert_eq!(f.service.add_queue("orders").unwrap(), 3);
    }

    #[test]
    fn test_remove_queue_gating() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path());
        f.service.create_topic("orders", 1).unwrap();

        // Enabled queues cannot be removed
        assert!(matches!(
            f.service.remove_queue("orders", 0),
            Err(BrokerError::Precondition(_))
        ));

        f.service.disable_queue("orders", 0).unwrap();
        let queue = f.service.get_queue("orders", 0).unwrap();
        for i in 0..5 {
            let position = f.message_store.append_message(b"payload");
            queue.add_queue_index(i, position).unwrap();
        }

        // Undrained queues cannot be removed either
        assert!(matches!(
            f.service.remove_queue("orders", 0),
            Err(BrokerError::Precondition(_))
        ));

        // Drain: every group has consumed up to the current offset
        f.offset_manager.commit_offset("group-a", "orders", 0, 4);
        f.service.remove_consumed_queue_index();

        f.service.remove_queue("orders", 0).unwrap();
        assert!(!f.service.is_queue_exist("orders", 0));
        assert!(!dir.path().join("orders").exists());
    }

    #[test]
    fn test_remove_missing_queue_is_noop() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path());
        f.service.remove_queue("ghost", 3).unwrap();
    }

    #[test]
    fn test_enable_disable_roundtrip() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path());
        f.service.create_topic("orders", 1).unwrap();

        f.service.disable_queue("orders", 0).unwrap();
        let queue = f.service.get_queue("orders", 0).unwrap();
        assert_eq!(queue.status(), QueueStatus::Disabled);

        // The persisted copy flipped too
        let store = FileQueueStore::new(dir.path());
        let persisted = store.get_queue("orders", 0).unwrap().unwrap();
        assert_eq!(persisted.setting.status, QueueStatus::Disabled);

        f.service.enable_queue("orders", 0).unwrap();
        assert_eq!(queue.status(), QueueStatus::Enabled);

        // Unknown queues are a silent no-op
        f.service.enable_queue("ghost", 9).unwrap();
    }

    #[test]
    fn test_queries() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path());
        f.service.create_topic("orders-eu", 2).unwrap();
        f.service.create_topic("orders-us", 1).unwrap();
        f.service.create_topic("billing", 1).unwrap();

        assert_eq!(
            f.service.get_all_topics(),
            vec!["billing", "orders-eu", "orders-us"]
        );
        assert_eq!(f.service.get_all_queue_count(), 4);

        // Substring match, not prefix
        assert_eq!(f.service.query_queues("rders").len(), 3);
        assert_eq!(f.service.query_queues("orders-eu").len(), 2);
        assert!(f.service.query_queues("missing").is_empty());

        // Exact match only
        assert!(f.service.find_queues("orders", None).is_empty());
        let found = f.service.find_queues("orders-eu", None);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].queue_id(), 0);
        assert_eq!(found[1].queue_id(), 1);

        f.service.disable_queue("orders-eu", 1).unwrap();
        let enabled = f
            .service
            .find_queues("orders-eu", Some(QueueStatus::Enabled));
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].queue_id(), 0);

        assert!(f.service.is_queue_exist("billing", 0));
        assert!(!f.service.is_queue_exist("billing", 1));
        assert_eq!(f.service.get_queue_current_offset("ghost", 0), -1);
        assert_eq!(f.service.get_queue_min_offset("ghost", 0), -1);
    }

    #[test]
    fn test_get_or_create_auto_creates() {
        let dir = tempdir().unwrap();
        let f = fixture_with(dir.path(), |c| {
            c.queue.topic_default_queue_count = 3;
        });

        let queues = f.service.get_or_create_queues("orders", None).unwrap();
        assert_eq!(queues.len(), 3);

        // Second call finds the existing queues
        let again = f.service.get_or_create_queues("orders", None).unwrap();
        assert_eq!(again.len(), 3);
        assert_eq!(f.service.get_all_queue_count(), 3);
    }

    #[test]
    fn test_get_or_create_respects_auto_create_flag() {
        let dir = tempdir().unwrap();
        let f = fixture_with(dir.path(), |c| c.queue.auto_create_topic = false);

        let queues = f.service.get_or_create_queues("orders", None).unwrap();
        assert!(queues.is_empty());
        assert_eq!(f.service.get_all_queue_count(), 0);
    }

    #[test]
    fn test_reclaim_clamps_to_current_offset() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path());
        f.service.create_topic("orders", 1).unwrap();

        let queue = f.service.get_queue("orders", 0).unwrap();
        for i in 0..=100 {
            queue.add_queue_index(i, i * 10).unwrap();
        }

        // Stale offset metadata reports past the write position
        f.offset_manager.commit_offset("group-a", "orders", 0, 150);
        f.service.remove_consumed_queue_index();

        assert_eq!(f.message_store.consumed_queue_offset("orders", 0), Some(100));
        assert_eq!(queue.message_count(), 0);
        assert_eq!(queue.min_queue_offset(), 101);
    }

    #[test]
    fn test_reclaim_skips_without_consumer_groups() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path());
        f.service.create_topic("orders", 1).unwrap();

        let queue = f.service.get_queue("orders", 0).unwrap();
        for i in 0..10 {
            queue.add_queue_index(i, i).unwrap();
        }

        f.service.remove_consumed_queue_index();
        assert_eq!(queue.message_count(), 10);
        assert_eq!(f.message_store.consumed_queue_offset("orders", 0), None);
    }

    #[test]
    fn test_eviction_requires_batch_load_support() {
        let dir = tempdir().unwrap();
        let mut config = BrokerConfig::default();
        config.chunk.base_path = dir.path().to_path_buf();
        config.queue.queue_index_max_cache_size = 5;

        let service = Arc::new(QueueService::new(
            config.queue,
            config.chunk,
            Arc::new(FileQueueStore::new(dir.path())),
            Arc::new(MemoryMessageStore::new(false)),
            Arc::new(MemoryOffsetManager::new()),
        ));

        service.create_topic("orders", 1).unwrap();
        let queue = service.get_queue("orders", 0).unwrap();
        for i in 0..20 {
            queue.add_queue_index(i, i).unwrap();
        }

        // Indexes cannot be re-faulted, so nothing may be evicted
        service.remove_exceed_max_cache_queue_index();
        assert_eq!(service.get_all_queue_index_count(), 20);
    }

    #[test]
    fn test_eviction_is_proportional() {
        let dir = tempdir().unwrap();
        let f = fixture_with(dir.path(), |c| {
            c.queue.queue_index_max_cache_size = 300;
        });
        f.service.create_topic("orders", 3).unwrap();

        let counts = [100i64, 200, 300];
        for (queue_id, count) in counts.iter().enumerate() {
            let queue = f.service.get_queue("orders", queue_id as u32).unwrap();
            for i in 0..*count {
                queue.add_queue_index(i, i).unwrap();
            }
        }

        // 600 resident, ceiling 300, all unconsumed: halve each queue
        f.service.remove_exceed_max_cache_queue_index();

        assert_eq!(
            f.service.get_queue("orders", 0).unwrap().message_count(),
            50
        );
        assert_eq!(
            f.service.get_queue("orders", 1).unwrap().message_count(),
            100
        );
        assert_eq!(
            f.service.get_queue("orders", 2).unwrap().message_count(),
            150
        );
        assert!(f.service.get_all_queue_index_count() <= 300);
    }

    #[test]
    fn test_eviction_under_ceiling_is_noop() {
        let dir = tempdir().unwrap();
        let f = fixture_with(dir.path(), |c| {
            c.queue.queue_index_max_cache_size = 1000;
        });
        f.service.create_topic("orders", 1).unwrap();

        let queue = f.service.get_queue("orders", 0).unwrap();
        for i in 0..10 {
            queue.add_queue_index(i, i).unwrap();
        }

        f.service.remove_exceed_max_cache_queue_index();
        assert_eq!(queue.message_count(), 10);
    }

    #[tokio::test]
    async fn test_start_loads_and_restart_is_idempotent() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path());

        f.service.start().unwrap();
        assert_eq!(f.service.get_all_queue_count(), 0);
        assert_eq!(f.service.get_queue_min_message_offset(), -1);

        f.service.create_topic("orders", 2).unwrap();
        let queue = f.service.get_queue("orders", 0).unwrap();
        for i in 0..5 {
            queue.add_queue_index(i, i * 8).unwrap();
        }
        f.service.shutdown();

        // A fresh service over the same directory sees the population
        let g = fixture(dir.path());
        g.service.start().unwrap();
        assert_eq!(g.service.get_all_queue_count(), 2);
        assert_eq!(g.service.get_queue_current_offset("orders", 0), 4);

        // start() again rebuilds rather than duplicating
        g.service.start().unwrap();
        assert_eq!(g.service.get_all_queue_count(), 2);
        g.service.shutdown();
    }

    #[tokio::test]
    async fn test_startup_faults_on_malformed_layout() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("orders").join("not-a-number")).unwrap();

        let f = fixture(dir.path());
        assert!(matches!(
            f.service.start(),
            Err(BrokerError::Storage(_))
        ));
    }

    #[test]
    fn test_stats_snapshot() {
        let dir = tempdir().unwrap();
        let f = fixture(dir.path());
        f.service.create_topic("orders", 2).unwrap();

        let queue = f.service.get_queue("orders", 1).unwrap();
        for i in 0..4 {
            queue.add_queue_index(i, i).unwrap();
        }

        let stats = f.service.stats();
        assert_eq!(stats.queue_count, 2);
        assert_eq!(stats.topic_count, 1);
        assert_eq!(stats.queue_index_count, 4);
        assert_eq!(stats.unconsumed_message_count, 4);
        assert_eq!(stats.min_message_offset, 0);
    }
}
