use crate::core::error::{BrokerError, Result};
use crate::core::registry::QueueKey;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tracing::{debug, warn};

/// File holding the queue's index entries (append-only, framed)
const INDEX_CHUNK_FILE: &str = "index.chunk";
/// File holding the consumed watermark, written on close
const CHECKPOINT_FILE: &str = "checkpoint.json";
/// Queue metadata document, owned by the queue store
pub const QUEUE_META_FILE: &str = "queue.json";

/// Queue status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Enabled,
    Disabled,
}

/// Mutable queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSetting {
    pub status: QueueStatus,
}

impl Default for QueueSetting {
    fn default() -> Self {
        Self {
            status: QueueStatus::Enabled,
        }
    }
}

/// Queue metadata document persisted under the queue directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedQueue {
    pub topic: String,
    pub queue_id: u32,
    pub setting: QueueSetting,
}

/// One index entry: a queue offset mapped to a byte position in the message log
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct IndexEntry {
    queue_offset: i64,
    message_position: i64,
}

/// Consumed watermark checkpoint
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct IndexCheckpoint {
    consumed_offset: i64,
}

/// One numbered queue of a topic.
///
/// Owns the resident index cache mapping `queue_offset -> message_position`
/// over the contiguous range `[min_queue_offset, current_offset]`, the
/// queue's status, and the on-disk index chunk backing the cache. Counter
/// and offset reads are lock-free; index mutations serialise on the inner
/// lock. Once closed, index mutations become no-ops so a maintenance pass
/// holding a stale snapshot cannot corrupt a removed queue.
pub struct Queue {
    topic: String,
    queue_id: u32,
    dir: PathBuf,
    setting: RwLock<QueueSetting>,
    entries: RwLock<BTreeMap<i64, i64>>,
    writer: Mutex<Option<BufWriter<File>>>,
    current_offset: AtomicI64,
    consumed_offset: AtomicI64,
    closed: AtomicBool,
}

impl Queue {
    /// Create a queue handle rooted at `<base_path>/<topic>/<queue_id>`.
    /// No disk access happens until `load`.
    pub fn new(topic: impl Into<String>, queue_id: u32, base_path: &Path) -> Self {
        let topic = topic.into();
        let dir = base_path.join(&topic).join(queue_id.to_string());
        Self {
            topic,
            queue_id,
            dir,
            setting: RwLock::new(QueueSetting::default()),
            entries: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(None),
            current_offset: AtomicI64::new(-1),
            consumed_offset: AtomicI64::new(-1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn queue_id(&self) -> u32 {
        self.queue_id
    }

    pub fn key(&self) -> QueueKey {
        QueueKey::new(&self.topic, self.queue_id)
    }

    pub fn status(&self) -> QueueStatus {
        self.setting.read().status
    }

    pub fn set_status(&self, status: QueueStatus) {
        self.setting.write().status = status;
    }

    pub fn setting(&self) -> QueueSetting {
        self.setting.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Rebuild the resident cache from the on-disk chunk directory.
    ///
    /// Restores the queue metadata and the consumed watermark, then scans
    /// the index chunk. Entries at or below the watermark were already
    /// reclaimed in a previous run and are not resurrected. A truncated or
    /// corrupt tail ends the scan; everything before it is kept.
    pub fn load(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let meta_path = self.dir.join(QUEUE_META_FILE);
        if meta_path.exists() {
            let content = std::fs::read_to_string(&meta_path)?;
            let persisted: PersistedQueue = serde_json::from_str(&content)?;
            *self.setting.write() = persisted.setting;
        }

        let checkpoint_path = self.dir.join(CHECKPOINT_FILE);
        if checkpoint_path.exists() {
            let content = std::fs::read_to_string(&checkpoint_path)?;
            let checkpoint: IndexCheckpoint = serde_json::from_str(&content)?;
            self.consumed_offset
                .store(checkpoint.consumed_offset, Ordering::Release);
        }

        self.scan_index_chunk()?;

        debug!(
            "Loaded queue {}: current_offset={}, resident={}",
            self.key(),
            self.current_offset.load(Ordering::Acquire),
            self.entries.read().len()
        );
        Ok(())
    }

    fn scan_index_chunk(&self) -> Result<()> {
        let chunk_path = self.dir.join(INDEX_CHUNK_FILE);
        if !chunk_path.exists() {
            return Ok(());
        }

        let mut file = File::open(&chunk_path)?;
        let consumed = self.consumed_offset.load(Ordering::Acquire);
        let mut entries = self.entries.write();
        let mut current = self.current_offset.load(Ordering::Acquire);

        loop {
            let mut len_buf = [0u8; 8];
            match file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(_) => break, // EOF
            }
            let mut crc_buf = [0u8; 4];
            if file.read_exact(&mut crc_buf).is_err() {
                warn!("Incomplete index entry header in {:?}, truncating", chunk_path);
                break;
            }

            let size = u64::from_le_bytes(len_buf);
            let mut data = vec![0u8; size as usize];
            if file.read_exact(&mut data).is_err() {
                warn!("Incomplete index entry in {:?}, truncating", chunk_path);
                break;
            }

            let expected = u32::from_le_bytes(crc_buf);
            if crc32fast::hash(&data) != expected {
                warn!("Corrupted index entry in {:?}, stopping scan", chunk_path);
                break;
            }

            let entry: IndexEntry = match bincode::deserialize(&data) {
                Ok(e) => e,
                Err(_) => {
                    warn!("Undecodable index entry in {:?}, stopping scan", chunk_path);
                    break;
                }
            };

            if entry.queue_offset > consumed {
                entries.insert(entry.queue_offset, entry.message_position);
            }
            current = current.max(entry.queue_offset);
        }

        self.current_offset.store(current, Ordering::Release);
        Ok(())
    }

    /// Flush the chunk writer and persist the consumed watermark.
    /// Idempotent; index mutations after close are no-ops.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(mut writer) = self.writer.lock().take() {
            writer.flush()?;
        }

        let checkpoint = IndexCheckpoint {
            consumed_offset: self.consumed_offset.load(Ordering::Acquire),
        };
        std::fs::write(
            self.dir.join(CHECKPOINT_FILE),
            serde_json::to_string(&checkpoint)?,
        )?;

        debug!("Closed queue {}", self.key());
        Ok(())
    }

    /// Highest queue offset written, -1 when nothing has been written
    pub fn current_offset(&self) -> i64 {
        self.current_offset.load(Ordering::Acquire)
    }

    /// Next queue offset the writer would assign
    pub fn next_offset(&self) -> i64 {
        self.current_offset() + 1
    }

    /// Lowest resident queue offset. For an empty cache this is the slot
    /// just past the consumed watermark, keeping the resident range
    /// `[min_queue_offset, current_offset]` description consistent.
    pub fn min_queue_offset(&self) -> i64 {
        let entries = self.entries.read();
        match entries.keys().next() {
            Some(first) => *first,
            None => self.consumed_offset.load(Ordering::Acquire) + 1,
        }
    }

    /// Index entries currently resident in the cache
    pub fn message_count(&self) -> usize {
        self.entries.read().len()
    }

    /// The queue's live backlog: entries written but not yet consumed by
    /// every subscribed group
    pub fn message_real_count(&self) -> i64 {
        let current = self.current_offset.load(Ordering::Acquire);
        let consumed = self.consumed_offset.load(Ordering::Acquire);
        (current - consumed).max(0)
    }

    /// Append one index entry and make it resident.
    pub fn add_queue_index(&self, queue_offset: i64, message_position: i64) -> Result<()> {
        if self.is_closed() {
            return Err(BrokerError::Precondition(format!(
                "queue {} is closed",
                self.key()
            )));
        }

        let entry = IndexEntry {
            queue_offset,
            message_position,
        };
        self.append_to_chunk(&entry)?;

        self.entries.write().insert(queue_offset, message_position);
        self.current_offset.fetch_max(queue_offset, Ordering::AcqRel);
        Ok(())
    }

    fn append_to_chunk(&self, entry: &IndexEntry) -> Result<()> {
        let mut guard = self.writer.lock();
        if guard.is_none() {
            std::fs::create_dir_all(&self.dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(INDEX_CHUNK_FILE))?;
            *guard = Some(BufWriter::new(file));
        }

        if let Some(writer) = guard.as_mut() {
            // Entry format: size (u64) + checksum (u32) + bincode payload
            let data = bincode::serialize(entry)?;
            let checksum = crc32fast::hash(&data);
            writer.write_all(&(data.len() as u64).to_le_bytes())?;
            writer.write_all(&checksum.to_le_bytes())?;
            writer.write_all(&data)?;
        }
        Ok(())
    }

    /// Discard every resident entry with `queue_offset <= upto` and advance
    /// the consumed watermark. Idempotent; a no-op on a closed queue.
    pub fn remove_all_previous_queue_index(&self, upto: i64) {
        if self.is_closed() {
            return;
        }

        let upto = upto.min(self.current_offset());
        let mut entries = self.entries.write();
        let before = entries.len();
        let kept = entries.split_off(&(upto + 1));
        *entries = kept;
        let removed = before - entries.len();
        drop(entries);

        self.consumed_offset.fetch_max(upto, Ordering::AcqRel);

        if removed > 0 {
            debug!("Reclaimed {} consumed index entries from {}", removed, self.key());
        }
    }

    /// Trim up to `require_remove` entries from the newest end of the cache,
    /// returning the count actually removed. Evicted entries stay in the
    /// chunk file and can be faulted back in from the message log.
    pub fn remove_required_queue_index_from_last(&self, require_remove: usize) -> usize {
        if self.is_closed() {
            return 0;
        }

        let mut entries = self.entries.write();
        let mut removed = 0;
        while removed < require_remove {
            if entries.pop_last().is_none() {
                break;
            }
            removed += 1;
        }
        removed
    }
}
