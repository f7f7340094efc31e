use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main broker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub queue: QueueServiceConfig,
    #[serde(default)]
    pub chunk: QueueChunkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Queue service limits and maintenance cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueServiceConfig {
    /// Upper bound on queues per topic
    pub topic_max_queue_count: u32,
    /// Queues created when a topic is auto-created
    pub topic_default_queue_count: u32,
    /// Create a topic on first reference instead of rejecting it
    pub auto_create_topic: bool,
    /// Ceiling on index entries resident across all queue caches
    pub queue_index_max_cache_size: usize,
    /// Tick period of the consumed-index reclaim task
    pub remove_consumed_queue_index_interval_ms: u64,
    /// Tick period of the cache-eviction task
    pub remove_exceed_max_cache_queue_index_interval_ms: u64,
}

impl Default for QueueServiceConfig {
    fn default() -> Self {
        Self {
            topic_max_queue_count: 256,
            topic_default_queue_count: 4,
            auto_create_topic: true,
            queue_index_max_cache_size: 5_000_000,
            remove_consumed_queue_index_interval_ms: 30_000,
            remove_exceed_max_cache_queue_index_interval_ms: 30_000,
        }
    }
}

/// On-disk queue chunk layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueChunkConfig {
    /// Root of the `<base_path>/<topic>/<queue_id>` directory tree
    pub base_path: PathBuf,
}

impl Default for QueueChunkConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./data/queue-chunks"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: BrokerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}
