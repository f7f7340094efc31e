pub mod error;
pub mod queue;
pub mod queue_service;
pub mod registry;

pub use error::{BrokerError, Result};
pub use queue::{PersistedQueue, Queue, QueueSetting, QueueStatus};
pub use queue_service::{QueueService, QueueServiceStats};
pub use registry::{QueueKey, QueueRegistry};
