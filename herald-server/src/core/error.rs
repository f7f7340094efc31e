use thiserror::Error;

/// Main error type for broker operations
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for BrokerError {
    fn from(e: bincode::Error) -> Self {
        BrokerError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::Serialization(e.to_string())
    }
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;
