//! Error types for Courier operations

use crate::pubsub::PubSubError;

/// Result type for Courier operations
pub type Result<T> = std::result::Result<T, CourierError>;

/// Error types for the Courier messaging core
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    /// Pub/sub operation failed
    #[error(transparent)]
    PubSub(#[from] PubSubError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<figment::Error> for CourierError {
    fn from(err: figment::Error) -> Self {
        CourierError::Configuration(format!("Failed to load configuration: {}", err))
    }
}

impl From<String> for CourierError {
    fn from(s: String) -> Self {
        CourierError::Other(s)
    }
}

impl From<&str> for CourierError {
    fn from(s: &str) -> Self {
        CourierError::Other(s.to_string())
    }
}
