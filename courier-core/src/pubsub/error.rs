//! Error types for pub/sub operations

use super::transport::TransportError;
use thiserror::Error;

/// Pub/sub specific errors
///
/// Validation errors are returned synchronously by the offending call and
/// never mutate bus state. Callback faults are not represented here: they
/// are reported through a [`DiagnosticsSink`](super::DiagnosticsSink).
#[derive(Debug, Error)]
pub enum PubSubError {
    /// Regex pattern failed to compile
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Subscription pattern exceeds the maximum channel length
    #[error("Pattern too long: {len} bytes (max {max})")]
    PatternTooLong { len: usize, max: usize },

    /// Channel name exceeds the maximum channel length
    #[error("Channel name too long: {len} bytes (max {max})")]
    ChannelTooLong { len: usize, max: usize },

    /// Payload exceeds the maximum payload size
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Subscription not found
    #[error("Subscription not found: {0}")]
    NotFound(String),

    /// Transport egress failed; local loopback was still attempted
    #[error("Transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    /// The bus has been stopped
    #[error("Bus is closed")]
    Closed,

    /// The dispatch loop was already started
    #[error("Dispatch loop already running")]
    AlreadyRunning,
}

impl PubSubError {
    /// Whether the error rejected caller input without touching any state
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PubSubError::InvalidPattern { .. }
                | PubSubError::PatternTooLong { .. }
                | PubSubError::ChannelTooLong { .. }
                | PubSubError::PayloadTooLarge { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(PubSubError::PatternTooLong { len: 40, max: 32 }.is_validation());
        assert!(PubSubError::PayloadTooLarge { size: 9, max: 8 }.is_validation());
        assert!(!PubSubError::Closed.is_validation());
        assert!(!PubSubError::NotFound("x".into()).is_validation());
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: PubSubError = TransportError::Closed.into();
        assert!(matches!(err, PubSubError::TransportFailure(TransportError::Closed)));
    }
}
