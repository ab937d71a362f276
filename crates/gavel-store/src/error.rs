//! Error types for the persistence and event gateway.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the durable record store.
///
/// A store error on a mutating operation always aborts the transition
/// that triggered it. Callers can use [`StoreError::is_retryable`] to
/// decide whether to surface the failure as transient.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying sled database failed.
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    /// A record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored record is malformed.
    #[error("corrupt record under key '{0}'")]
    Corrupt(String),
}

impl StoreError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Unavailable(_))
    }
}

/// Failure to hand a lifecycle event to its sink.
///
/// Never rolls back a committed state transition.
#[derive(Debug, Clone, Error)]
#[error("event publish failed: {0}")]
pub struct PublishError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_is_retryable() {
        let err = StoreError::Unavailable("connection refused".to_string());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_corrupt_is_not_retryable() {
        let err = StoreError::Corrupt("req-1".to_string());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("req-1"));
    }

    #[test]
    fn test_serialization_from() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Serialization(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_publish_error_display() {
        let err = PublishError("no route".to_string());
        assert_eq!(err.to_string(), "event publish failed: no route");
    }
}
