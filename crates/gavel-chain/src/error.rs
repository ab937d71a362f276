//! Error types for approval chains.
//!
//! Structured error handling for chain registration and request
//! transitions. Missing requests, wrong statuses and unauthorized
//! overrides are outcome values, not errors.

use gavel_store::StoreError;
use thiserror::Error;

/// Result type alias for chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;

/// Errors that can occur while running approval chains.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The durable store failed; the transition was not applied.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// No chain is registered under this id.
    #[error("unknown approval chain '{0}'")]
    UnknownChain(String),

    /// A chain definition that can never complete.
    #[error("invalid approval chain '{chain_id}': {reason}")]
    InvalidChain {
        /// Offending chain.
        chain_id: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The selection policy produced no chain for the request.
    #[error("no approval chain selected for request '{0}'")]
    NoChainSelected(String),
}

impl ChainError {
    /// Returns true if the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Store(err) if err.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_chain_display() {
        let err = ChainError::UnknownChain("fast-track".to_string());
        assert!(err.to_string().contains("fast-track"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_chain_display() {
        let err = ChainError::InvalidChain {
            chain_id: "empty".to_string(),
            reason: "no steps".to_string(),
        };
        assert!(err.to_string().contains("empty"));
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_store_failure_retryable() {
        let err: ChainError = StoreError::Unavailable("timeout".to_string()).into();
        assert!(err.is_retryable());
    }
}
