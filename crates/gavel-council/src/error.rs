//! Error types for the council.
//!
//! Unknown items, closed items and unmet consensus are reported through
//! outcome values, not through this type.

use gavel_store::StoreError;
use thiserror::Error;

/// Errors that can occur during deliberation and routing.
#[derive(Debug, Error)]
pub enum CouncilError {
    /// The durable store rejected or failed an operation.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// A consensus threshold outside [0, 1].
    #[error("invalid consensus threshold {0}: must be within [0, 1]")]
    InvalidThreshold(f64),

    /// A voting policy that can never be satisfied.
    #[error("invalid voting policy: {0}")]
    InvalidPolicy(String),

    /// The governance request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl CouncilError {
    /// Returns true if the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CouncilError::Store(err) if err.is_retryable())
    }
}
