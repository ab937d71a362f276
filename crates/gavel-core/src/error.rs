//! Error types for Gavel Core.

use thiserror::Error;

/// Core error type for Gavel operations.
#[derive(Debug, Error)]
pub enum GavelError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store error passthrough.
    #[error("Store error: {0}")]
    Store(#[from] gavel_store::StoreError),

    /// Council error passthrough.
    #[error("Council error: {0}")]
    Council(#[from] gavel_council::CouncilError),

    /// Approval chain error passthrough.
    #[error("Approval error: {0}")]
    Chain(#[from] gavel_chain::ChainError),
}

impl GavelError {
    /// Returns true if the operation may succeed when retried unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            GavelError::Store(err) => err.is_retryable(),
            GavelError::Council(err) => err.is_retryable(),
            GavelError::Chain(err) => err.is_retryable(),
            GavelError::Config(_) | GavelError::Io(_) => false,
        }
    }
}
