//! Transaction error types.

use thiserror::Error;

use crate::storage::{InvalidNameError, StorageError};
use crate::transaction::context::TransactionState;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A transaction is already open on the branch.
    #[error("a transaction is already open on branch {branch}")]
    Concurrency { branch: String },

    /// The handle's slot was superseded by a newer transaction.
    #[error("transaction on branch {branch} does not exist or has timed out")]
    Expired { branch: String },

    /// The handle was already committed or aborted.
    #[error("transaction is closed (state: {state})")]
    Closed { state: TransactionState },

    /// A document key failed validation.
    #[error("invalid document key: {0}")]
    InvalidKey(#[from] InvalidNameError),
}

impl TransactionError {
    /// Another writer holds the branch.
    pub fn is_concurrency(&self) -> bool {
        matches!(self, TransactionError::Concurrency { .. })
    }

    /// The handle is stale.
    pub fn is_expired(&self) -> bool {
        matches!(self, TransactionError::Expired { .. })
    }

    /// The request itself was bad.
    pub fn is_validation(&self) -> bool {
        match self {
            TransactionError::InvalidKey(_) | TransactionError::Closed { .. } => true,
            TransactionError::Storage(e) => e.is_invalid_input(),
            _ => false,
        }
    }
}
