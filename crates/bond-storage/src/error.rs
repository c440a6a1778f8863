use bond_common::BondError;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Version conflict: {0}")]
    Conflict(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Record not found: {0}")]
    Missing(String),

    #[error("Balance out of range: {0}")]
    Overflow(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for BondError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(msg) => BondError::Conflict(msg),
            StorageError::Overflow(msg) => BondError::InvalidState(msg),
            other => BondError::StoreFailure(other.to_string()),
        }
    }
}
