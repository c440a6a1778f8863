//! Domain error type for bond operations
//!
//! Each variant corresponds to one [`ErrorKind`]; the route layer maps kinds to
//! HTTP statuses and never forwards raw store messages to clients.

use thiserror::Error;

use crate::ids::{BondId, UserId};

/// Errors that can occur during bond operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BondError {
    #[error("Unauthenticated: no identity supplied")]
    Unauthenticated,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store failure: {0}")]
    StoreFailure(String),
}

/// Result type for bond operations
pub type BondResult<T> = Result<T, BondError>;

/// Stable classification of [`BondError`] values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthenticated,
    Unauthorized,
    NotFound,
    InvalidState,
    AlreadyExists,
    InvalidInput,
    Conflict,
    StoreFailure,
}

impl BondError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BondError::Unauthenticated => ErrorKind::Unauthenticated,
            BondError::Unauthorized(_) => ErrorKind::Unauthorized,
            BondError::NotFound(_) => ErrorKind::NotFound,
            BondError::InvalidState(_) => ErrorKind::InvalidState,
            BondError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            BondError::InvalidInput(_) => ErrorKind::InvalidInput,
            BondError::Conflict(_) => ErrorKind::Conflict,
            BondError::StoreFailure(_) => ErrorKind::StoreFailure,
        }
    }

    /// Store failures and version conflicts may succeed when the caller retries
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::StoreFailure | ErrorKind::Conflict)
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        BondError::NotFound(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        BondError::InvalidState(msg.into())
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        BondError::InvalidInput(msg.into())
    }

    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        BondError::Unauthorized(msg.into())
    }

    pub fn not_a_member(bond_id: &BondId, user_id: &UserId) -> Self {
        BondError::Unauthorized(format!(
            "{} is not an active member of bond {}",
            user_id, bond_id
        ))
    }

    pub fn already_member(bond_id: &BondId, user_id: &UserId) -> Self {
        BondError::AlreadyExists(format!(
            "{} is already an active member of bond {}",
            user_id, bond_id
        ))
    }
}
