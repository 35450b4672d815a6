use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Cents, RegistrationError};
use crate::storage::is_contention;

/// Failures of the ledger operations (deposit, withdraw, reads).
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The account does not exist or is not the caller's. Both look the same
    /// from outside so account existence is never leaked.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Account is closed")]
    AccountClosed,

    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Cents, required: Cents },

    /// Lost a storage-level race; retried internally and never returned to callers.
    #[error("Concurrent update conflict")]
    Conflict,

    #[error("Storage failure: {0}")]
    StorageFailure(#[from] anyhow::Error),
}

impl LedgerError {
    /// Classify a repository error: lock contention is retryable, anything else is fatal
    /// for the current operation.
    pub fn from_storage(err: anyhow::Error) -> Self {
        if is_contention(&err) {
            LedgerError::Conflict
        } else {
            LedgerError::StorageFailure(err)
        }
    }
}

/// Failures of registration, login and session handling.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(#[from] RegistrationError),

    #[error("Username or email already exists")]
    AlreadyExists,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked until {until}")]
    Locked { until: DateTime<Utc> },

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Admin role required")]
    Forbidden,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Storage failure: {0}")]
    StorageFailure(#[from] anyhow::Error),
}
