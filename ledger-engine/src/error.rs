//! Error types for the ledger

use crate::types::{AccountId, EntryId, TransferId};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a store refused to make progress right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientReason {
    /// Waited too long for a row lock
    LockTimeout,
    /// Chosen as deadlock victim
    Deadlock,
    /// Store busy (write conflict)
    Busy,
    /// Store asked for a retry
    TryAgain,
    /// Transaction expired inside the store
    Expired,
}

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller must correct the request
    InvalidInput,
    /// Referenced row does not exist
    NotFound,
    /// A storage-level invariant would be broken
    Conflict,
    /// Retrying the whole operation may succeed
    Transient,
    /// Rollback failed after another error; the connection is suspect
    RollbackFailure,
    /// Caller deadline elapsed; nothing was applied
    Cancelled,
    /// Storage, serialization or runtime failure
    Internal,
}

impl ErrorKind {
    /// Stable label (metrics, logs)
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transient => "transient",
            ErrorKind::RollbackFailure => "rollback_failure",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected before touching the store
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Entry not found
    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),

    /// Transfer not found
    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    /// Balance may not go negative
    #[error("Insufficient funds on account {account_id}: balance {balance}, debit {amount}")]
    InsufficientFunds {
        /// Account that would be overdrawn
        account_id: AccountId,
        /// Balance before the debit
        balance: i64,
        /// Requested debit
        amount: i64,
    },

    /// Other storage-level check failure
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Retryable store condition
    #[error("Transient failure ({reason:?}): {message}")]
    Transient {
        /// Store-reported reason
        reason: TransientReason,
        /// Store message
        message: String,
    },

    /// Deadline elapsed before commit
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Rollback failed after the operation had already failed
    #[error("Rollback failed ({rollback}) after: {cause}")]
    Rollback {
        /// Error that triggered the rollback
        cause: Box<Error>,
        /// Error raised by the rollback itself
        rollback: Box<Error>,
    },

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Worker task failure
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::AccountNotFound(_) | Error::EntryNotFound(_) | Error::TransferNotFound(_) => {
                ErrorKind::NotFound
            }
            Error::InsufficientFunds { .. } | Error::Constraint(_) => ErrorKind::Conflict,
            Error::Transient { .. } => ErrorKind::Transient,
            Error::Rollback { .. } => ErrorKind::RollbackFailure,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Storage(_)
            | Error::Serialization(_)
            | Error::Concurrency(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the whole operation
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn transient(reason: TransientReason, message: impl Into<String>) -> Self {
        Error::Transient {
            reason,
            message: message.into(),
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind as Rocks;

        let message = err.to_string();
        match err.kind() {
            Rocks::TimedOut => Error::transient(TransientReason::LockTimeout, message),
            Rocks::Busy if message.contains("Deadlock") => {
                Error::transient(TransientReason::Deadlock, message)
            }
            Rocks::Busy | Rocks::Aborted => Error::transient(TransientReason::Busy, message),
            Rocks::TryAgain => Error::transient(TransientReason::TryAgain, message),
            Rocks::Expired => Error::transient(TransientReason::Expired, message),
            _ => Error::Storage(message),
        }
    }
}
