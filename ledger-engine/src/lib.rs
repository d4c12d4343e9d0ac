//! Ledger Engine
//!
//! Double-entry transaction engine over a transactional key-value store.
//!
//! # Architecture
//!
//! - **Storage**: `LedgerStore` / `LedgerTx` traits with RocksDB and in-memory backends
//! - **Unit of Work**: `execute_tx` commits on success, rolls back on any error
//! - **Transfer Engine**: one atomic transfer = transfer row + two entries + two balance updates
//! - **Async Facade**: `Ledger` runs transfers on the blocking pool under a deadline
//!
//! # Invariants
//!
//! - Money conservation: every transfer posts `-amount` and `+amount`
//! - Balance = opening balance + Σ(entries) for every account
//! - All-or-nothing: a failed transfer leaves no rows and no balance change
//! - Row locks are always taken lower account id first

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod txn;
pub mod types;

// Re-exports
pub use config::{Config, OverdraftPolicy};
pub use engine::{lock_order, LockOrder, TransferEngine};
pub use error::{Error, ErrorKind, Result, TransientReason};
pub use ledger::Ledger;
pub use metrics::LedgerMetrics;
pub use storage::{LedgerStore, LedgerTx, MemoryStore, RocksStore};
pub use txn::{execute_tx, CancelHandle, Deadline};
pub use types::{
    Account, AccountId, Currency, Entry, EntryId, NewAccount, Transfer, TransferId,
    TransferRequest, TransferResult,
};
