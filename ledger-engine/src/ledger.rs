//! Async ledger facade
//!
//! Transfers are blocking: a call holds its row locks for the length of its
//! transaction. [`Ledger`] runs each one on tokio's blocking pool and hands
//! the deadline into the worker, so a timed-out transfer is rolled back by
//! the worker itself rather than abandoned mid-transaction.
//!
//! Dropping a transfer future (for instance under `tokio::time::timeout`)
//! cancels the worker's deadline. A worker that has not committed yet rolls
//! back instead of committing on behalf of a caller that stopped listening.
//!
//! # Example
//!
//! ```no_run
//! use ledger_engine::{Config, Ledger};
//! use ledger_engine::types::{Currency, NewAccount, TransferRequest};
//!
//! #[tokio::main]
//! async fn main() -> ledger_engine::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let alice = ledger.create_account(NewAccount::new("alice", Currency::USD).with_balance(100)).await?;
//!     let bob = ledger.create_account(NewAccount::new("bob", Currency::USD)).await?;
//!
//!     let result = ledger.transfer(TransferRequest::new(alice.id, bob.id, 30)).await?;
//!     assert_eq!(result.from_account.balance, 70);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    engine::TransferEngine,
    metrics::LedgerMetrics,
    storage::{LedgerStore, MemoryStore, RocksStore},
    txn::{CancelHandle, Deadline},
    types::{Account, AccountAudit, AccountId, Entry, NewAccount, Page, TransferRequest, TransferResult},
    Config, Error, Result,
};
use std::sync::Arc;
use std::time::Duration;

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger<S> {
    engine: TransferEngine<S>,
    default_deadline: Option<Duration>,
}

impl Ledger<RocksStore> {
    /// Open the RocksDB-backed ledger at `config.data_dir`
    pub async fn open(config: Config) -> Result<Self> {
        let store = {
            let config = config.clone();
            tokio::task::spawn_blocking(move || RocksStore::open(&config))
                .await
                .map_err(|e| Error::Concurrency(format!("open task failed: {}", e)))??
        };

        Self::new(store, &config)
    }
}

impl Ledger<MemoryStore> {
    /// Ledger over a fresh in-memory store
    pub fn in_memory(config: &Config) -> Result<Self> {
        Self::new(MemoryStore::new(config), config)
    }
}

impl<S: LedgerStore + 'static> Ledger<S> {
    /// Ledger over any store
    pub fn new(store: S, config: &Config) -> Result<Self> {
        let metrics = LedgerMetrics::new()
            .map_err(|e| Error::Config(format!("metrics registration failed: {}", e)))?;

        tracing::info!(
            service = %config.service_name,
            overdraft = ?config.overdraft,
            lock_timeout_ms = config.transactions.lock_timeout_ms,
            "Ledger ready"
        );

        Ok(Self {
            engine: TransferEngine::new(Arc::new(store)).with_metrics(metrics),
            default_deadline: config.transactions.default_deadline(),
        })
    }

    /// Synchronous engine
    pub fn engine(&self) -> &TransferEngine<S> {
        &self.engine
    }

    /// Transfer metrics
    pub fn metrics(&self) -> Option<&LedgerMetrics> {
        self.engine.metrics()
    }

    /// Transfer under the configured default deadline
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferResult> {
        self.transfer_within(request, Deadline::from_timeout(self.default_deadline))
            .await
    }

    /// Transfer that must commit within `timeout`
    pub async fn transfer_with_timeout(
        &self,
        request: TransferRequest,
        timeout: Duration,
    ) -> Result<TransferResult> {
        self.transfer_within(request, Deadline::after(timeout)).await
    }

    async fn transfer_within(
        &self,
        request: TransferRequest,
        deadline: Deadline,
    ) -> Result<TransferResult> {
        let cancel = CancelHandle::new();
        let _guard = CancelOnDrop(cancel.clone());
        let deadline = deadline.with_cancel(cancel);

        let engine = self.engine.clone();
        self.run_blocking(move || engine.transfer_with_deadline(&request, deadline))
            .await
    }

    /// Open an account
    pub async fn create_account(&self, account: NewAccount) -> Result<Account> {
        let store = Arc::clone(self.engine.store());
        self.run_blocking(move || store.create_account(&account)).await
    }

    /// Get account by ID
    pub async fn get_account(&self, id: AccountId) -> Result<Account> {
        let store = Arc::clone(self.engine.store());
        self.run_blocking(move || store.get_account(id)).await
    }

    /// List accounts
    pub async fn list_accounts(&self, page: Page) -> Result<Vec<Account>> {
        let store = Arc::clone(self.engine.store());
        self.run_blocking(move || store.list_accounts(page)).await
    }

    /// Entries recorded against an account
    pub async fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>> {
        let store = Arc::clone(self.engine.store());
        self.run_blocking(move || store.list_entries(account_id)).await
    }

    /// Balance versus sum of entries
    pub async fn audit_account(&self, account_id: AccountId) -> Result<AccountAudit> {
        let engine = self.engine.clone();
        self.run_blocking(move || engine.audit_account(account_id))
            .await
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| Error::Concurrency(format!("ledger worker failed: {}", e)))?
    }
}

/// Cancels the worker's deadline when the calling future goes away
struct CancelOnDrop(CancelHandle);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
