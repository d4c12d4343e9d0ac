//! Ledger storage primitives
//!
//! [`LedgerStore`] is the durable store; [`LedgerTx`] is a transaction-scoped
//! handle on it. The transfer engine only ever mutates through a `LedgerTx`,
//! so every primitive invoked by one transfer shares one atomic unit.
//!
//! Two backends:
//!
//! - [`RocksStore`] - RocksDB pessimistic transactions, row locks via
//!   `get_for_update`
//! - [`MemoryStore`] - in-process double with the same locking and
//!   constraint behavior, for tests without a database on disk

use crate::{
    txn::Deadline,
    types::{
        Account, AccountId, Entry, EntryId, NewAccount, NewEntry, NewTransfer, Page, Transfer,
        TransferId, TxId,
    },
    Error, Result,
};

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

/// Durable store the ledger runs against
pub trait LedgerStore: Send + Sync {
    /// Transaction-scoped handle
    type Tx<'a>: LedgerTx
    where
        Self: 'a;

    /// Open a transaction; lock waits inside it never outlive `deadline`
    fn begin(&self, deadline: Deadline) -> Result<Self::Tx<'_>>;

    // Single-row accessors used outside any transfer

    /// Open an account
    fn create_account(&self, account: &NewAccount) -> Result<Account>;

    /// Get account by ID (committed state)
    fn get_account(&self, id: AccountId) -> Result<Account>;

    /// List accounts ordered by ID
    fn list_accounts(&self, page: Page) -> Result<Vec<Account>>;

    /// Get entry by ID
    fn get_entry(&self, id: EntryId) -> Result<Entry>;

    /// Get transfer by ID
    fn get_transfer(&self, id: TransferId) -> Result<Transfer>;

    /// All entries recorded against an account, oldest first
    fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>>;

    /// All transfers touching an account (either side), oldest first
    fn list_transfers(&self, account_id: AccountId) -> Result<Vec<Transfer>>;
}

/// Storage operations inside one atomic unit
///
/// Dropping a handle that was neither committed nor rolled back discards its
/// writes and releases its locks.
pub trait LedgerTx {
    /// Identity of this unit-of-work
    fn id(&self) -> TxId;

    /// Read an account as this transaction sees it
    fn get_account(&mut self, id: AccountId) -> Result<Account>;

    /// Insert a transfer row
    fn create_transfer(&mut self, transfer: &NewTransfer) -> Result<Transfer>;

    /// Insert an entry row
    fn create_entry(&mut self, entry: &NewEntry) -> Result<Entry>;

    /// `balance = balance + delta` on one row, holding its exclusive lock
    /// until the transaction ends
    fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account>;

    /// Credit `amount` (positive) to an account
    fn increment_balance(&mut self, id: AccountId, amount: i64) -> Result<Account> {
        self.add_account_balance(id, amount)
    }

    /// Debit `amount` (positive) from an account
    fn decrement_balance(&mut self, id: AccountId, amount: i64) -> Result<Account> {
        let delta = amount
            .checked_neg()
            .ok_or_else(|| Error::Constraint(format!("cannot debit {}", amount)))?;
        self.add_account_balance(id, delta)
    }

    /// Make every write durable and visible
    fn commit(self) -> Result<()>
    where
        Self: Sized;

    /// Discard every write
    fn rollback(self) -> Result<()>
    where
        Self: Sized;
}

/// Row-level checks shared by both backends (the equivalent of SQL CHECK
/// constraints on the accounts, transfers and entries tables)
pub(crate) fn check_new_account(
    account: &NewAccount,
    policy: crate::config::OverdraftPolicy,
) -> Result<()> {
    if !policy.permits(account.balance, account.balance) {
        return Err(Error::Constraint(format!(
            "opening balance {} for {} is negative",
            account.balance, account.owner
        )));
    }
    Ok(())
}

pub(crate) fn check_new_transfer(transfer: &NewTransfer) -> Result<()> {
    if transfer.amount <= 0 {
        return Err(Error::Constraint(format!(
            "transfer amount must be positive, got {}",
            transfer.amount
        )));
    }
    if transfer.from_account_id == transfer.to_account_id {
        return Err(Error::Constraint(format!(
            "transfer from account {} to itself",
            transfer.from_account_id
        )));
    }
    Ok(())
}

pub(crate) fn check_new_entry(entry: &NewEntry) -> Result<()> {
    if entry.amount == 0 {
        return Err(Error::Constraint(format!(
            "zero entry for account {}",
            entry.account_id
        )));
    }
    Ok(())
}

/// New balance after `delta`, honoring overflow and the overdraft policy
pub(crate) fn apply_delta(
    account: &Account,
    delta: i64,
    policy: crate::config::OverdraftPolicy,
) -> Result<i64> {
    let balance = account.balance.checked_add(delta).ok_or_else(|| {
        Error::Constraint(format!("balance overflow on account {}", account.id))
    })?;

    if !policy.permits(balance, delta) {
        return Err(Error::InsufficientFunds {
            account_id: account.id,
            balance: account.balance,
            amount: delta.unsigned_abs().min(i64::MAX as u64) as i64,
        });
    }

    Ok(balance)
}
