//! Shared fixtures for integration tests

#![allow(dead_code)]

use ledger_engine::{
    storage::{LedgerStore, LedgerTx},
    types::{
        Account, AccountId, Currency, Entry, EntryId, NewAccount, NewEntry, NewTransfer, Page,
        Transfer, TransferId, TxId,
    },
    Config, Deadline, Error, MemoryStore, Result, RocksStore,
};
use parking_lot::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// Config with a short lock timeout so failing tests fail fast
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.transactions.lock_timeout_ms = 2_000;
    config.transactions.default_deadline_ms = None;
    config
}

pub fn memory_store() -> MemoryStore {
    MemoryStore::new(&test_config())
}

/// RocksDB store in a temporary directory; keep the `TempDir` alive
pub fn rocks_store() -> (RocksStore, TempDir) {
    rocks_store_with(test_config())
}

pub fn rocks_store_with(mut config: Config) -> (RocksStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    config.data_dir = dir.path().to_path_buf();
    (RocksStore::open(&config).unwrap(), dir)
}

pub fn open_account<S: LedgerStore>(store: &S, owner: &str, balance: i64) -> AccountId {
    store
        .create_account(&NewAccount::new(owner, Currency::USD).with_balance(balance))
        .unwrap()
        .id
}

pub fn balance<S: LedgerStore>(store: &S, id: AccountId) -> i64 {
    store.get_account(id).unwrap().balance
}

pub fn entry_sum<S: LedgerStore>(store: &S, id: AccountId) -> i64 {
    store.list_entries(id).unwrap().iter().map(|e| e.amount).sum()
}

/// Where an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `create_transfer`
    TransferRow,
    /// The n-th `create_entry` call (0 = debit, 1 = credit)
    Entry(usize),
    /// The n-th balance update, in lock order
    Balance(usize),
    /// `commit`
    Commit,
    /// `rollback` (the inner transaction is still discarded)
    Rollback,
}

/// Wraps a store and fails one chosen operation of the next transaction
#[derive(Debug)]
pub struct FaultyStore<S> {
    inner: S,
    armed: Mutex<Vec<Fault>>,
}

impl<S: LedgerStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            armed: Mutex::new(Vec::new()),
        }
    }

    /// Faults that fire in the next transaction only
    pub fn arm(&self, faults: &[Fault]) {
        *self.armed.lock() = faults.to_vec();
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

fn injected(what: &str) -> Error {
    Error::Storage(format!("injected failure: {}", what))
}

impl<S: LedgerStore> LedgerStore for FaultyStore<S> {
    type Tx<'a> = FaultyTx<'a, S> where Self: 'a;

    fn begin(&self, deadline: Deadline) -> Result<Self::Tx<'_>> {
        let faults = std::mem::take(&mut *self.armed.lock());
        Ok(FaultyTx {
            inner: self.inner.begin(deadline)?,
            faults,
            entries: 0,
            balances: 0,
        })
    }

    fn create_account(&self, account: &NewAccount) -> Result<Account> {
        self.inner.create_account(account)
    }

    fn get_account(&self, id: AccountId) -> Result<Account> {
        self.inner.get_account(id)
    }

    fn list_accounts(&self, page: Page) -> Result<Vec<Account>> {
        self.inner.list_accounts(page)
    }

    fn get_entry(&self, id: EntryId) -> Result<Entry> {
        self.inner.get_entry(id)
    }

    fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.inner.get_transfer(id)
    }

    fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>> {
        self.inner.list_entries(account_id)
    }

    fn list_transfers(&self, account_id: AccountId) -> Result<Vec<Transfer>> {
        self.inner.list_transfers(account_id)
    }
}

pub struct FaultyTx<'a, S: LedgerStore + 'a> {
    inner: S::Tx<'a>,
    faults: Vec<Fault>,
    entries: usize,
    balances: usize,
}

impl<'a, S: LedgerStore + 'a> FaultyTx<'a, S> {
    fn fires(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }
}

impl<'a, S: LedgerStore + 'a> LedgerTx for FaultyTx<'a, S> {
    fn id(&self) -> TxId {
        self.inner.id()
    }

    fn get_account(&mut self, id: AccountId) -> Result<Account> {
        self.inner.get_account(id)
    }

    fn create_transfer(&mut self, transfer: &NewTransfer) -> Result<Transfer> {
        if self.fires(Fault::TransferRow) {
            return Err(injected("transfer row"));
        }
        self.inner.create_transfer(transfer)
    }

    fn create_entry(&mut self, entry: &NewEntry) -> Result<Entry> {
        let n = self.entries;
        self.entries += 1;
        if self.fires(Fault::Entry(n)) {
            return Err(injected("entry"));
        }
        self.inner.create_entry(entry)
    }

    fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        let n = self.balances;
        self.balances += 1;
        if self.fires(Fault::Balance(n)) {
            return Err(injected("balance update"));
        }
        self.inner.add_account_balance(id, delta)
    }

    fn commit(self) -> Result<()> {
        if self.fires(Fault::Commit) {
            self.inner.rollback()?;
            return Err(injected("commit"));
        }
        self.inner.commit()
    }

    fn rollback(self) -> Result<()> {
        let fail = self.fires(Fault::Rollback);
        self.inner.rollback()?;
        if fail {
            return Err(injected("rollback"));
        }
        Ok(())
    }
}

/// Sleep long enough for another thread to reach a lock wait
pub fn settle() {
    std::thread::sleep(Duration::from_millis(50));
}
