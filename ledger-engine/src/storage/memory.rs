//! In-memory store
//!
//! Deterministic stand-in for the durable store. Committed rows live behind
//! one `RwLock`; each transaction stages its writes privately and applies
//! them on commit. Balance updates take an exclusive per-account row lock
//! that is held until the transaction ends, exactly like the RocksDB
//! backend, so lock ordering matters here too: two transactions locking the
//! same pair in opposite orders wait on each other until the lock timeout.

use super::{
    apply_delta, check_new_account, check_new_entry, check_new_transfer, LedgerStore, LedgerTx,
};
use crate::{
    config::{Config, OverdraftPolicy},
    error::TransientReason,
    txn::Deadline,
    types::{
        Account, AccountId, Entry, EntryId, NewAccount, NewEntry, NewTransfer, Page, Transfer,
        TransferId, TxId,
    },
    Error, Result,
};
use chrono::Utc;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

/// Exclusive row locks keyed by account
#[derive(Debug, Default)]
struct RowLocks {
    held: Mutex<HashMap<AccountId, TxId>>,
    released: Condvar,
}

/// Longest single sleep while a cancellable caller waits for a row lock
const CANCEL_POLL: Duration = Duration::from_millis(10);

impl RowLocks {
    fn acquire(
        &self,
        account_id: AccountId,
        owner: TxId,
        wait: Duration,
        deadline: &Deadline,
    ) -> Result<()> {
        let give_up = Instant::now() + wait;
        let mut held = self.held.lock();

        loop {
            match held.get(&account_id) {
                None => {
                    held.insert(account_id, owner);
                    return Ok(());
                }
                Some(holder) if *holder == owner => return Ok(()),
                Some(holder) => {
                    let holder = *holder;
                    if deadline.is_cancelled() {
                        return Err(Error::Cancelled(format!(
                            "call abandoned while waiting for lock on account {}",
                            account_id
                        )));
                    }

                    let wake = if deadline.is_cancellable() {
                        give_up.min(Instant::now() + CANCEL_POLL)
                    } else {
                        give_up
                    };
                    self.released.wait_until(&mut held, wake);
                    if Instant::now() >= give_up && held.contains_key(&account_id) {
                        return Err(Error::transient(
                            TransientReason::LockTimeout,
                            format!(
                                "lock on account {} held by {} for over {:?}",
                                account_id, holder, wait
                            ),
                        ));
                    }
                }
            }
        }
    }

    fn release(&self, owner: TxId, accounts: &[AccountId]) {
        if accounts.is_empty() {
            return;
        }

        let mut held = self.held.lock();
        for account_id in accounts {
            if held.get(account_id) == Some(&owner) {
                held.remove(account_id);
            }
        }
        drop(held);
        self.released.notify_all();
    }
}

/// In-memory [`LedgerStore`]
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    locks: RowLocks,
    next_account_id: AtomicI64,
    next_entry_id: AtomicI64,
    next_transfer_id: AtomicI64,
    lock_timeout: Duration,
    overdraft: OverdraftPolicy,
}

impl MemoryStore {
    /// Empty store using the configured lock timeout and overdraft policy
    pub fn new(config: &Config) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            locks: RowLocks::default(),
            next_account_id: AtomicI64::new(1),
            next_entry_id: AtomicI64::new(1),
            next_transfer_id: AtomicI64::new(1),
            lock_timeout: config.transactions.lock_timeout(),
            overdraft: config.overdraft,
        }
    }

    /// Number of committed (entries, transfers) rows
    pub fn row_counts(&self) -> (usize, usize) {
        let tables = self.tables.read();
        (tables.entries.len(), tables.transfers.len())
    }

    fn committed_account(&self, id: AccountId) -> Result<Account> {
        self.tables
            .read()
            .accounts
            .get(&id)
            .cloned()
            .ok_or(Error::AccountNotFound(id))
    }
}

impl LedgerStore for MemoryStore {
    type Tx<'a> = MemoryTx<'a>;

    fn begin(&self, deadline: Deadline) -> Result<MemoryTx<'_>> {
        Ok(MemoryTx {
            store: self,
            id: TxId::new(),
            deadline,
            transfers: Vec::new(),
            entries: Vec::new(),
            balances: BTreeMap::new(),
            locked: Vec::new(),
            finished: false,
        })
    }

    fn create_account(&self, account: &NewAccount) -> Result<Account> {
        check_new_account(account, self.overdraft)?;

        let row = Account {
            id: AccountId::new(self.next_account_id.fetch_add(1, Ordering::SeqCst)),
            owner: account.owner.clone(),
            balance: account.balance,
            currency: account.currency,
            created_at: Utc::now(),
        };

        self.tables.write().accounts.insert(row.id, row.clone());
        Ok(row)
    }

    fn get_account(&self, id: AccountId) -> Result<Account> {
        self.committed_account(id)
    }

    fn list_accounts(&self, page: Page) -> Result<Vec<Account>> {
        page.validate()?;
        Ok(self
            .tables
            .read()
            .accounts
            .values()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    fn get_entry(&self, id: EntryId) -> Result<Entry> {
        self.tables
            .read()
            .entries
            .get(&id)
            .cloned()
            .ok_or(Error::EntryNotFound(id))
    }

    fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.tables
            .read()
            .transfers
            .get(&id)
            .cloned()
            .ok_or(Error::TransferNotFound(id))
    }

    fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>> {
        let tables = self.tables.read();
        if !tables.accounts.contains_key(&account_id) {
            return Err(Error::AccountNotFound(account_id));
        }
        Ok(tables
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }

    fn list_transfers(&self, account_id: AccountId) -> Result<Vec<Transfer>> {
        let tables = self.tables.read();
        if !tables.accounts.contains_key(&account_id) {
            return Err(Error::AccountNotFound(account_id));
        }
        Ok(tables
            .transfers
            .values()
            .filter(|t| t.from_account_id == account_id || t.to_account_id == account_id)
            .cloned()
            .collect())
    }
}

/// Transaction on a [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryTx<'a> {
    store: &'a MemoryStore,
    id: TxId,
    deadline: Deadline,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
    balances: BTreeMap<AccountId, Account>,
    locked: Vec<AccountId>,
    finished: bool,
}

impl MemoryTx<'_> {
    fn finish(&mut self) {
        self.finished = true;
        self.store.locks.release(self.id, &self.locked);
        self.locked.clear();
    }
}

impl LedgerTx for MemoryTx<'_> {
    fn id(&self) -> TxId {
        self.id
    }

    fn get_account(&mut self, id: AccountId) -> Result<Account> {
        match self.balances.get(&id) {
            Some(account) => Ok(account.clone()),
            None => self.store.committed_account(id),
        }
    }

    fn create_transfer(&mut self, transfer: &NewTransfer) -> Result<Transfer> {
        check_new_transfer(transfer)?;
        self.store.committed_account(transfer.from_account_id)?;
        self.store.committed_account(transfer.to_account_id)?;

        let row = Transfer {
            id: TransferId::new(self.store.next_transfer_id.fetch_add(1, Ordering::SeqCst)),
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
            amount: transfer.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(row.clone());
        Ok(row)
    }

    fn create_entry(&mut self, entry: &NewEntry) -> Result<Entry> {
        check_new_entry(entry)?;
        self.store.committed_account(entry.account_id)?;

        let row = Entry {
            id: EntryId::new(self.store.next_entry_id.fetch_add(1, Ordering::SeqCst)),
            account_id: entry.account_id,
            transfer_id: entry.transfer_id,
            amount: entry.amount,
            created_at: Utc::now(),
        };
        self.entries.push(row.clone());
        Ok(row)
    }

    fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        self.store.committed_account(id)?;

        let wait = self.deadline.cap(self.store.lock_timeout);
        self.store.locks.acquire(id, self.id, wait, &self.deadline)?;
        if !self.locked.contains(&id) {
            self.locked.push(id);
        }

        // Read after the lock: no other writer can commit this row until we end
        let current = self.get_account(id)?;
        let balance = apply_delta(&current, delta, self.store.overdraft)?;

        let updated = Account { balance, ..current };
        self.balances.insert(id, updated.clone());
        Ok(updated)
    }

    fn commit(mut self) -> Result<()> {
        {
            let mut tables = self.store.tables.write();
            for transfer in self.transfers.drain(..) {
                tables.transfers.insert(transfer.id, transfer);
            }
            for entry in self.entries.drain(..) {
                tables.entries.insert(entry.id, entry);
            }
            for (id, account) in std::mem::take(&mut self.balances) {
                tables.accounts.insert(id, account);
            }
        }

        self.finish();
        Ok(())
    }

    fn rollback(mut self) -> Result<()> {
        self.finish();
        Ok(())
    }
}

impl Drop for MemoryTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish();
        }
    }
}
