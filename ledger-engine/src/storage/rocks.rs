//! Storage layer using RocksDB
//!
//! Opened as a `TransactionDB` so every ledger transaction is a pessimistic
//! RocksDB transaction: `get_for_update` takes an exclusive lock on a row
//! that is held until commit or rollback.
//!
//! # Column Families
//!
//! - `accounts` - Account rows (key: account_id)
//! - `entries` - Entry rows (key: entry_id)
//! - `transfers` - Transfer rows (key: transfer_id)
//! - `account_entries` - Index (key: account_id || entry_id)
//! - `account_transfers` - Index (key: account_id || transfer_id)

use super::{
    apply_delta, check_new_account, check_new_entry, check_new_transfer, LedgerStore, LedgerTx,
};
use crate::{
    config::{Config, OverdraftPolicy},
    txn::Deadline,
    types::{
        Account, AccountId, Entry, EntryId, NewAccount, NewEntry, NewTransfer, Page, Transfer,
        TransferId, TxId,
    },
    Error, Result,
};
use chrono::Utc;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, Transaction, TransactionDB,
    TransactionDBOptions, TransactionOptions, WriteOptions,
};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_ENTRIES: &str = "entries";
const CF_TRANSFERS: &str = "transfers";
const CF_ACCOUNT_ENTRIES: &str = "account_entries";
const CF_ACCOUNT_TRANSFERS: &str = "account_transfers";

/// Shortest lock wait handed to RocksDB; zero would mean "use the default"
const MIN_LOCK_WAIT_MS: i64 = 1;

/// Lock wait in whole milliseconds, rounded up so it never ends early
fn lock_wait_millis(wait: Duration) -> i64 {
    let millis = wait.as_micros().div_ceil(1_000);
    i64::try_from(millis).unwrap_or(i64::MAX)
}

/// RocksDB-backed [`LedgerStore`]
pub struct RocksStore {
    db: TransactionDB,
    path: PathBuf,
    next_account_id: AtomicI64,
    next_entry_id: AtomicI64,
    next_transfer_id: AtomicI64,
    lock_timeout: Duration,
    deadlock_detect: bool,
    overdraft: OverdraftPolicy,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.path)
            .field("lock_timeout", &self.lock_timeout)
            .field("overdraft", &self.overdraft)
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let mut txn_db_opts = TransactionDBOptions::default();
        let lock_timeout_ms = lock_wait_millis(config.transactions.lock_timeout());
        txn_db_opts.set_default_lock_timeout(lock_timeout_ms);
        txn_db_opts.set_txn_lock_timeout(lock_timeout_ms);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_TRANSFERS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_ACCOUNT_ENTRIES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_ACCOUNT_TRANSFERS, Self::cf_options_indices()),
        ];

        let db: TransactionDB =
            TransactionDB::open_cf_descriptors(&db_opts, &txn_db_opts, path, cf_descriptors)?;

        let mut store = Self {
            db,
            path: path.clone(),
            next_account_id: AtomicI64::new(1),
            next_entry_id: AtomicI64::new(1),
            next_transfer_id: AtomicI64::new(1),
            lock_timeout: config.transactions.lock_timeout(),
            deadlock_detect: config.transactions.deadlock_detect,
            overdraft: config.overdraft,
        };

        // Sequences resume after the highest id on disk
        let last_account = store.last_id(CF_ACCOUNTS, AccountId::from_key)?;
        let last_entry = store.last_id(CF_ENTRIES, EntryId::from_key)?;
        let last_transfer = store.last_id(CF_TRANSFERS, TransferId::from_key)?;
        store.next_account_id = AtomicI64::new(last_account.map_or(0, AccountId::get) + 1);
        store.next_entry_id = AtomicI64::new(last_entry.map_or(0, EntryId::get) + 1);
        store.next_transfer_id = AtomicI64::new(last_transfer.map_or(0, TransferId::get) + 1);

        tracing::info!(
            path = ?path,
            next_account_id = store.next_account_id.load(Ordering::SeqCst),
            next_transfer_id = store.next_transfer_id.load(Ordering::SeqCst),
            "Opened RocksDB ledger store"
        );

        Ok(store)
    }

    fn cf_options_rows() -> Options {
        let mut opts = Options::default();
        // Rows are read on every transfer, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Index scans are prefix scans by account
        opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(8));
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn last_id<I>(&self, cf_name: &str, decode: fn(&[u8]) -> Option<I>) -> Result<Option<I>> {
        let cf = self.cf_handle(cf_name)?;
        let mut iter = self.db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                decode(&key)
                    .map(Some)
                    .ok_or_else(|| Error::Storage(format!("Malformed key in {}", cf_name)))
            }
            None => Ok(None),
        }
    }

    fn get_row<T: DeserializeOwned>(&self, cf_name: &str, key: [u8; 8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn index_rows<T: DeserializeOwned>(
        &self,
        index_cf: &str,
        rows_cf: &str,
        account_id: AccountId,
    ) -> Result<Vec<T>> {
        if self.get_row::<Account>(CF_ACCOUNTS, account_id.to_key())?.is_none() {
            return Err(Error::AccountNotFound(account_id));
        }

        let cf = self.cf_handle(index_cf)?;
        let prefix = account_id.to_key();
        let mut rows = Vec::new();

        for item in self.db.prefix_iterator_cf(cf, prefix) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let row_key: [u8; 8] = key
                .get(8..16)
                .and_then(|k| k.try_into().ok())
                .ok_or_else(|| Error::Storage(format!("Malformed index key in {}", index_cf)))?;
            let row = self
                .get_row(rows_cf, row_key)?
                .ok_or_else(|| Error::Storage(format!("Dangling index entry in {}", index_cf)))?;
            rows.push(row);
        }

        Ok(rows)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

fn index_key(account_id: AccountId, row_key: [u8; 8]) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&account_id.to_key());
    key[8..].copy_from_slice(&row_key);
    key
}

impl LedgerStore for RocksStore {
    type Tx<'a> = RocksTx<'a>;

    fn begin(&self, deadline: Deadline) -> Result<RocksTx<'_>> {
        let wait = deadline.cap(self.lock_timeout);
        let wait_ms = lock_wait_millis(wait).max(MIN_LOCK_WAIT_MS);

        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_lock_timeout(wait_ms);
        txn_opts.set_deadlock_detect(self.deadlock_detect);

        let txn = self.db.transaction_opt(&WriteOptions::default(), &txn_opts);
        let id = TxId::new();
        tracing::trace!(tx_id = %id, lock_timeout_ms = wait_ms, "RocksDB transaction opened");

        Ok(RocksTx {
            store: self,
            txn,
            id,
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

        let cf = self.cf_handle(CF_ACCOUNTS)?;
        self.db.put_cf(cf, row.id.to_key(), bincode::serialize(&row)?)?;

        tracing::debug!(account_id = %row.id, owner = %row.owner, "Account created");
        Ok(row)
    }

    fn get_account(&self, id: AccountId) -> Result<Account> {
        self.get_row(CF_ACCOUNTS, id.to_key())?
            .ok_or(Error::AccountNotFound(id))
    }

    fn list_accounts(&self, page: Page) -> Result<Vec<Account>> {
        page.validate()?;
        let cf = self.cf_handle(CF_ACCOUNTS)?;

        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .skip(page.offset)
            .take(page.limit)
            .map(|item| {
                let (_, value) = item?;
                Ok(bincode::deserialize(&value)?)
            })
            .collect()
    }

    fn get_entry(&self, id: EntryId) -> Result<Entry> {
        self.get_row(CF_ENTRIES, id.to_key())?
            .ok_or(Error::EntryNotFound(id))
    }

    fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.get_row(CF_TRANSFERS, id.to_key())?
            .ok_or(Error::TransferNotFound(id))
    }

    fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>> {
        self.index_rows(CF_ACCOUNT_ENTRIES, CF_ENTRIES, account_id)
    }

    fn list_transfers(&self, account_id: AccountId) -> Result<Vec<Transfer>> {
        self.index_rows(CF_ACCOUNT_TRANSFERS, CF_TRANSFERS, account_id)
    }
}

/// Pessimistic RocksDB transaction
///
/// Dropping it without commit rolls back and releases its locks.
pub struct RocksTx<'a> {
    store: &'a RocksStore,
    txn: Transaction<'a, TransactionDB>,
    id: TxId,
}

impl std::fmt::Debug for RocksTx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksTx").field("id", &self.id).finish()
    }
}

impl RocksTx<'_> {
    fn read_account(&self, id: AccountId) -> Result<Account> {
        let cf = self.store.cf_handle(CF_ACCOUNTS)?;
        let bytes = self
            .txn
            .get_cf(cf, id.to_key())?
            .ok_or(Error::AccountNotFound(id))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    fn put_row<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], row: &T) -> Result<()> {
        let cf = self.store.cf_handle(cf_name)?;
        self.txn.put_cf(cf, key, bincode::serialize(row)?)?;
        Ok(())
    }
}

impl LedgerTx for RocksTx<'_> {
    fn id(&self) -> TxId {
        self.id
    }

    fn get_account(&mut self, id: AccountId) -> Result<Account> {
        self.read_account(id)
    }

    fn create_transfer(&mut self, transfer: &NewTransfer) -> Result<Transfer> {
        check_new_transfer(transfer)?;
        self.read_account(transfer.from_account_id)?;
        self.read_account(transfer.to_account_id)?;

        let row = Transfer {
            id: TransferId::new(self.store.next_transfer_id.fetch_add(1, Ordering::SeqCst)),
            from_account_id: transfer.from_account_id,
            to_account_id: transfer.to_account_id,
            amount: transfer.amount,
            created_at: Utc::now(),
        };

        let key = row.id.to_key();
        self.put_row(CF_TRANSFERS, &key, &row)?;

        let index = self.store.cf_handle(CF_ACCOUNT_TRANSFERS)?;
        self.txn.put_cf(index, index_key(row.from_account_id, key), b"")?;
        self.txn.put_cf(index, index_key(row.to_account_id, key), b"")?;

        tracing::trace!(tx_id = %self.id, transfer_id = %row.id, "Transfer row staged");
        Ok(row)
    }

    fn create_entry(&mut self, entry: &NewEntry) -> Result<Entry> {
        check_new_entry(entry)?;
        self.read_account(entry.account_id)?;

        let row = Entry {
            id: EntryId::new(self.store.next_entry_id.fetch_add(1, Ordering::SeqCst)),
            account_id: entry.account_id,
            transfer_id: entry.transfer_id,
            amount: entry.amount,
            created_at: Utc::now(),
        };

        let key = row.id.to_key();
        self.put_row(CF_ENTRIES, &key, &row)?;

        let index = self.store.cf_handle(CF_ACCOUNT_ENTRIES)?;
        self.txn.put_cf(index, index_key(row.account_id, key), b"")?;

        Ok(row)
    }

    fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        let cf = self.store.cf_handle(CF_ACCOUNTS)?;
        let key = id.to_key();

        // Exclusive row lock, held until commit/rollback
        let bytes = self
            .txn
            .get_for_update_cf(cf, key, true)?
            .ok_or(Error::AccountNotFound(id))?;
        let current: Account = bincode::deserialize(&bytes)?;

        let balance = apply_delta(&current, delta, self.store.overdraft)?;
        let updated = Account { balance, ..current };
        self.txn.put_cf(cf, key, bincode::serialize(&updated)?)?;

        Ok(updated)
    }

    fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }

    fn rollback(self) -> Result<()> {
        self.txn.rollback()?;
        Ok(())
    }
}
