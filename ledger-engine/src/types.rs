//! Core types for the ledger
//!
//! Money is always an `i64` count of the smallest currency unit. Records are
//! plain data: the only legal way balances and entries change together is
//! [`crate::engine::TransferEngine::transfer`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw row id
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Raw row id
            pub const fn get(self) -> i64 {
                self.0
            }

            /// Big-endian key bytes (ordered like the ids for positive values)
            pub fn to_key(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            /// Decode from key bytes
            pub fn from_key(bytes: &[u8]) -> Option<Self> {
                let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
                Some(Self(i64::from_be_bytes(raw)))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Account identifier (stable, orderable)
    AccountId
);
row_id!(
    /// Entry identifier
    EntryId
);
row_id!(
    /// Transfer identifier
    TransferId
);

/// Identity of one unit-of-work
///
/// Passed explicitly inside every transaction handle and recorded in tracing
/// fields; there is no ambient "current transaction".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(Uuid);

impl TxId {
    /// Fresh, time-ordered id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// Canadian Dollar
    CAD,
    /// Russian Ruble
    RUB,
}

impl Currency {
    /// Every supported currency
    pub const ALL: [Currency; 4] = [Currency::USD, Currency::EUR, Currency::CAD, Currency::RUB];

    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::CAD => "CAD",
            Currency::RUB => "RUB",
        }
    }
}

impl FromStr for Currency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::ALL
            .into_iter()
            .find(|c| c.code() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unsupported currency: {s}")))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A holder's balance in one currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID
    pub id: AccountId,

    /// Owner reference (username)
    pub owner: String,

    /// Balance in the smallest currency unit
    pub balance: i64,

    /// Currency
    pub currency: Currency,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Parameters for opening an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    /// Owner reference
    pub owner: String,

    /// Opening balance
    pub balance: i64,

    /// Currency
    pub currency: Currency,
}

impl NewAccount {
    /// Account with a zero opening balance
    pub fn new(owner: impl Into<String>, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            balance: 0,
            currency,
        }
    }

    /// Set the opening balance
    pub fn with_balance(mut self, balance: i64) -> Self {
        self.balance = balance;
        self
    }
}

/// Immutable ledger line: one signed delta on one account for one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Entry ID
    pub id: EntryId,

    /// Account the delta applies to
    pub account_id: AccountId,

    /// Transfer this entry belongs to
    pub transfer_id: TransferId,

    /// Negative for debit, positive for credit
    pub amount: i64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Parameters for recording an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewEntry {
    /// Account the delta applies to
    pub account_id: AccountId,

    /// Owning transfer
    pub transfer_id: TransferId,

    /// Signed amount
    pub amount: i64,
}

/// Record of one movement between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Transfer ID
    pub id: TransferId,

    /// Source account
    pub from_account_id: AccountId,

    /// Destination account
    pub to_account_id: AccountId,

    /// Always positive
    pub amount: i64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Parameters for recording a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewTransfer {
    /// Source account
    pub from_account_id: AccountId,

    /// Destination account
    pub to_account_id: AccountId,

    /// Amount moved
    pub amount: i64,
}

/// Request to move `amount` from one account to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Source account
    pub from_account_id: AccountId,

    /// Destination account
    pub to_account_id: AccountId,

    /// Amount to move, strictly positive
    pub amount: i64,
}

impl TransferRequest {
    /// Create a request
    pub fn new(from: AccountId, to: AccountId, amount: i64) -> Self {
        Self {
            from_account_id: from,
            to_account_id: to,
            amount,
        }
    }

    /// Reject requests the engine must never execute
    pub fn validate(&self) -> crate::Result<()> {
        if self.amount <= 0 {
            return Err(Error::InvalidInput(format!(
                "transfer amount must be positive, got {}",
                self.amount
            )));
        }

        if self.from_account_id == self.to_account_id {
            return Err(Error::InvalidInput(format!(
                "source and destination are the same account ({})",
                self.from_account_id
            )));
        }

        Ok(())
    }
}

/// Everything a committed transfer produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// The transfer record
    pub transfer: Transfer,

    /// Debit entry on the source account
    pub from_entry: Entry,

    /// Credit entry on the destination account
    pub to_entry: Entry,

    /// Source account after the debit
    pub from_account: Account,

    /// Destination account after the credit
    pub to_account: Account,
}

/// Pagination window for account listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Maximum rows returned
    pub limit: usize,

    /// Rows skipped
    pub offset: usize,
}

impl Page {
    /// Create a page window
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    /// Check the window is usable
    pub fn validate(&self) -> crate::Result<()> {
        if self.limit == 0 {
            return Err(Error::InvalidInput("page limit must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// Balance versus the running sum of an account's entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAudit {
    /// Audited account
    pub account_id: AccountId,

    /// Stored balance
    pub balance: i64,

    /// Sum of all entry amounts
    pub entry_total: i64,

    /// Number of entries
    pub entry_count: usize,
}

impl AccountAudit {
    /// Balance the account must have been opened with for the stored
    /// balance to equal the running sum of its entries; `None` if that
    /// balance is not representable
    pub fn implied_opening_balance(&self) -> Option<i64> {
        self.balance.checked_sub(self.entry_total)
    }
}
