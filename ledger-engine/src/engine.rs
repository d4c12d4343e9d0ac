//! Transfer engine
//!
//! The single authorized path for moving value between two accounts. One
//! call is one atomic unit:
//!
//! 1. transfer row
//! 2. debit entry on the source (`-amount`)
//! 3. credit entry on the destination (`+amount`)
//! 4. both balance updates, lower account id first
//!
//! Step 4's ordering is what keeps concurrent transfers deadlock-free: any
//! two transfers touching the same pair of accounts request the two row
//! locks in the same order, whichever direction they move money.
//!
//! The engine keeps no state between calls, caches no balances and never
//! retries. A transient failure leaves nothing behind, so the caller may
//! retry the whole call; the engine cannot know whether that is safe for a
//! given request.

use crate::{
    metrics::LedgerMetrics,
    storage::{LedgerStore, LedgerTx},
    txn::{execute_tx, Deadline},
    types::{AccountAudit, AccountId, NewEntry, NewTransfer, TransferRequest, TransferResult},
    Error, Result,
};
use std::sync::Arc;
use std::time::Instant;

/// Order in which a transfer updates its two balances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOrder {
    /// Source id is lower: debit first
    SourceFirst,
    /// Destination id is lower: credit first
    DestinationFirst,
}

/// Lower account id is always locked first
pub fn lock_order(source: AccountId, destination: AccountId) -> LockOrder {
    if source <= destination {
        LockOrder::SourceFirst
    } else {
        LockOrder::DestinationFirst
    }
}

/// Executes transfers against a [`LedgerStore`]
#[derive(Debug)]
pub struct TransferEngine<S> {
    store: Arc<S>,
    metrics: Option<LedgerMetrics>,
}

impl<S: LedgerStore> TransferEngine<S> {
    /// Engine over a shared store
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    /// Record outcomes in `metrics`
    pub fn with_metrics(mut self, metrics: LedgerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Metrics, if attached
    pub fn metrics(&self) -> Option<&LedgerMetrics> {
        self.metrics.as_ref()
    }

    /// Move `request.amount` from source to destination, without a deadline
    pub fn transfer(&self, request: &TransferRequest) -> Result<TransferResult> {
        self.transfer_with_deadline(request, Deadline::none())
    }

    /// Move `request.amount` from source to destination
    ///
    /// Either every record and both balance changes are committed, or
    /// nothing is. If `deadline` passes or its cancel handle fires before
    /// commit, the transaction is rolled back and `Cancelled` is returned.
    pub fn transfer_with_deadline(
        &self,
        request: &TransferRequest,
        deadline: Deadline,
    ) -> Result<TransferResult> {
        let started = Instant::now();

        let outcome = request
            .validate()
            .and_then(|_| {
                execute_tx(&*self.store, &deadline, |tx| {
                    apply_transfer(tx, request, &deadline)
                })
            });

        let elapsed = started.elapsed().as_secs_f64();
        match &outcome {
            Ok(result) => {
                tracing::info!(
                    transfer_id = %result.transfer.id,
                    from = %request.from_account_id,
                    to = %request.to_account_id,
                    amount = request.amount,
                    "Transfer committed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_transfer(request.amount, elapsed);
                }
            }
            Err(err) => {
                tracing::warn!(
                    from = %request.from_account_id,
                    to = %request.to_account_id,
                    amount = request.amount,
                    kind = err.kind().as_str(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "Transfer failed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(err.kind(), elapsed);
                }
            }
        }

        outcome
    }

    /// Compare an account's balance with the sum of its entries
    pub fn audit_account(&self, account_id: AccountId) -> Result<AccountAudit> {
        let account = self.store.get_account(account_id)?;
        let entries = self.store.list_entries(account_id)?;

        let entry_total = entries
            .iter()
            .try_fold(0i64, |total, e| total.checked_add(e.amount))
            .ok_or_else(|| {
                Error::Constraint(format!("entry total of account {} overflows", account_id))
            })?;

        Ok(AccountAudit {
            account_id,
            balance: account.balance,
            entry_total,
            entry_count: entries.len(),
        })
    }
}

impl<S> Clone for TransferEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            metrics: self.metrics.clone(),
        }
    }
}

/// Steps 1-4 inside an open transaction
fn apply_transfer<T: LedgerTx>(
    tx: &mut T,
    request: &TransferRequest,
    deadline: &Deadline,
) -> Result<TransferResult> {
    let from = request.from_account_id;
    let to = request.to_account_id;
    let amount = request.amount;
    let tx_id = tx.id();

    deadline.check("transfer record")?;
    let transfer = tx.create_transfer(&NewTransfer {
        from_account_id: from,
        to_account_id: to,
        amount,
    })?;

    deadline.check("debit entry")?;
    let from_entry = tx.create_entry(&NewEntry {
        account_id: from,
        transfer_id: transfer.id,
        amount: -amount,
    })?;

    deadline.check("credit entry")?;
    let to_entry = tx.create_entry(&NewEntry {
        account_id: to,
        transfer_id: transfer.id,
        amount,
    })?;

    deadline.check("balance updates")?;
    let order = lock_order(from, to);
    tracing::debug!(tx_id = %tx_id, transfer_id = %transfer.id, ?order, "Updating balances");

    let (from_account, to_account) = match order {
        LockOrder::SourceFirst => {
            let from_account = tx.decrement_balance(from, amount)?;
            let to_account = tx.increment_balance(to, amount)?;
            (from_account, to_account)
        }
        LockOrder::DestinationFirst => {
            let to_account = tx.increment_balance(to, amount)?;
            let from_account = tx.decrement_balance(from, amount)?;
            (from_account, to_account)
        }
    };

    Ok(TransferResult {
        transfer,
        from_entry,
        to_entry,
        from_account,
        to_account,
    })
}
