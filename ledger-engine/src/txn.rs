//! Atomic unit-of-work
//!
//! [`execute_tx`] opens a transaction, hands the scoped handle to a closure,
//! and commits or rolls back as a unit. Nothing the closure writes is
//! visible to anyone else unless the commit succeeds.

use crate::{
    storage::{LedgerStore, LedgerTx},
    Error, Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag a caller sets to abandon a unit-of-work it no longer waits for
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Fresh, not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandon every unit-of-work carrying this handle
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Point in time after which a unit-of-work must not commit, plus an
/// optional cancel flag with the same effect
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancel: Option<CancelHandle>,
}

impl Deadline {
    /// No deadline
    pub fn none() -> Self {
        Self::default()
    }

    /// Deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
            cancel: None,
        }
    }

    /// Deadline at a fixed instant
    pub fn at(instant: Instant) -> Self {
        Self {
            at: Some(instant),
            cancel: None,
        }
    }

    /// `after(timeout)` when a timeout is given
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_default()
    }

    /// Also end when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Time left; `None` means unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        matches!(self.at, Some(at) if Instant::now() >= at)
    }

    /// Whether the caller has abandoned the call
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelHandle::is_cancelled)
    }

    /// Expired or cancelled
    pub fn is_over(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    /// Whether lock waits must poll for cancellation
    pub fn is_cancellable(&self) -> bool {
        self.cancel.is_some()
    }

    /// `Cancelled` once the deadline has passed or the call was abandoned
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled(format!("call abandoned before {}", stage)));
        }
        if self.is_expired() {
            return Err(Error::Cancelled(format!("deadline elapsed before {}", stage)));
        }
        Ok(())
    }

    /// Cap a lock wait so it cannot outlive the deadline
    pub fn cap(&self, wait: Duration) -> Duration {
        match self.remaining() {
            Some(left) => wait.min(left),
            None => wait,
        }
    }
}

/// Run `f` inside one transaction on `store`
///
/// - closure error: roll back and return it (a transient failure observed
///   after the deadline is reported as `Cancelled`); if the rollback fails
///   too, both errors come back as [`Error::Rollback`]
/// - closure success: commit, unless the deadline passed meanwhile, in which
///   case roll back and return `Cancelled`; commit errors are returned as-is
pub fn execute_tx<'s, S, T, F>(store: &'s S, deadline: &Deadline, f: F) -> Result<T>
where
    S: LedgerStore,
    F: FnOnce(&mut S::Tx<'s>) -> Result<T>,
{
    deadline.check("begin")?;

    let mut tx = store.begin(deadline.clone())?;
    let tx_id = tx.id();
    let span = tracing::debug_span!("ledger_tx", tx_id = %tx_id);
    let _entered = span.enter();
    tracing::trace!(tx_id = %tx_id, "Transaction started");

    let outcome = f(&mut tx).and_then(|value| deadline.check("commit").map(|_| value));

    match outcome {
        Ok(value) => {
            tx.commit()?;
            tracing::trace!(tx_id = %tx_id, "Transaction committed");
            Ok(value)
        }
        Err(err) => {
            let err = if err.is_retryable() && deadline.is_over() {
                Error::Cancelled(format!("gave up while waiting: {}", err))
            } else {
                err
            };

            match tx.rollback() {
                Ok(()) => {
                    tracing::debug!(tx_id = %tx_id, error = %err, "Transaction rolled back");
                    Err(err)
                }
                Err(rollback) => {
                    tracing::error!(
                        tx_id = %tx_id,
                        error = %err,
                        rollback_error = %rollback,
                        "Rollback failed; store connection should not be reused"
                    );
                    Err(Error::Rollback {
                        cause: Box::new(err),
                        rollback: Box::new(rollback),
                    })
                }
            }
        }
    }
}
