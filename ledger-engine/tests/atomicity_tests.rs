//! A transfer that fails at any step leaves no trace

mod common;

use common::*;
use ledger_engine::{
    storage::LedgerStore,
    types::{AccountId, TransferRequest},
    Error, ErrorKind, TransferEngine,
};
use std::sync::Arc;

fn setup<S: LedgerStore>(inner: S) -> (TransferEngine<FaultyStore<S>>, AccountId, AccountId) {
    let store = FaultyStore::new(inner);
    let a = open_account(&store, "alice", 100);
    let b = open_account(&store, "bob", 50);
    (TransferEngine::new(Arc::new(store)), a, b)
}

fn assert_untouched<S: LedgerStore>(store: &S, a: AccountId, b: AccountId) {
    assert_eq!(balance(store, a), 100);
    assert_eq!(balance(store, b), 50);
    assert!(store.list_transfers(a).unwrap().is_empty());
    assert!(store.list_transfers(b).unwrap().is_empty());
    assert!(store.list_entries(a).unwrap().is_empty());
    assert!(store.list_entries(b).unwrap().is_empty());
}

fn every_step_rolls_back<S: LedgerStore>(inner: S) {
    let (engine, a, b) = setup(inner);

    for fault in [
        Fault::TransferRow,
        Fault::Entry(0),
        Fault::Entry(1),
        Fault::Balance(0),
        Fault::Balance(1),
        Fault::Commit,
    ] {
        engine.store().arm(&[fault]);

        let err = engine.transfer(&TransferRequest::new(a, b, 30)).unwrap_err();

        assert!(matches!(err, Error::Storage(_)), "{:?}: {:?}", fault, err);
        assert_untouched(&**engine.store(), a, b);
    }

    // The store is still usable afterwards, locks included
    let result = engine.transfer(&TransferRequest::new(a, b, 30)).unwrap();
    assert_eq!(result.from_account.balance, 70);
    assert_eq!(result.to_account.balance, 80);
}

fn failed_rollback_reports_both<S: LedgerStore>(inner: S) {
    let (engine, a, b) = setup(inner);
    engine.store().arm(&[Fault::Balance(1), Fault::Rollback]);

    let err = engine.transfer(&TransferRequest::new(a, b, 30)).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RollbackFailure);
    match err {
        Error::Rollback { cause, rollback } => {
            assert!(cause.to_string().contains("balance update"));
            assert!(rollback.to_string().contains("rollback"));
        }
        other => panic!("expected Rollback, got {:?}", other),
    }
    assert_untouched(&**engine.store(), a, b);
}

fn business_failure_after_writes_rolls_back<S: LedgerStore>(inner: S) {
    let (engine, a, b) = setup(inner);

    // Both entries and the transfer row are written before the overdraft is caught
    let err = engine.transfer(&TransferRequest::new(b, a, 51)).unwrap_err();

    assert!(matches!(err, Error::InsufficientFunds { .. }));
    assert_untouched(&**engine.store(), a, b);
}

#[test]
fn test_memory_every_step_rolls_back() {
    every_step_rolls_back(memory_store());
}

#[test]
fn test_rocks_every_step_rolls_back() {
    let (store, _dir) = rocks_store();
    every_step_rolls_back(store);
}

#[test]
fn test_memory_failed_rollback() {
    failed_rollback_reports_both(memory_store());
}

#[test]
fn test_rocks_failed_rollback() {
    let (store, _dir) = rocks_store();
    failed_rollback_reports_both(store);
}

#[test]
fn test_memory_business_failure() {
    business_failure_after_writes_rolls_back(memory_store());
}

#[test]
fn test_rocks_business_failure() {
    let (store, _dir) = rocks_store();
    business_failure_after_writes_rolls_back(store);
}

#[test]
fn test_memory_failure_leaves_row_counts() {
    let (engine, a, b) = setup(memory_store());
    engine.store().arm(&[Fault::Commit]);

    engine.transfer(&TransferRequest::new(a, b, 30)).unwrap_err();

    assert_eq!(engine.store().inner().row_counts(), (0, 0));
}
