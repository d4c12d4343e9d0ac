//! Concurrent transfers: conservation and freedom from deadlock

mod common;

use common::*;
use ledger_engine::{
    storage::{LedgerStore, LedgerTx},
    types::{AccountId, TransferRequest},
    Deadline, Error, MemoryStore, Result, TransferEngine,
};
use rand::Rng;
use std::sync::{Arc, Barrier};
use std::thread;

/// `n` threads, even ones moving A→B and odd ones B→A, released together
fn alternating_transfers<S: LedgerStore + 'static>(store: S, n: usize, amount: i64) {
    let a = open_account(&store, "alice", 1_000);
    let b = open_account(&store, "bob", 1_000);
    let engine = TransferEngine::new(Arc::new(store));
    let barrier = Arc::new(Barrier::new(n));

    let handles: Vec<_> = (0..n)
        .map(|i| {
            let engine = engine.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
                barrier.wait();
                engine.transfer(&TransferRequest::new(from, to, amount))
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let store = engine.store();
    let expected_shift = if n % 2 == 0 { 0 } else { amount };
    assert_eq!(balance(&**store, a), 1_000 - expected_shift);
    assert_eq!(balance(&**store, b), 1_000 + expected_shift);
    assert_eq!(balance(&**store, a) - 1_000, entry_sum(&**store, a));
    assert_eq!(balance(&**store, b) - 1_000, entry_sum(&**store, b));
    assert_eq!(entry_sum(&**store, a) + entry_sum(&**store, b), 0);
    assert_eq!(store.list_transfers(a).unwrap().len(), n);
}

fn one_direction<S: LedgerStore + 'static>(store: S) {
    let a = open_account(&store, "alice", 1_000);
    let b = open_account(&store, "bob", 0);
    let engine = TransferEngine::new(Arc::new(store));

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || engine.transfer(&TransferRequest::new(a, b, 5)))
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let store = engine.store();
    assert_eq!(balance(&**store, a), 900);
    assert_eq!(balance(&**store, b), 100);
    assert_eq!(store.list_entries(b).unwrap().len(), 20);
}

/// Random pairs among a handful of accounts, from several threads at once
fn random_pairs<S: LedgerStore + 'static>(store: S) {
    let accounts: Vec<AccountId> = (0..5)
        .map(|i| open_account(&store, &format!("owner-{}", i), 500))
        .collect();
    let engine = TransferEngine::new(Arc::new(store));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let accounts = accounts.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..50 {
                    let from = accounts[rng.gen_range(0..accounts.len())];
                    let to = accounts[rng.gen_range(0..accounts.len())];
                    let amount = rng.gen_range(1..=100);
                    // Same-account and overdraft attempts fail cleanly; nothing else may
                    if let Err(err) = engine.transfer(&TransferRequest::new(from, to, amount)) {
                        assert!(!err.is_retryable(), "{:?}", err);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let store = engine.store();
    let mut total = 0;
    for id in &accounts {
        let current = balance(&**store, *id);
        assert!(current >= 0);
        assert_eq!(current, 500 + entry_sum(&**store, *id));
        total += current;
    }
    assert_eq!(total, 2_500);
}

/// Two raw transactions taking the same two row locks in opposite order
fn reversed_lock_order<S: LedgerStore>(store: &S) -> Vec<Result<()>> {
    let a = open_account(store, "alice", 100);
    let b = open_account(store, "bob", 100);
    let barrier = Barrier::new(2);

    let attempt = |first: AccountId, second: AccountId| -> Result<()> {
        let mut tx = store.begin(Deadline::none())?;
        tx.add_account_balance(first, -1)?;
        barrier.wait();
        tx.add_account_balance(second, 1)?;
        tx.commit()
    };

    thread::scope(|s| {
        let forward = s.spawn(|| attempt(a, b));
        let backward = s.spawn(|| attempt(b, a));
        vec![forward.join().unwrap(), backward.join().unwrap()]
    })
}

fn short_lock_timeout() -> ledger_engine::Config {
    let mut config = test_config();
    config.transactions.lock_timeout_ms = 200;
    config
}

#[test]
fn test_memory_ten_alternating_transfers() {
    alternating_transfers(memory_store(), 10, 10);
}

#[test]
fn test_rocks_ten_alternating_transfers() {
    let (store, _dir) = rocks_store();
    alternating_transfers(store, 10, 10);
}

#[test]
fn test_memory_many_alternating_transfers() {
    alternating_transfers(memory_store(), 51, 7);
}

#[test]
fn test_memory_one_direction() {
    one_direction(memory_store());
}

#[test]
fn test_rocks_one_direction() {
    let (store, _dir) = rocks_store();
    one_direction(store);
}

#[test]
fn test_memory_random_pairs() {
    random_pairs(memory_store());
}

#[test]
fn test_rocks_random_pairs() {
    let (store, _dir) = rocks_store();
    random_pairs(store);
}

#[test]
fn test_memory_reversed_lock_order_times_out() {
    let store = MemoryStore::new(&short_lock_timeout());

    let results = reversed_lock_order(&store);

    let failures: Vec<&Error> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert!(!failures.is_empty());
    assert!(failures.iter().all(|e| e.is_retryable()), "{:?}", failures);
}

#[test]
fn test_rocks_reversed_lock_order_is_detected() {
    let (store, _dir) = rocks_store_with(short_lock_timeout());

    let results = reversed_lock_order(&store);

    let failures: Vec<&Error> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert!(!failures.is_empty());
    assert!(failures.iter().all(|e| e.is_retryable()), "{:?}", failures);
}
