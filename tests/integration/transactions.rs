//! Transactions spanning several objects.

use crate::common::*;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_transfer_is_atomic() {
    let db = TestDb::new();
    let from = db.counter();
    let to = db.counter();
    from.set(None, 100).unwrap();

    let moved = db
        .runtime
        .transaction(raw(), |txn| {
            let available = from.get(Some(txn))?;
            let amount = available.min(40);
            from.decrement(Some(txn), amount)?;
            to.increment(Some(txn), amount)?;
            Ok(amount)
        })
        .unwrap();

    assert_eq!(moved, 40);
    assert_eq!(from.get(None).unwrap(), 60);
    assert_eq!(to.get(None).unwrap(), 40);
    assert_eq!(from.manager().version(), to.manager().version());
}

#[test]
fn test_aborted_transfer_leaves_no_trace() {
    let db = TestDb::new();
    let from = db.counter();
    let to = db.counter();
    from.set(None, 10).unwrap();

    let err = db
        .runtime
        .transaction(raw(), |txn| {
            from.decrement(Some(txn), 25)?;
            to.increment(Some(txn), 25)?;
            if from.get(Some(txn))? < 0 {
                return Err(txn.abort(AbortCause::User, None));
            }
            Ok(())
        })
        .unwrap_err();

    assert_eq!(err.abort_cause(), Some(AbortCause::User));
    assert_eq!(from.get(None).unwrap(), 10);
    assert_eq!(to.get(None).unwrap(), 0);
    assert_eq!(db.log.stats().appends, 1);
}

#[test]
fn test_snapshot_sees_consistent_cut() {
    let db = TestDb::new();
    let a = db.counter();
    let b = db.counter();
    for _ in 0..3 {
        db.runtime
            .transaction(raw(), |txn| {
                a.increment(Some(txn), 1)?;
                b.decrement(Some(txn), 1)
            })
            .unwrap();
    }
    a.get(None).unwrap();
    let cut = a.manager().version();
    a.increment(None, 100).unwrap();

    let txn = db
        .runtime
        .begin(TransactionBuilder::snapshot().at(cut))
        .unwrap();
    let (va, vb) = (a.get(Some(&txn)).unwrap(), b.get(Some(&txn)).unwrap());
    assert_eq!(va + vb, 0);
    assert_eq!(va, 3);
    assert_eq!(txn.commit().unwrap(), CommitOutcome::NoWrite);
}

#[test]
fn test_nested_transaction_across_objects() {
    let db = TestDb::new();
    let counter = db.counter();
    let map = db.map();

    let outcome = {
        let txn = db.runtime.begin(raw()).unwrap();
        counter.increment(Some(&txn), 1).unwrap();
        let inner = txn.begin_nested(&raw()).unwrap();
        map.put(Some(&inner), "seen", counter.get(Some(&inner)).unwrap())
            .unwrap();
        assert_eq!(inner.commit().unwrap(), CommitOutcome::Folded);
        assert!(map.get(None, "seen").unwrap().is_none());
        txn.commit().unwrap()
    };

    let address = outcome.address().unwrap();
    assert_eq!(map.get(None, "seen").unwrap(), Some(Value::Int(1)));
    assert_eq!(counter.get(None).unwrap(), 1);
    assert_eq!(map.manager().version(), address);
    assert_eq!(counter.manager().version(), address);
}

#[test]
fn test_write_after_write_conflicts_on_written_key_only() {
    let db = TestDb::new();
    let map = db.map();
    map.put(None, "a", 0).unwrap();

    let txn = db.runtime.begin(waw()).unwrap();
    // a stale read does not matter to a write-after-write transaction
    map.get(Some(&txn), "a").unwrap();
    let other = db.peer();
    let peer_map = SharedMap::open(&other, map.manager().id());
    other
        .transaction(raw(), |t| peer_map.put(Some(t), "b", 1))
        .unwrap();

    map.put(Some(&txn), "c", 2).unwrap();
    assert!(txn.commit().is_ok());
    assert_eq!(map.len(None).unwrap(), 3);
}

#[test]
fn test_commit_retry_loop_under_threads() {
    let db = TestDb::contended();
    let counter = db.counter();
    let threads = 4;
    let per_thread = 20;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let runtime = db.runtime.clone();
            let counter = counter.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..per_thread {
                    runtime
                        .transaction(raw(), |txn| {
                            let v = counter.get(Some(txn))?;
                            counter.set(Some(txn), v + 1)
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(counter.get(None).unwrap(), (threads * per_thread) as i64);
}
