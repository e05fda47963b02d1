//! Counter and map primitives over a live runtime.

use crate::common::*;

// ============================================================================
// Counter
// ============================================================================

#[test]
fn test_counter_basic_operations() {
    let db = TestDb::new();
    let counter = db.counter();
    assert_eq!(counter.get(None).unwrap(), 0);
    assert_eq!(counter.increment(None, 5).unwrap(), 5);
    assert_eq!(counter.decrement(None, 2).unwrap(), 3);
    assert_eq!(counter.set(None, 40).unwrap(), 3);
    assert_eq!(counter.get(None).unwrap(), 40);
    assert_eq!(counter.manager().version(), 3);
}

#[test]
fn test_counter_blind_increments_are_replayed() {
    let db = TestDb::new();
    let counter = db.counter();
    for _ in 0..10 {
        counter.increment_blind(None, 3).unwrap();
    }
    assert_eq!(counter.get(None).unwrap(), 30);
}

#[test]
fn test_counter_inside_transaction() {
    let db = TestDb::new();
    let counter = db.counter();
    counter.set(None, 10).unwrap();

    let txn = db.runtime.begin(raw()).unwrap();
    assert_eq!(counter.increment(Some(&txn), 1).unwrap(), 11);
    assert_eq!(counter.increment(Some(&txn), 1).unwrap(), 12);
    assert_eq!(counter.get(None).unwrap(), 10);
    txn.commit().unwrap();
    assert_eq!(counter.get(None).unwrap(), 12);
}

#[test]
fn test_counter_history_walk() {
    let db = TestDb::new();
    let counter = db.counter();
    let mut addresses = Vec::new();
    for i in 1..=5 {
        addresses.push(counter.increment_blind(None, i).unwrap());
    }
    assert_eq!(counter.get(None).unwrap(), 15);

    let mut expected = 0;
    for (i, address) in addresses.iter().enumerate() {
        expected += i as i64 + 1;
        let txn = db
            .runtime
            .begin(TransactionBuilder::snapshot().at(*address))
            .unwrap();
        assert_eq!(counter.get(Some(&txn)).unwrap(), expected);
    }
    assert_eq!(counter.manager().stats().resets, 0);
}

// ============================================================================
// Map
// ============================================================================

#[test]
fn test_map_put_get_remove() {
    let db = TestDb::new();
    let map = db.map();
    assert_eq!(map.put(None, "a", 1).unwrap(), None);
    assert_eq!(map.put(None, "a", 2).unwrap(), Some(Value::Int(1)));
    assert_eq!(map.put(None, "b", "x").unwrap(), None);
    assert_eq!(map.get(None, "a").unwrap(), Some(Value::Int(2)));
    assert_eq!(map.len(None).unwrap(), 2);
    assert_eq!(map.remove(None, "a").unwrap(), Some(Value::Int(2)));
    assert_eq!(map.remove(None, "a").unwrap(), None);
    assert_eq!(map.keys(None).unwrap(), vec![Value::from("b")]);
}

#[test]
fn test_map_clear_rolls_back_for_old_snapshot() {
    let db = TestDb::new();
    let map = db.map();
    map.put(None, "a", 1).unwrap();
    map.put(None, "b", 2).unwrap();
    let before_clear = map.manager().version();
    assert_eq!(map.clear(None).unwrap(), 2);
    assert!(map.is_empty(None).unwrap());

    let txn = db
        .runtime
        .begin(TransactionBuilder::snapshot().at(before_clear))
        .unwrap();
    assert_eq!(map.len(Some(&txn)).unwrap(), 2);
    assert_eq!(map.get(Some(&txn), "b").unwrap(), Some(Value::Int(2)));
    assert_eq!(map.manager().stats().resets, 0);
    drop(txn);
    assert!(map.is_empty(None).unwrap());
}

#[test]
fn test_map_disjoint_keys_do_not_conflict() {
    let db = TestDb::new();
    let map = db.map();
    map.put(None, "a", 0).unwrap();
    map.put(None, "b", 0).unwrap();

    let t1 = db.runtime.begin(raw()).unwrap();
    let t2 = db.runtime.begin(raw()).unwrap();
    assert_eq!(map.get(Some(&t1), "a").unwrap(), Some(Value::Int(0)));
    assert_eq!(map.get(Some(&t2), "b").unwrap(), Some(Value::Int(0)));
    map.put(Some(&t1), "a", 1).unwrap();
    map.put(Some(&t2), "b", 2).unwrap();

    assert!(t1.commit().is_ok());
    assert!(t2.commit().is_ok());
    assert_eq!(map.get(None, "a").unwrap(), Some(Value::Int(1)));
    assert_eq!(map.get(None, "b").unwrap(), Some(Value::Int(2)));
}

#[test]
fn test_map_same_key_conflicts() {
    let db = TestDb::new();
    let map = db.map();
    map.put(None, "k", 0).unwrap();

    let t1 = db.runtime.begin(raw()).unwrap();
    let t2 = db.runtime.begin(raw()).unwrap();
    map.get(Some(&t1), "k").unwrap();
    map.get(Some(&t2), "k").unwrap();
    map.put(Some(&t1), "k", 1).unwrap();
    map.put(Some(&t2), "k", 2).unwrap();

    assert!(t1.commit().is_ok());
    let err = t2.commit().unwrap_err();
    assert_eq!(err.abort_cause(), Some(AbortCause::Conflict));
    assert_eq!(map.get(None, "k").unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_map_whole_read_conflicts_with_any_write() {
    let db = TestDb::new();
    let map = db.map();
    map.put(None, "a", 1).unwrap();

    let txn = db.runtime.begin(raw()).unwrap();
    assert_eq!(map.len(Some(&txn)).unwrap(), 1);
    map.put(Some(&txn), "count", 1).unwrap();

    map.put(None, "z", 26).unwrap();
    let err = txn.commit().unwrap_err();
    assert_eq!(err.abort_cause(), Some(AbortCause::Conflict));
}

#[test]
fn test_counter_read_modify_write_conflicts() {
    let db = TestDb::new();
    let counter = db.counter();
    counter.set(None, 1).unwrap();

    let t1 = db.runtime.begin(raw()).unwrap();
    let t2 = db.runtime.begin(raw()).unwrap();
    let a = counter.get(Some(&t1)).unwrap();
    let b = counter.get(Some(&t2)).unwrap();
    counter.set(Some(&t1), a * 10).unwrap();
    counter.set(Some(&t2), b * 100).unwrap();

    assert!(t2.commit().is_ok());
    assert_eq!(
        t1.commit().unwrap_err().abort_cause(),
        Some(AbortCause::Conflict)
    );
    assert_eq!(counter.get(None).unwrap(), 100);
}

#[test]
fn test_handles_are_debug() {
    let db = TestDb::new();
    let counter = db.counter();
    let map = db.map();
    counter.increment(None, 2).unwrap();

    let shown = format!("{:?}", counter);
    assert!(shown.starts_with("SharedCounter"));
    assert!(shown.contains("VersionedObjectManager"));
    assert!(format!("{:?}", map).starts_with("SharedMap"));
}

// ============================================================================
// Properties
// ============================================================================

mod properties {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone)]
    enum MapOp {
        Put(i64, i64),
        Remove(i64),
        Clear,
    }

    fn map_op() -> impl Strategy<Value = MapOp> {
        prop_oneof![
            6 => (0i64..8, any::<i64>()).prop_map(|(k, v)| MapOp::Put(k, v)),
            3 => (0i64..8).prop_map(MapOp::Remove),
            1 => Just(MapOp::Clear),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// Every past version is reachable and matches a plain BTreeMap model
        #[test]
        fn prop_map_history_matches_model(ops in prop::collection::vec(map_op(), 1..25)) {
            let db = TestDb::new();
            let map = db.map();
            let mut model = BTreeMap::new();
            let mut history = Vec::new();

            for op in &ops {
                match op {
                    MapOp::Put(k, v) => {
                        let prev = map.put(None, *k, *v).unwrap();
                        prop_assert_eq!(prev, model.insert(*k, *v).map(Value::Int));
                    }
                    MapOp::Remove(k) => {
                        let prev = map.remove(None, *k).unwrap();
                        prop_assert_eq!(prev, model.remove(k).map(Value::Int));
                    }
                    MapOp::Clear => {
                        prop_assert_eq!(map.clear(None).unwrap(), model.len());
                        model.clear();
                    }
                }
                history.push((map.manager().version(), model.clone()));
            }

            for (version, expected) in history.iter().rev() {
                let txn = db
                    .runtime
                    .begin(TransactionBuilder::snapshot().at(*version))
                    .unwrap();
                let keys = map.keys(Some(&txn)).unwrap();
                let want: Vec<Value> = expected.keys().map(|k| Value::Int(*k)).collect();
                prop_assert_eq!(keys, want);
                for (k, v) in expected {
                    prop_assert_eq!(map.get(Some(&txn), *k).unwrap(), Some(Value::Int(*v)));
                }
            }
            prop_assert_eq!(map.manager().stats().resets, 0);
        }
    }
}
