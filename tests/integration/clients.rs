//! Several runtimes sharing one log, as separate clients would.

use crate::common::*;

#[test]
fn test_peer_updates_become_visible() {
    let db = TestDb::new();
    let peer = db.peer();
    let stream = StreamId::new();
    let local = SharedMap::open(&db.runtime, stream);
    let remote = SharedMap::open(&peer, stream);

    remote.put(None, "from", "peer").unwrap();
    assert_eq!(local.get(None, "from").unwrap(), Some(Value::from("peer")));

    local.put(None, "reply", "ack").unwrap();
    assert_eq!(remote.len(None).unwrap(), 2);
    assert_eq!(local.manager().version(), remote.manager().version());
}

#[test]
fn test_peer_commit_invalidates_local_read() {
    let db = TestDb::new();
    let peer = db.peer();
    let stream = StreamId::new();
    let local = SharedCounter::open(&db.runtime, stream);
    let remote = SharedCounter::open(&peer, stream);

    let txn = db.runtime.begin(raw()).unwrap();
    let seen = local.get(Some(&txn)).unwrap();
    remote.increment(None, 1).unwrap();
    local.set(Some(&txn), seen + 10).unwrap();

    let err = txn.commit().unwrap_err();
    assert_eq!(err.abort_cause(), Some(AbortCause::Conflict));
    assert_eq!(local.get(None).unwrap(), 1);
}

#[test]
fn test_late_joiner_after_trim_cannot_rebuild() {
    let db = TestDb::with_config(RuntimeConfig::default().with_trim_retry(2));
    let stream = StreamId::new();
    let early = SharedCounter::open(&db.runtime, stream);
    for _ in 0..3 {
        early.increment(None, 1).unwrap();
    }
    db.log.trim(2);
    early.increment(None, 1).unwrap();
    assert_eq!(early.get(None).unwrap(), 4);

    let late = SharedCounter::open(&db.peer(), stream);
    let err = late.get(None).unwrap_err();
    assert!(err.is_trim());
    assert_eq!(late.manager().stats().trims, 2);
    assert_eq!(late.manager().version(), ORIGIN);
}

#[test]
fn test_sequencer_outage_fails_begin() {
    let db = TestDb::new();
    db.log
        .faults()
        .inject(FaultSite::Sequencer, Fault::Network, Some(1));
    let err = db.runtime.begin(waw()).unwrap_err();
    assert!(matches!(err, TesselError::Network(_)));
    assert!(db.runtime.begin(waw()).is_ok());
}

#[test]
fn test_append_outage_surfaces_to_plain_writer() {
    let db = TestDb::new();
    let counter = db.counter();
    db.log
        .faults()
        .inject(FaultSite::Append, Fault::Network, Some(1));
    let err = counter.increment(None, 1).unwrap_err();
    assert!(matches!(err, TesselError::Network(_)));
    assert_eq!(counter.increment(None, 1).unwrap(), 1);
}
