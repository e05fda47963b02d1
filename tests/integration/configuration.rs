//! Runtimes built from TOML configuration.

use crate::common::*;
use tempfile::TempDir;

#[test]
fn test_runtime_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tessel.toml");
    std::fs::write(
        &path,
        "trim_retry = 4\nundo_history = 2\n\n[retry]\nmax_retries = 0\n",
    )
    .unwrap();

    let config = RuntimeConfig::from_file(&path).unwrap();
    assert_eq!(config.retry.base_delay_ms, RetryConfig::default().base_delay_ms);
    let db = TestDb::with_config(config);
    assert_eq!(db.runtime.config().trim_retry, 4);

    // no retries: the first conflict is final
    let counter = db.counter();
    let mut calls = 0;
    let err = db
        .runtime
        .transaction(raw(), |txn| {
            calls += 1;
            let v = counter.get(Some(txn))?;
            counter.increment_blind(None, 1)?;
            counter.set(Some(txn), v + 1)
        })
        .unwrap_err();
    assert_eq!(calls, 1);
    assert_eq!(err.abort_cause(), Some(AbortCause::Conflict));
}

#[test]
fn test_short_undo_history_forces_replay() {
    let db = TestDb::with_config(RuntimeConfig::from_toml_str("undo_history = 2").unwrap());
    let counter = db.counter();
    for _ in 0..6 {
        counter.increment_blind(None, 1).unwrap();
    }
    assert_eq!(counter.get(None).unwrap(), 6);

    let near = db.runtime.begin(TransactionBuilder::snapshot().at(5)).unwrap();
    assert_eq!(counter.get(Some(&near)).unwrap(), 5);
    assert_eq!(counter.manager().stats().resets, 0);
    drop(near);

    let far = db.runtime.begin(TransactionBuilder::snapshot().at(1)).unwrap();
    assert_eq!(counter.get(Some(&far)).unwrap(), 1);
    assert_eq!(counter.manager().stats().resets, 1);
}

#[test]
fn test_written_config_round_trips_through_runtime() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tessel.toml");
    let config = RuntimeConfig::default()
        .with_trim_retry(7)
        .with_retry(RetryConfig::no_retry());
    config.write_to_file(&path).unwrap();

    let (_log, runtime) = open_in_memory_with(RuntimeConfig::from_file(&path).unwrap());
    assert_eq!(runtime.config(), &config);
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = RuntimeConfig::from_toml_str("trim_retry = 0").unwrap_err();
    assert!(matches!(err, TesselError::Config(_)));
    let err = RuntimeConfig::from_toml_str("trim_retry = \"many\"").unwrap_err();
    assert!(matches!(err, TesselError::Config(_)));
}
