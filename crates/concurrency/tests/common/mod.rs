//! Shared fixtures for the tessel-concurrency integration suites.
//!
//! Import via `mod common;`.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::{Arc, Once};
pub use tessel_concurrency::{
    CommitOutcome, RetryConfig, Runtime, RuntimeConfig, TransactionBuilder, Txn,
    VersionedObjectManager,
};
pub use tessel_core::{AbortCause, Applied, Result, StateMachine, StreamId, TesselError, Value};
pub use tessel_log::{Fault, FaultSite, MemoryLog};

// ============================================================================
// Initialization
// ============================================================================

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness (RUST_LOG-free, debug level)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Account - a bank account state machine with undo records
// ============================================================================

/// Balance that supports deposit / withdraw / set, all undoable
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Account {
    pub balance: i64,
    pub applied: u64,
}

impl StateMachine for Account {
    fn apply(&mut self, method: &str, args: &[Value]) -> Result<Applied> {
        if method == "fail" {
            return Err(TesselError::invalid_state("upcall failed"));
        }
        let amount = args
            .first()
            .and_then(Value::as_int)
            .ok_or_else(|| TesselError::invalid_state(format!("{} needs an amount", method)))?;
        self.applied += 1;
        match method {
            "deposit" => {
                self.balance += amount;
                Ok(Applied::none()
                    .with_result(self.balance)
                    .with_undo("withdraw", vec![Value::Int(amount)]))
            }
            "withdraw" => {
                self.balance -= amount;
                Ok(Applied::none()
                    .with_result(self.balance)
                    .with_undo("deposit", vec![Value::Int(amount)]))
            }
            "set" => {
                let old = self.balance;
                self.balance = amount;
                Ok(Applied::none()
                    .with_result(old)
                    .with_undo("set", vec![Value::Int(old)]))
            }
            other => Err(TesselError::unsupported(format!("unknown method {}", other))),
        }
    }
}

/// Conflict key every account operation touches
pub fn balance_key() -> [Value; 1] {
    [Value::from("balance")]
}

// ============================================================================
// TestEnv - one in-memory log plus a runtime over it
// ============================================================================

pub struct TestEnv {
    pub log: Arc<MemoryLog>,
    pub runtime: Runtime,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        init_tracing();
        let log = Arc::new(MemoryLog::new());
        let runtime = Runtime::new(log.clone(), log.clone(), config);
        TestEnv { log, runtime }
    }

    /// Retry fast and often, for contention tests
    pub fn contended() -> Self {
        Self::with_config(
            RuntimeConfig::default().with_retry(
                RetryConfig::new()
                    .with_max_retries(500)
                    .with_base_delay_ms(1)
                    .with_max_delay_ms(4),
            ),
        )
    }

    pub fn account(&self, stream: StreamId) -> Arc<VersionedObjectManager<Account>> {
        self.runtime.object::<Account>(stream).open()
    }

    pub fn new_account(&self) -> Arc<VersionedObjectManager<Account>> {
        self.account(StreamId::new())
    }
}

/// Append `method(amount)` outside any transaction
pub fn update(account: &VersionedObjectManager<Account>, method: &str, amount: i64) -> u64 {
    account
        .log_update(None, method, vec![Value::Int(amount)], None, false)
        .unwrap()
}

/// Balance as `txn` sees it
pub fn balance(account: &VersionedObjectManager<Account>, txn: Option<&Txn>) -> i64 {
    account.access(txn, None, |a| a.balance).unwrap()
}

/// Read-modify-write inside `txn`, validated on the balance key
pub fn withdraw_checked(
    account: &VersionedObjectManager<Account>,
    txn: &Txn,
    amount: i64,
) -> Result<i64> {
    let key = balance_key();
    let current = account.access(Some(txn), Some(&key[..]), |a| a.balance)?;
    account.log_update(
        Some(txn),
        "withdraw",
        vec![Value::Int(amount)],
        Some(&key[..]),
        false,
    )?;
    Ok(current - amount)
}
