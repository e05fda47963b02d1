//! Counter primitive.
//!
//! A replicated signed counter. Every update carries an undo record, so a
//! counter can be rolled back to any retained version without a replay.

use std::sync::Arc;
use tessel_concurrency::{Runtime, Txn, VersionedObjectManager};
use tessel_core::{Address, Applied, Result, StateMachine, StreamId, TesselError, Value};

/// Counter state machine
///
/// Methods: `increment(n)`, `decrement(n)`, `set(n)`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    value: i64,
}

impl Counter {
    /// Current value
    pub fn value(&self) -> i64 {
        self.value
    }

    fn shift(&mut self, by: i64) -> Result<i64> {
        self.value = self
            .value
            .checked_add(by)
            .ok_or_else(|| TesselError::invalid_state(format!("counter overflow adding {}", by)))?;
        Ok(self.value)
    }
}

fn amount(method: &str, args: &[Value]) -> Result<i64> {
    args.first()
        .and_then(Value::as_int)
        .ok_or_else(|| TesselError::invalid_state(format!("{} expects one integer", method)))
}

impl StateMachine for Counter {
    fn apply(&mut self, method: &str, args: &[Value]) -> Result<Applied> {
        match method {
            "increment" => {
                let n = amount(method, args)?;
                let value = self.shift(n)?;
                Ok(Applied::none()
                    .with_result(value)
                    .with_undo("decrement", vec![Value::Int(n)]))
            }
            "decrement" => {
                let n = amount(method, args)?;
                let value = self.shift(n.checked_neg().ok_or_else(|| {
                    TesselError::invalid_state("counter decrement out of range")
                })?)?;
                Ok(Applied::none()
                    .with_result(value)
                    .with_undo("increment", vec![Value::Int(n)]))
            }
            "set" => {
                let n = amount(method, args)?;
                let old = std::mem::replace(&mut self.value, n);
                Ok(Applied::none()
                    .with_result(old)
                    .with_undo("set", vec![Value::Int(old)]))
            }
            other => Err(TesselError::unsupported(format!(
                "counter has no method {}",
                other
            ))),
        }
    }
}

/// A counter is one value; every access conflicts on the whole stream.
const WHOLE: &[Value] = &[];

/// Typed handle over a counter object
///
/// Every method takes the transaction explicitly; `None` runs outside any
/// transaction.
///
/// # Example
///
/// ```ignore
/// let (_log, runtime) = tessel::open_in_memory();
/// let hits = SharedCounter::open(&runtime, StreamId::new());
/// hits.increment(None, 1)?;
/// assert_eq!(hits.get(None)?, 1);
/// ```
#[derive(Debug, Clone)]
pub struct SharedCounter {
    manager: Arc<VersionedObjectManager<Counter>>,
}

impl SharedCounter {
    /// Open the counter living on `stream`
    pub fn open(runtime: &Runtime, stream: StreamId) -> Self {
        Self {
            manager: runtime.object::<Counter>(stream).open(),
        }
    }

    /// Underlying object manager
    pub fn manager(&self) -> &Arc<VersionedObjectManager<Counter>> {
        &self.manager
    }

    /// Current value
    pub fn get(&self, txn: Option<&Txn>) -> Result<i64> {
        self.manager.access(txn, Some(WHOLE), Counter::value)
    }

    /// Add `by`, returning the new value
    pub fn increment(&self, txn: Option<&Txn>, by: i64) -> Result<i64> {
        self.update(txn, "increment", by)
    }

    /// Subtract `by`, returning the new value
    pub fn decrement(&self, txn: Option<&Txn>, by: i64) -> Result<i64> {
        self.update(txn, "decrement", by)
    }

    /// Overwrite the value, returning the previous one
    pub fn set(&self, txn: Option<&Txn>, value: i64) -> Result<i64> {
        self.update(txn, "set", value)
    }

    /// Append without waiting for the result
    pub fn increment_blind(&self, txn: Option<&Txn>, by: i64) -> Result<Address> {
        self.manager
            .log_update(txn, "increment", vec![Value::Int(by)], Some(WHOLE), false)
    }

    fn update(&self, txn: Option<&Txn>, method: &str, n: i64) -> Result<i64> {
        let address = self
            .manager
            .log_update(txn, method, vec![Value::Int(n)], Some(WHOLE), true)?;
        match self.manager.get_upcall_result(txn, address, Some(WHOLE))? {
            Some(Value::Int(v)) => Ok(v),
            other => Err(TesselError::invalid_state(format!(
                "counter {} returned {:?}",
                method, other
            ))),
        }
    }
}
