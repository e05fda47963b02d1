//! Transaction retry loop
//!
//! ```text
//!            +------------------------------+
//!            v                              |
//! Attempting(n) --retryable abort--> Backoff(n, delay)
//!      |                   (n < max_retries)
//!      +--ok------------> Committed(value)
//!      +--other error---> Aborted(error)
//! ```
//!
//! The whole body is re-run on every attempt, in a fresh transaction.
//! Network aborts are never retried.

use crate::config::RetryConfig;
use crate::runtime::Runtime;
use crate::transaction::{TransactionBuilder, Txn};
use std::time::Duration;
use tessel_core::{Result, TesselError};
use tracing::{debug, info};

enum RetryState<R> {
    Attempting(u32),
    Backoff { attempt: u32, delay: Duration },
    Aborted(TesselError),
    Committed(R),
}

/// Run `body` transactionally until it commits or fails for good
pub(crate) fn run<R>(
    runtime: &Runtime,
    builder: &TransactionBuilder,
    retry: &RetryConfig,
    mut body: impl FnMut(&Txn) -> Result<R>,
) -> Result<R> {
    let mut state = RetryState::Attempting(0);
    loop {
        state = match state {
            RetryState::Attempting(attempt) => {
                let txn = Txn::begin(runtime.clone(), builder)?;
                let txn_id = txn.id();
                match attempt_once(txn, &mut body) {
                    Ok(value) => RetryState::Committed(value),
                    Err(e) if e.is_retryable_abort() && attempt < retry.max_retries => {
                        let delay = retry.calculate_delay(attempt);
                        info!(
                            txn = %txn_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transaction aborted, retrying"
                        );
                        RetryState::Backoff { attempt, delay }
                    }
                    Err(e) => RetryState::Aborted(e),
                }
            }
            RetryState::Backoff { attempt, delay } => {
                std::thread::sleep(delay);
                RetryState::Attempting(attempt + 1)
            }
            RetryState::Aborted(e) => {
                debug!(error = %e, "Transaction failed");
                return Err(e);
            }
            RetryState::Committed(value) => return Ok(value),
        };
    }
}

fn attempt_once<R>(txn: Txn, body: &mut impl FnMut(&Txn) -> Result<R>) -> Result<R> {
    match body(&txn) {
        Ok(value) => {
            txn.commit()?;
            Ok(value)
        }
        Err(e) => Err(txn.fail(e)),
    }
}
