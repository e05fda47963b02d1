//! Tessel - transactional, versioned objects over a shared log
//!
//! Tessel keeps in-memory replicas of objects whose updates live in an
//! append-only shared log. Reads sync the replica to the right version;
//! writes append to the log, or buffer in a transaction until commit.
//!
//! # Quick Start
//!
//! ```ignore
//! use tessel::{open_in_memory, SharedCounter, StreamId, TransactionBuilder};
//!
//! let (_log, runtime) = open_in_memory();
//! let hits = SharedCounter::open(&runtime, StreamId::new());
//!
//! hits.increment(None, 1)?;
//! runtime.transaction(TransactionBuilder::read_after_write(), |txn| {
//!     let now = hits.get(Some(txn))?;
//!     hits.set(Some(txn), now * 2)
//! })?;
//! ```
//!
//! # Architecture
//!
//! - `tessel-core`: ids, values, update ops, log records and errors
//! - `tessel-log`: an in-memory shared log and sequencer
//! - `tessel-concurrency`: streams, transactions and the object manager
//!
//! Any [`SharedLog`] / [`Sequencer`] pair can back a [`Runtime`];
//! [`open_in_memory`] wires up the in-process one.

pub mod primitives;

pub use primitives::{Counter, SharedCounter, SharedMap, SmrMap};
pub use tessel_concurrency::{
    CommitOutcome, ManagerStats, ObjectBuilder, RetryConfig, Runtime, RuntimeConfig,
    Transaction, TransactionBuilder, TransactionKind, TransactionStatus, Txn,
    VersionedObjectManager,
};
pub use tessel_core::{
    AbortCause, Address, Applied, MsgPackSerializer, Mutation, Result, Sequencer, Serializer,
    SharedLog, StateMachine, StreamId, TesselError, TxnId, Value, ORIGIN,
};
pub use tessel_log::{Fault, FaultSite, LogStats, MemoryLog};

use std::sync::Arc;

/// A runtime over a fresh in-memory log, with default configuration
///
/// The log is returned too, for trimming and fault injection.
pub fn open_in_memory() -> (Arc<MemoryLog>, Runtime) {
    open_in_memory_with(RuntimeConfig::default())
}

/// A runtime over a fresh in-memory log
pub fn open_in_memory_with(config: RuntimeConfig) -> (Arc<MemoryLog>, Runtime) {
    let log = Arc::new(MemoryLog::new());
    let runtime = Runtime::new(log.clone(), log.clone(), config);
    tracing::debug!(
        trim_retry = runtime.config().trim_retry,
        undo_history = runtime.config().undo_history,
        "opened in-memory runtime"
    );
    (log, runtime)
}
