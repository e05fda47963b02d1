//! Collaborator traits
//!
//! The object layer never talks to a network or a disk directly. It consumes
//! these narrow interfaces, each of which may fail at any call:
//!
//! - `SharedLog`: ordered reads of one stream, the global tail, atomic appends
//! - `Sequencer`: snapshot timestamps for transactions
//! - `StateMachine`: the replicated object type itself
//! - `Serializer`: argument encoding and conflict-key hashing
//!
//! Thread safety: log, sequencer and serializer implementations are shared
//! by every object manager and every transaction, so they must be
//! `Send + Sync`.

use crate::error::Result;
use crate::op::Applied;
use crate::record::{LogEntry, TxRecord};
use crate::types::{Address, ConflictHash, StreamId};
use crate::value::Value;

/// Append-only shared log
pub trait SharedLog: Send + Sync {
    /// Read the updates of `stream` with addresses in `(after, up_to]`,
    /// in address order
    ///
    /// # Errors
    ///
    /// `Trimmed` if part of the range was reclaimed, `Network` if the log
    /// could not be reached.
    fn read(&self, stream: StreamId, after: Address, up_to: Address) -> Result<Vec<LogEntry>>;

    /// Highest address written so far (`ORIGIN` for an empty log)
    fn tail(&self) -> Result<Address>;

    /// Atomically append a record, returning the address it landed at
    ///
    /// # Errors
    ///
    /// `Conflict` if a key in `record.read_conflicts` was written after
    /// `record.read_snapshot`, `Trimmed` if the snapshot is older than the
    /// trim mark, `Network` if the log could not be reached.
    fn append(&self, record: TxRecord) -> Result<Address>;
}

/// Issues snapshot timestamps
pub trait Sequencer: Send + Sync {
    /// Address a new transaction may pin its reads to
    ///
    /// Every address at or below the returned one is durable.
    fn next_snapshot_timestamp(&self) -> Result<Address>;
}

/// A deterministic, replicated object
///
/// The object is only ever mutated by applying updates in log order.
/// Applying the same sequence of mutations to the same starting state must
/// always produce the same state and the same results.
pub trait StateMachine: Send + Sync + 'static {
    /// Apply one mutation, returning its result and, if possible, the
    /// mutation that undoes it
    ///
    /// # Errors
    ///
    /// Any error is fatal to the sync that triggered the apply.
    fn apply(&mut self, method: &str, args: &[Value]) -> Result<Applied>;
}

/// Encodes update arguments and hashes conflict keys
pub trait Serializer: Send + Sync {
    /// Encode update arguments for the log
    fn encode(&self, args: &[Value]) -> Result<Vec<u8>>;

    /// Decode update arguments read from the log
    fn decode(&self, payload: &[u8]) -> Result<Vec<Value>>;

    /// Content hash of a conflict key
    fn hash(&self, key: &Value) -> Result<ConflictHash>;
}
