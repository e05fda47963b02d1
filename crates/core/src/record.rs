//! Log record types
//!
//! These are the shapes the object layer hands to, and receives from, the
//! shared log collaborator. The log stores them opaquely; only the object
//! layer decodes payloads.

use crate::types::{Address, ConflictHash, StreamId, TxnId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-stream sets of hashed conflict keys
///
/// An empty set for a stream means the whole stream is the conflict unit.
pub type HashedConflictSet = BTreeMap<StreamId, BTreeSet<ConflictHash>>;

/// Encoded state-machine update, as stored in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmrRecord {
    /// Method name
    pub method: String,
    /// Serializer-encoded arguments
    pub payload: Vec<u8>,
}

/// One update read back from a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Global address the record landed at
    pub address: Address,
    /// Stream the update belongs to
    pub stream: StreamId,
    /// The update itself
    pub record: SmrRecord,
}

/// An atomic, possibly multi-stream append
///
/// Non-transactional appends carry a single update and no conflict
/// information. Transactional commits carry the whole write set plus the
/// hashed conflict sets the log validates against `read_snapshot`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxRecord {
    /// Committing transaction, if any
    pub txn: Option<TxnId>,
    /// Address the transaction's reads were pinned to
    pub read_snapshot: Option<Address>,
    /// Updates per stream, in application order
    pub writes: BTreeMap<StreamId, Vec<SmrRecord>>,
    /// Hashed keys the writes touch
    pub write_conflicts: HashedConflictSet,
    /// Hashed keys that must not have been written after `read_snapshot`
    pub read_conflicts: HashedConflictSet,
}

impl TxRecord {
    /// A plain, unconditional append of one update to one stream
    pub fn single(stream: StreamId, record: SmrRecord) -> Self {
        let mut writes = BTreeMap::new();
        writes.insert(stream, vec![record]);
        TxRecord {
            writes,
            ..Default::default()
        }
    }

    /// Streams this record writes to
    pub fn streams(&self) -> impl Iterator<Item = &StreamId> {
        self.writes.keys()
    }

    /// Total number of updates across all streams
    pub fn update_count(&self) -> usize {
        self.writes.values().map(Vec::len).sum()
    }

    /// True if the record carries no updates
    pub fn is_empty(&self) -> bool {
        self.update_count() == 0
    }
}
