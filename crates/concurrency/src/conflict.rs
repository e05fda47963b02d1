//! Conflict sets and write sets
//!
//! A `ConflictSet` records, per stream, the caller-supplied keys a
//! transaction touched. Keys stay as values until a hashed summary is
//! requested at commit, so aborted and read-only transactions never pay for
//! hashing.
//!
//! Key conventions:
//! - `None`: no conflict tracking for this access (the set is unchanged)
//! - `Some(&[])`: the whole stream is the conflict unit
//! - `Some(keys)`: only these keys
//!
//! A `WriteSet` is a conflict set plus the buffered updates themselves, per
//! stream, in the order they were made. The index an update is buffered at
//! is its transaction-local address.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tessel_core::{
    Address, HashedConflictSet, Mutation, Result, Serializer, SmrRecord, StreamId, UpdateOp, Value,
};

/// Keys touched on one stream
struct ConflictEntry {
    serializer: Arc<dyn Serializer>,
    keys: HashSet<Value>,
    whole: bool,
}

impl ConflictEntry {
    fn hashed(&self) -> Result<BTreeSet<tessel_core::ConflictHash>> {
        if self.whole {
            return Ok(BTreeSet::new());
        }
        self.keys
            .iter()
            .map(|k| self.serializer.hash(k))
            .collect()
    }
}

/// Per-stream conflict keys of one transaction
#[derive(Default)]
pub struct ConflictSet {
    entries: BTreeMap<StreamId, ConflictEntry>,
}

impl ConflictSet {
    /// Create an empty conflict set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `keys` of `stream` were touched
    ///
    /// A no-op if `keys` is `None`. An empty slice widens the stream's
    /// entry to the whole stream, permanently.
    pub fn add(&mut self, stream: StreamId, serializer: &Arc<dyn Serializer>, keys: Option<&[Value]>) {
        let Some(keys) = keys else {
            return;
        };
        let entry = self.entries.entry(stream).or_insert_with(|| ConflictEntry {
            serializer: Arc::clone(serializer),
            keys: HashSet::new(),
            whole: false,
        });
        if keys.is_empty() {
            entry.whole = true;
        }
        entry.keys.extend(keys.iter().cloned());
    }

    /// Whether anything was recorded for `stream`
    pub fn contains(&self, stream: &StreamId) -> bool {
        self.entries.contains_key(stream)
    }

    /// Whether `stream` is tracked as a whole
    pub fn is_whole_stream(&self, stream: &StreamId) -> bool {
        self.entries.get(stream).map_or(false, |e| e.whole)
    }

    /// Keys recorded for `stream`
    pub fn keys(&self, stream: &StreamId) -> Option<&HashSet<Value>> {
        self.entries.get(stream).map(|e| &e.keys)
    }

    /// Streams with recorded conflicts
    pub fn streams(&self) -> impl Iterator<Item = &StreamId> {
        self.entries.keys()
    }

    /// Number of streams with recorded conflicts
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Hash every recorded key with its stream's serializer
    ///
    /// Whole-stream entries hash to an empty set.
    pub fn hashed(&self) -> Result<HashedConflictSet> {
        self.entries
            .iter()
            .map(|(stream, entry)| Ok((*stream, entry.hashed()?)))
            .collect()
    }
}

impl fmt::Debug for ConflictSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(s, e)| {
                let keys: Vec<_> = e.keys.iter().collect();
                (s.readable(), (e.whole, keys))
            }))
            .finish()
    }
}

/// Buffered updates for one stream
struct StreamWrites {
    serializer: Arc<dyn Serializer>,
    ops: Vec<Arc<UpdateOp>>,
}

/// Per-stream buffered updates plus their conflict keys
#[derive(Default)]
pub struct WriteSet {
    conflicts: ConflictSet,
    writes: BTreeMap<StreamId, StreamWrites>,
}

/// Encoded form of a write set, ready to append
#[derive(Debug, Default)]
pub struct EncodedWrites {
    /// Updates per stream
    pub writes: BTreeMap<StreamId, Vec<SmrRecord>>,
    /// Hashed write conflict keys
    pub conflicts: HashedConflictSet,
}

impl WriteSet {
    /// Create an empty write set
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `mutation` for `stream`, returning its transaction-local
    /// address
    ///
    /// The address is the number of updates previously buffered for the
    /// same stream.
    pub fn add(
        &mut self,
        stream: StreamId,
        serializer: &Arc<dyn Serializer>,
        mutation: Mutation,
        keys: Option<&[Value]>,
    ) -> Address {
        self.conflicts.add(stream, serializer, keys);
        let entry = self.writes.entry(stream).or_insert_with(|| StreamWrites {
            serializer: Arc::clone(serializer),
            ops: Vec::new(),
        });
        let index = entry.ops.len() as Address;
        entry.ops.push(Arc::new(UpdateOp::new(mutation, index)));
        index
    }

    /// Buffered updates for `stream`, in order
    pub fn ops(&self, stream: &StreamId) -> &[Arc<UpdateOp>] {
        self.writes.get(stream).map_or(&[], |w| w.ops.as_slice())
    }

    /// Buffered update at transaction-local `index`
    pub fn op(&self, stream: &StreamId, index: Address) -> Option<Arc<UpdateOp>> {
        let index = usize::try_from(index).ok()?;
        self.ops(stream).get(index).cloned()
    }

    /// Conflict keys of the buffered updates
    pub fn conflicts(&self) -> &ConflictSet {
        &self.conflicts
    }

    /// Streams with buffered updates
    pub fn streams(&self) -> impl Iterator<Item = &StreamId> {
        self.writes.keys()
    }

    /// Total number of buffered updates
    pub fn len(&self) -> usize {
        self.writes.values().map(|w| w.ops.len()).sum()
    }

    /// True if nothing was buffered
    pub fn is_empty(&self) -> bool {
        self.writes.values().all(|w| w.ops.is_empty())
    }

    /// Discard every buffered update and key
    pub fn clear(&mut self) {
        self.conflicts.clear();
        self.writes.clear();
    }

    /// Encode updates and hash write conflict keys
    pub fn encode(&self) -> Result<EncodedWrites> {
        let mut writes = BTreeMap::new();
        for (stream, w) in &self.writes {
            let records = w
                .ops
                .iter()
                .map(|op| {
                    Ok(SmrRecord {
                        method: op.method().to_string(),
                        payload: w.serializer.encode(op.args())?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            writes.insert(*stream, records);
        }
        Ok(EncodedWrites {
            writes,
            conflicts: self.conflicts.hashed()?,
        })
    }
}

impl fmt::Debug for WriteSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSet")
            .field("updates", &self.len())
            .field("conflicts", &self.conflicts)
            .finish()
    }
}
