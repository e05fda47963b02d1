//! Transaction context
//!
//! One context per outermost transaction. Nested transactions share it, so
//! every level sees the same write set, conflict set and read snapshot.
//!
//! ## State transitions
//!
//! ```text
//! Initialized -> Active -> Committed
//!                       -> Aborted { cause }
//! ```
//!
//! Terminal states accept nothing further. Aborting discards the write set
//! and the conflict set; the commit address stays `None` forever.
//!
//! The context is driven by one thread at a time, but optimistic streams
//! installed in shared object managers hold it too, so its state sits
//! behind a (normally uncontended) mutex.

use crate::conflict::{ConflictSet, EncodedWrites, WriteSet};
use parking_lot::Mutex;
use std::sync::Arc;
use tessel_core::{
    AbortCause, Address, HashedConflictSet, Mutation, Result, Serializer, StreamId, TesselError,
    TxnId, UpdateOp, Value,
};

/// Lifecycle state of a transaction context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Created, not yet started
    Initialized,
    /// Accepting reads and writes
    Active,
    /// Writes (if any) are durable
    Committed,
    /// Discarded
    Aborted {
        /// Why
        cause: AbortCause,
    },
}

#[derive(Debug)]
struct ContextState {
    status: TransactionStatus,
    write_set: WriteSet,
    conflict_set: ConflictSet,
    read_snapshot: Option<Address>,
    commit_address: Option<Address>,
}

/// Write set, conflict set and addresses of one in-flight transaction
#[derive(Debug)]
pub struct TransactionContext {
    id: TxnId,
    state: Mutex<ContextState>,
}

impl TransactionContext {
    /// Create a context in `Initialized` state
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            state: Mutex::new(ContextState {
                status: TransactionStatus::Initialized,
                write_set: WriteSet::new(),
                conflict_set: ConflictSet::new(),
                read_snapshot: None,
                commit_address: None,
            }),
        }
    }

    /// Id of the outermost transaction
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Current status
    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    /// Whether the context accepts operations
    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    /// Check if the context can accept operations
    ///
    /// # Errors
    /// Returns `TesselError::InvalidState` if not `Active`.
    pub fn ensure_active(&self) -> Result<()> {
        let status = self.status();
        if status == TransactionStatus::Active {
            Ok(())
        } else {
            Err(TesselError::invalid_state(format!(
                "Transaction {} is not active: {:?}",
                self.id, status
            )))
        }
    }

    /// Address reads are pinned to, once obtained
    pub fn read_snapshot(&self) -> Option<Address> {
        self.state.lock().read_snapshot
    }

    /// Address the writes landed at, once committed
    pub fn commit_address(&self) -> Option<Address> {
        self.state.lock().commit_address
    }

    /// Number of buffered updates across all streams
    pub fn write_count(&self) -> usize {
        self.state.lock().write_set.len()
    }

    /// Number of streams with recorded read conflicts
    pub fn conflict_count(&self) -> usize {
        self.state.lock().conflict_set.len()
    }

    /// True if nothing was buffered
    pub fn is_read_only(&self) -> bool {
        self.state.lock().write_set.is_empty()
    }

    /// Whether `stream` has recorded read conflicts
    pub fn has_read_conflict(&self, stream: &StreamId) -> bool {
        self.state.lock().conflict_set.contains(stream)
    }

    pub(crate) fn set_read_snapshot(&self, snapshot: Option<Address>) {
        self.state.lock().read_snapshot = snapshot;
    }

    /// Pin the read snapshot with `obtain` unless one is already set
    pub(crate) fn read_snapshot_or_else(
        &self,
        obtain: impl FnOnce() -> Result<Address>,
    ) -> Result<Address> {
        let mut state = self.state.lock();
        if let Some(snapshot) = state.read_snapshot {
            return Ok(snapshot);
        }
        let snapshot = obtain()?;
        state.read_snapshot = Some(snapshot);
        Ok(snapshot)
    }

    pub(crate) fn activate(&self) -> Result<()> {
        let mut state = self.state.lock();
        match state.status {
            TransactionStatus::Initialized => {
                state.status = TransactionStatus::Active;
                Ok(())
            }
            other => Err(TesselError::invalid_state(format!(
                "Cannot start transaction {} from state {:?}",
                self.id, other
            ))),
        }
    }

    pub(crate) fn record_read(
        &self,
        stream: StreamId,
        serializer: &Arc<dyn Serializer>,
        keys: Option<&[Value]>,
    ) {
        self.state.lock().conflict_set.add(stream, serializer, keys);
    }

    pub(crate) fn add_write(
        &self,
        stream: StreamId,
        serializer: &Arc<dyn Serializer>,
        mutation: Mutation,
        keys: Option<&[Value]>,
    ) -> Address {
        self.state
            .lock()
            .write_set
            .add(stream, serializer, mutation, keys)
    }

    pub(crate) fn buffered(&self, stream: &StreamId) -> Vec<Arc<UpdateOp>> {
        self.state.lock().write_set.ops(stream).to_vec()
    }

    pub(crate) fn buffered_len(&self, stream: &StreamId) -> usize {
        self.state.lock().write_set.ops(stream).len()
    }

    pub(crate) fn buffered_op(&self, stream: &StreamId, index: Address) -> Option<Arc<UpdateOp>> {
        self.state.lock().write_set.op(stream, index)
    }

    /// Encoded write set and hashed read conflicts for the commit record
    pub(crate) fn commit_payload(&self) -> Result<(EncodedWrites, HashedConflictSet)> {
        let state = self.state.lock();
        Ok((state.write_set.encode()?, state.conflict_set.hashed()?))
    }

    pub(crate) fn mark_committed(&self, address: Option<Address>) -> Result<()> {
        let mut state = self.state.lock();
        match state.status {
            TransactionStatus::Active => {
                state.status = TransactionStatus::Committed;
                state.commit_address = address;
                Ok(())
            }
            other => Err(TesselError::invalid_state(format!(
                "Cannot commit transaction {} from state {:?}",
                self.id, other
            ))),
        }
    }

    /// Mark aborted and discard buffered work
    ///
    /// Returns false if the context was already terminal.
    pub(crate) fn mark_aborted(&self, cause: AbortCause) -> bool {
        let mut state = self.state.lock();
        match state.status {
            TransactionStatus::Committed | TransactionStatus::Aborted { .. } => false,
            _ => {
                state.status = TransactionStatus::Aborted { cause };
                state.write_set.clear();
                state.conflict_set.clear();
                true
            }
        }
    }
}
