//! Optimistic stream: a snapshot plus the transaction's own buffered writes
//!
//! The stream exposes the writing transaction's buffered updates for its
//! stream as if they followed the snapshot. `optimistic_pos` counts how many
//! of them the object has had applied; `None` means the stream was never
//! synced.
//!
//! Rolling back (`SyncTarget::Optimistic`) erases those effects:
//! - nothing exposed: nothing to do
//! - the transaction committed and everything buffered was exposed: move
//!   the root forward to the commit address. If the commit record is all
//!   that lies past the snapshot, the object already reflects it. If other
//!   updates landed in between, the exposed writes are undone first and
//!   the root's updates, commit record included, are replayed in log order
//! - otherwise: the undo records of the exposed updates, newest first
//!
//! When the buffer no longer holds what was exposed (the transaction aborted
//! and discarded it) the stream reports `NoRollback`.

use super::root::RootStream;
use super::snapshot::SnapshotStream;
use super::{StreamCheck, SyncTarget};
use crate::context::TransactionContext;
use std::sync::Arc;
use tessel_core::{
    Address, Mutation, Result, Serializer, StreamId, TesselError, UpdateOp, Value,
};

/// When conflict keys enter the writer's conflict set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Keys passed to `sync` (reads) are recorded
    OnRead,
    /// Keys passed to `append` (writes) are recorded
    OnWrite,
}

/// Snapshot view extended with one transaction's buffered writes
pub struct OptimisticStream {
    snapshot: SnapshotStream,
    optimistic_pos: Option<usize>,
    writer: Arc<TransactionContext>,
    serializer: Arc<dyn Serializer>,
    policy: ConflictPolicy,
}

impl OptimisticStream {
    /// Layer `writer`'s buffer over `root` pinned at `snapshot`
    pub fn new(
        root: RootStream,
        snapshot: Address,
        writer: Arc<TransactionContext>,
        policy: ConflictPolicy,
    ) -> Self {
        let serializer = Arc::clone(root.core().serializer());
        Self {
            snapshot: SnapshotStream::new(root, snapshot),
            optimistic_pos: None,
            writer,
            serializer,
            policy,
        }
    }

    /// Stream id
    pub fn id(&self) -> StreamId {
        self.snapshot.id()
    }

    /// Position of the underlying root
    pub fn pos(&self) -> Address {
        self.snapshot.pos()
    }

    /// Buffered updates applied so far, `None` if never synced
    pub fn optimistic_pos(&self) -> Option<usize> {
        self.optimistic_pos
    }

    /// The transaction whose writes this stream exposes
    pub fn writer(&self) -> &Arc<TransactionContext> {
        &self.writer
    }

    /// Snapshot address the view was created for
    pub fn pinned(&self) -> Address {
        self.snapshot.pinned()
    }

    /// Unwrap to the underlying root
    pub fn into_root(self) -> RootStream {
        self.snapshot.into_root()
    }

    /// Up to date when the snapshot is and every buffered update is applied
    pub fn check(&self) -> StreamCheck {
        if self.snapshot.check() != StreamCheck::UpToDate {
            return StreamCheck::Max;
        }
        let buffered = self.writer.buffered_len(&self.id());
        let caught_up = match self.optimistic_pos {
            None => buffered == 0,
            Some(pos) => pos == buffered,
        };
        if caught_up {
            StreamCheck::UpToDate
        } else {
            StreamCheck::Max
        }
    }

    /// Updates to apply for `target`
    pub fn sync(
        &mut self,
        target: SyncTarget,
        keys: Option<&[Value]>,
    ) -> Result<Vec<Arc<UpdateOp>>> {
        match target {
            SyncTarget::Max => self.sync_forward(keys),
            SyncTarget::Optimistic => self.rollback(),
            SyncTarget::At(address) => Err(TesselError::unsupported(format!(
                "optimistic stream cannot sync to position {}",
                address
            ))),
        }
    }

    fn sync_forward(&mut self, keys: Option<&[Value]>) -> Result<Vec<Arc<UpdateOp>>> {
        let id = self.id();
        if self.policy == ConflictPolicy::OnRead {
            self.writer.record_read(id, &self.serializer, keys);
        }

        let buffered = self.writer.buffered(&id);
        let from = self.optimistic_pos.unwrap_or(0);
        if from > buffered.len() {
            return Err(TesselError::NoRollback {
                stream: id,
                reason: format!(
                    "{} buffered updates applied but only {} remain",
                    from,
                    buffered.len()
                ),
            });
        }

        let mut ops = match self.optimistic_pos {
            None => self.snapshot.sync(SyncTarget::Max)?,
            Some(_) => Vec::new(),
        };
        ops.extend(buffered[from..].iter().cloned());
        self.optimistic_pos = Some(buffered.len());
        Ok(ops)
    }

    fn rollback(&mut self) -> Result<Vec<Arc<UpdateOp>>> {
        let id = self.id();
        let exposed = match self.optimistic_pos {
            None | Some(0) => {
                self.optimistic_pos = None;
                return Ok(Vec::new());
            }
            Some(n) => n,
        };
        let buffered = self.writer.buffered(&id);

        if let Some(commit) = self.writer.commit_address() {
            if buffered.len() != exposed {
                return Err(TesselError::NoRollback {
                    stream: id,
                    reason: format!(
                        "committed at {} with {} of {} buffered updates applied",
                        commit,
                        exposed,
                        buffered.len()
                    ),
                });
            }
            let ops = self.snapshot.root_mut().sync_to(commit)?;
            self.optimistic_pos = None;
            if ops.iter().all(|op| op.address() == commit) {
                return Ok(Vec::new());
            }
            // Others committed between the snapshot and our commit: the
            // object must see them before our writes.
            let mut replay = Self::undo_exposed(id, &buffered[..exposed])?;
            replay.extend(ops);
            return Ok(replay);
        }

        if buffered.len() < exposed {
            return Err(TesselError::NoRollback {
                stream: id,
                reason: format!(
                    "{} buffered updates applied but only {} remain",
                    exposed,
                    buffered.len()
                ),
            });
        }
        let undo = Self::undo_exposed(id, &buffered[..exposed])?;
        self.optimistic_pos = None;
        Ok(undo)
    }

    fn undo_exposed(id: StreamId, exposed: &[Arc<UpdateOp>]) -> Result<Vec<Arc<UpdateOp>>> {
        exposed
            .iter()
            .rev()
            .map(|op| {
                op.undo().ok_or_else(|| TesselError::NoRollback {
                    stream: id,
                    reason: format!("buffered update {} has no undo record", op),
                })
            })
            .collect()
    }

    /// Buffer an update in the writer's write set
    ///
    /// Returns the transaction-local index, not a log address.
    pub fn append(
        &mut self,
        method: &str,
        args: Vec<Value>,
        keys: Option<&[Value]>,
    ) -> Result<Address> {
        let id = self.id();
        if self.policy == ConflictPolicy::OnWrite {
            self.writer.record_read(id, &self.serializer, keys);
        }
        Ok(self
            .writer
            .add_write(id, &self.serializer, Mutation::new(method, args), keys))
    }

    /// Buffered update at transaction-local `address`
    pub fn consume_entry(&self, address: Address) -> Option<Arc<UpdateOp>> {
        self.writer.buffered_op(&self.id(), address)
    }

    /// Reset the underlying root and forget what was exposed
    pub fn reset(&mut self) {
        self.snapshot.reset();
        self.optimistic_pos = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::root::RootCore;
    use tessel_core::{AbortCause, Applied, MsgPackSerializer, TxnId};
    use tessel_log::MemoryLog;

    fn setup() -> (Arc<MemoryLog>, RootStream, Arc<TransactionContext>) {
        let log = Arc::new(MemoryLog::new());
        let core = RootCore::new(StreamId::new(), log.clone(), Arc::new(MsgPackSerializer), 64);
        let ctx = Arc::new(TransactionContext::new(TxnId::new()));
        ctx.activate().unwrap();
        (log, RootStream::new(Arc::new(core)), ctx)
    }

    fn mark_applied(ops: &[Arc<UpdateOp>]) {
        for op in ops {
            op.record_applied(Applied::none().with_undo(format!("undo-{}", op.method()), vec![]));
        }
    }

    #[test]
    fn test_sync_exposes_buffer_incrementally() {
        let (_log, root, ctx) = setup();
        let mut s = OptimisticStream::new(root, 0, ctx, ConflictPolicy::OnRead);
        assert_eq!(s.check(), StreamCheck::UpToDate);
        assert_eq!(s.append("a", vec![], None).unwrap(), 0);
        assert_eq!(s.check(), StreamCheck::Max);
        assert_eq!(s.sync(SyncTarget::Max, None).unwrap().len(), 1);
        assert_eq!(s.check(), StreamCheck::UpToDate);
        assert_eq!(s.append("b", vec![], None).unwrap(), 1);
        let ops = s.sync(SyncTarget::Max, None).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].method(), "b");
        assert_eq!(s.optimistic_pos(), Some(2));
    }

    #[test]
    fn test_rollback_yields_undo_in_reverse() {
        let (_log, root, ctx) = setup();
        let mut s = OptimisticStream::new(root, 0, ctx, ConflictPolicy::OnRead);
        s.append("a", vec![], None).unwrap();
        s.append("b", vec![], None).unwrap();
        mark_applied(&s.sync(SyncTarget::Max, None).unwrap());
        let undo = s.sync(SyncTarget::Optimistic, None).unwrap();
        let methods: Vec<_> = undo.iter().map(|u| u.method().to_string()).collect();
        assert_eq!(methods, vec!["undo-b", "undo-a"]);
        assert_eq!(s.optimistic_pos(), None);
        assert!(s.sync(SyncTarget::Optimistic, None).unwrap().is_empty());
    }

    #[test]
    fn test_rollback_after_abort_is_no_rollback() {
        let (_log, root, ctx) = setup();
        let mut s = OptimisticStream::new(root, 0, Arc::clone(&ctx), ConflictPolicy::OnRead);
        s.append("a", vec![], None).unwrap();
        mark_applied(&s.sync(SyncTarget::Max, None).unwrap());
        ctx.mark_aborted(AbortCause::User);
        assert!(matches!(
            s.sync(SyncTarget::Optimistic, None),
            Err(TesselError::NoRollback { .. })
        ));
    }

    #[test]
    fn test_missing_undo_is_no_rollback() {
        let (_log, root, ctx) = setup();
        let mut s = OptimisticStream::new(root, 0, ctx, ConflictPolicy::OnRead);
        s.append("a", vec![], None).unwrap();
        s.sync(SyncTarget::Max, None).unwrap();
        assert!(matches!(
            s.sync(SyncTarget::Optimistic, None),
            Err(TesselError::NoRollback { .. })
        ));
        assert_eq!(s.optimistic_pos(), Some(1));
    }

    #[test]
    fn test_conflict_policies() {
        let (_log, root, ctx) = setup();
        let id = root.id();
        let key = [Value::from("k")];

        let mut on_read = OptimisticStream::new(root.detached(), 0, Arc::clone(&ctx), ConflictPolicy::OnRead);
        on_read.append("a", vec![], Some(&key[..])).unwrap();
        assert!(!ctx.has_read_conflict(&id));
        on_read.sync(SyncTarget::Max, Some(&key[..])).unwrap();
        assert!(ctx.has_read_conflict(&id));

        let (_log, root, ctx) = setup();
        let id = root.id();
        let mut on_write = OptimisticStream::new(root, 0, Arc::clone(&ctx), ConflictPolicy::OnWrite);
        on_write.sync(SyncTarget::Max, Some(&key[..])).unwrap();
        assert!(!ctx.has_read_conflict(&id));
        on_write.append("a", vec![], Some(&key[..])).unwrap();
        assert!(ctx.has_read_conflict(&id));
    }

    #[test]
    fn test_consume_entry_by_local_index() {
        let (_log, root, ctx) = setup();
        let mut s = OptimisticStream::new(root, 0, ctx, ConflictPolicy::OnWrite);
        s.append("a", vec![], None).unwrap();
        s.append("b", vec![], None).unwrap();
        assert_eq!(s.consume_entry(1).unwrap().method(), "b");
        assert!(s.consume_entry(2).is_none());
    }

    #[test]
    fn test_positions_unsupported() {
        let (_log, root, ctx) = setup();
        let mut s = OptimisticStream::new(root, 0, ctx, ConflictPolicy::OnRead);
        assert!(matches!(
            s.sync(SyncTarget::At(3), None),
            Err(TesselError::Unsupported(_))
        ));
    }
}
