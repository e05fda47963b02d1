//! Snapshot stream: a root pinned at a fixed address

use super::root::RootStream;
use super::{StreamCheck, SyncTarget};
use std::sync::Arc;
use tessel_core::{Address, Result, StreamId, TesselError, UpdateOp};

/// Read-only view of a root that never moves past its pin
pub struct SnapshotStream {
    root: RootStream,
    /// Address the view was created for
    pinned: Address,
    /// Address actually reached, which may be below `pinned`
    snapshot_address: Address,
}

impl SnapshotStream {
    /// Pin `root` at `snapshot`
    pub fn new(root: RootStream, snapshot: Address) -> Self {
        Self {
            root,
            pinned: snapshot,
            snapshot_address: snapshot,
        }
    }

    /// Stream id
    pub fn id(&self) -> StreamId {
        self.root.id()
    }

    /// Position of the underlying root
    pub fn pos(&self) -> Address {
        self.root.pos()
    }

    /// Address this view was pinned at
    pub fn pinned(&self) -> Address {
        self.pinned
    }

    /// Underlying root
    pub fn root(&self) -> &RootStream {
        &self.root
    }

    pub(crate) fn root_mut(&mut self) -> &mut RootStream {
        &mut self.root
    }

    /// Unwrap to the underlying root
    pub fn into_root(self) -> RootStream {
        self.root
    }

    /// Up to date once the root sits at the snapshot
    pub fn check(&self) -> StreamCheck {
        if self.root.pos() == self.snapshot_address {
            StreamCheck::UpToDate
        } else {
            StreamCheck::Max
        }
    }

    /// Bring the root to the snapshot
    ///
    /// After the first sync the reached position (the last update at or
    /// below the pin) becomes the snapshot, so later checks pass without
    /// another read.
    pub fn sync(&mut self, target: SyncTarget) -> Result<Vec<Arc<UpdateOp>>> {
        match target {
            SyncTarget::Optimistic => Ok(Vec::new()),
            SyncTarget::At(address) => Err(TesselError::unsupported(format!(
                "snapshot stream cannot sync to position {}",
                address
            ))),
            SyncTarget::Max => {
                if self.root.pos() == self.snapshot_address {
                    return Ok(Vec::new());
                }
                let ops = self.root.sync_to(self.snapshot_address)?;
                self.snapshot_address = self.root.pos();
                Ok(ops)
            }
        }
    }

    /// Reset the underlying root
    pub fn reset(&mut self) {
        self.root.reset();
        self.snapshot_address = self.pinned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::root::RootCore;
    use tessel_core::{MsgPackSerializer, Serializer, SharedLog, SmrRecord, TxRecord};
    use tessel_log::MemoryLog;

    fn root_with(log: &Arc<MemoryLog>, stream: StreamId) -> RootStream {
        RootStream::new(Arc::new(RootCore::new(
            stream,
            log.clone(),
            Arc::new(MsgPackSerializer),
            64,
        )))
    }

    fn append(log: &MemoryLog, stream: StreamId) {
        let payload = MsgPackSerializer.encode(&[]).unwrap();
        log.append(TxRecord::single(
            stream,
            SmrRecord {
                method: "inc".into(),
                payload,
            },
        ))
        .unwrap();
    }

    #[test]
    fn test_never_passes_pin() {
        let log = Arc::new(MemoryLog::new());
        let s = StreamId::new();
        for _ in 0..5 {
            append(&log, s);
        }
        let mut snap = SnapshotStream::new(root_with(&log, s), 3);
        assert_eq!(snap.check(), StreamCheck::Max);
        let ops = snap.sync(SyncTarget::Max).unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(snap.pos(), 3);
        assert_eq!(snap.check(), StreamCheck::UpToDate);
        append(&log, s);
        assert!(snap.sync(SyncTarget::Max).unwrap().is_empty());
        assert_eq!(snap.pos(), 3);
    }

    #[test]
    fn test_rerecords_reached_address() {
        let log = Arc::new(MemoryLog::new());
        let s = StreamId::new();
        let other = StreamId::new();
        append(&log, s);
        append(&log, other);
        append(&log, other);
        let mut snap = SnapshotStream::new(root_with(&log, s), 3);
        snap.sync(SyncTarget::Max).unwrap();
        assert_eq!(snap.pos(), 1);
        assert_eq!(snap.pinned(), 3);
        assert_eq!(snap.check(), StreamCheck::UpToDate);
    }

    #[test]
    fn test_optimistic_is_noop_and_positions_unsupported() {
        let log = Arc::new(MemoryLog::new());
        let mut snap = SnapshotStream::new(root_with(&log, StreamId::new()), 0);
        assert!(snap.sync(SyncTarget::Optimistic).unwrap().is_empty());
        assert!(matches!(
            snap.sync(SyncTarget::At(1)),
            Err(TesselError::Unsupported(_))
        ));
    }
}
