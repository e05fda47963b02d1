//! State-machine streams
//!
//! A stream is a cursor over the ordered updates of one object. Streams
//! compose as decorators over a root:
//!
//! ```text
//! Root                          reads the shared log directly
//! Snapshot(root)                never moves past a pinned address
//! ReadAfterWrite(snapshot)      + the transaction's buffered writes;
//!                                 read keys enter the conflict set
//! WriteAfterWrite(snapshot)     + the transaction's buffered writes;
//!                                 written keys enter the conflict set
//! ```
//!
//! Every decorator owns its root, so "roll back to the parent" is: sync
//! with `SyncTarget::Optimistic`, apply what comes back, then `into_root`.

pub mod optimistic;
pub mod root;
pub mod snapshot;

pub use optimistic::{ConflictPolicy, OptimisticStream};
pub use root::{RootCore, RootStream};
pub use snapshot::SnapshotStream;

use std::fmt;
use std::sync::Arc;
use tessel_core::{Address, Result, StreamId, TesselError, UpdateOp, Value};

/// How far a sync should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    /// As far as the stream can see (the log tail for a root)
    Max,
    /// Undo speculative effects back to the committed view
    Optimistic,
    /// A specific log address (roots only)
    At(Address),
}

/// Outcome of a cheap freshness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCheck {
    /// The object reflects everything the stream can show
    UpToDate,
    /// A sync to `Max` may produce updates
    Max,
}

/// Root or decorated stream
pub enum StateMachineStream {
    /// Reads the log directly
    Root(RootStream),
    /// Pinned at a snapshot address
    Snapshot(SnapshotStream),
    /// Snapshot plus buffered writes, validating reads
    ReadAfterWrite(OptimisticStream),
    /// Snapshot plus buffered writes, validating writes
    WriteAfterWrite(OptimisticStream),
}

impl StateMachineStream {
    /// Stream id
    pub fn id(&self) -> StreamId {
        match self {
            Self::Root(s) => s.id(),
            Self::Snapshot(s) => s.id(),
            Self::ReadAfterWrite(s) | Self::WriteAfterWrite(s) => s.id(),
        }
    }

    /// Address of the last log update incorporated
    pub fn pos(&self) -> Address {
        match self {
            Self::Root(s) => s.pos(),
            Self::Snapshot(s) => s.pos(),
            Self::ReadAfterWrite(s) | Self::WriteAfterWrite(s) => s.pos(),
        }
    }

    /// Whether the object is current without contacting the log
    ///
    /// A root can never know that, so it always answers `Max`.
    pub fn check(&self) -> StreamCheck {
        match self {
            Self::Root(_) => StreamCheck::Max,
            Self::Snapshot(s) => s.check(),
            Self::ReadAfterWrite(s) | Self::WriteAfterWrite(s) => s.check(),
        }
    }

    /// Updates to apply, in order, to reach `target`
    ///
    /// `keys` are the conflict keys of the access driving the sync.
    pub fn sync(
        &mut self,
        target: SyncTarget,
        keys: Option<&[Value]>,
    ) -> Result<Vec<Arc<UpdateOp>>> {
        match self {
            Self::Root(s) => s.sync(target),
            Self::Snapshot(s) => s.sync(target),
            Self::ReadAfterWrite(s) | Self::WriteAfterWrite(s) => s.sync(target, keys),
        }
    }

    /// Record an update, returning its address
    ///
    /// Roots append durably and return a log address; optimistic streams
    /// buffer and return a transaction-local index.
    pub fn append(
        &mut self,
        method: &str,
        args: Vec<Value>,
        keys: Option<&[Value]>,
        keep_result: bool,
    ) -> Result<Address> {
        match self {
            Self::Root(s) => s.append(method, args, keep_result),
            Self::Snapshot(_) => Err(TesselError::unsupported(
                "snapshot stream doesn't support append",
            )),
            Self::ReadAfterWrite(s) | Self::WriteAfterWrite(s) => s.append(method, args, keys),
        }
    }

    /// The update recorded at `address`, if available
    pub fn consume_entry(&self, address: Address) -> Result<Option<Arc<UpdateOp>>> {
        match self {
            Self::Root(s) => Ok(s.consume_entry(address)),
            Self::Snapshot(_) => Err(TesselError::unsupported(
                "snapshot stream cannot keep entries",
            )),
            Self::ReadAfterWrite(s) | Self::WriteAfterWrite(s) => Ok(s.consume_entry(address)),
        }
    }

    /// Back to `ORIGIN`
    pub fn reset(&mut self) {
        match self {
            Self::Root(s) => s.reset(),
            Self::Snapshot(s) => s.reset(),
            Self::ReadAfterWrite(s) | Self::WriteAfterWrite(s) => s.reset(),
        }
    }

    /// True for an undecorated root
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root(_))
    }

    /// Drop every decorator
    pub fn into_root(self) -> RootStream {
        match self {
            Self::Root(s) => s,
            Self::Snapshot(s) => s.into_root(),
            Self::ReadAfterWrite(s) | Self::WriteAfterWrite(s) => s.into_root(),
        }
    }

    /// Short name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Root(_) => "root",
            Self::Snapshot(_) => "snapshot",
            Self::ReadAfterWrite(_) => "read-after-write",
            Self::WriteAfterWrite(_) => "write-after-write",
        }
    }
}

impl fmt::Debug for StateMachineStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachineStream")
            .field("kind", &self.kind())
            .field("id", &self.id().readable())
            .field("pos", &self.pos())
            .finish()
    }
}
