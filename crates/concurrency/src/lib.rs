//! Transactional object layer for Tessel
//!
//! This crate turns an append-only shared log into in-memory, versioned
//! objects with optimistic transactions:
//! - Streams: root, snapshot and optimistic (read-after-write /
//!   write-after-write) cursors over one object's updates
//! - ConflictSet / WriteSet: what a transaction touched and buffered
//! - TransactionContext: per-transaction state shared by nested levels
//! - Txn: transaction variants, nesting, commit and abort
//! - VersionedObjectManager: the object, its attached stream and a hybrid
//!   optimistic / exclusive lock
//! - Runtime: collaborators, configuration and the retry loop
//!
//! Transactions are passed explicitly: every manager call takes an
//! `Option<&Txn>`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod conflict;
pub mod context;
pub mod lock;
pub mod manager;
mod retry;
pub mod runtime;
pub mod stream;
pub mod transaction;

pub use config::{RetryConfig, RuntimeConfig};
pub use conflict::{ConflictSet, EncodedWrites, WriteSet};
pub use context::{TransactionContext, TransactionStatus};
pub use lock::{HybridLock, HybridWriteGuard, Ticket};
pub use manager::{ManagerStats, VersionedObjectManager};
pub use runtime::{ObjectBuilder, Runtime};
pub use stream::{
    ConflictPolicy, OptimisticStream, RootCore, RootStream, SnapshotStream, StateMachineStream,
    StreamCheck, SyncTarget,
};
pub use transaction::{CommitOutcome, Transaction, TransactionBuilder, TransactionKind, Txn};
