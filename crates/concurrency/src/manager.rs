//! Versioned object manager
//!
//! One manager per replicated object. It owns the in-memory object, the
//! stream currently attached to it, and the hybrid lock protecting both.
//!
//! ## Read path
//!
//! ```text
//! access(txn, keys, f)
//!   |
//!   +-- optimistic ticket? stream fits txn? stream up to date?
//!   |        yes: run f, validate ticket -> done (no lock, no log)
//!   |
//!   +-- exclusive lock
//!         check_and_switch   install the stream txn needs
//!         sync_unsafe(Max)   replay updates onto the object
//!         run f
//! ```
//!
//! ## Sync
//!
//! `sync_unsafe` runs under the exclusive lock and makes up to `trim_retry`
//! attempts. `NoRollback` resets the object and retries. `Trimmed` resets
//! and retries until the last attempt, where it aborts the transaction
//! (cause `Trim`) or, outside a transaction, is returned as is. A failing
//! upcall resets the object and fails the sync.
//!
//! The object only ever reflects a contiguous prefix of its stream, plus
//! (while a transaction's stream is attached) that transaction's own
//! buffered writes.

use crate::lock::HybridLock;
use crate::runtime::{ObjectBuilder, Runtime};
use crate::stream::{RootCore, RootStream, StateMachineStream, StreamCheck, SyncTarget};
use crate::transaction::{TransactionBuilder, Txn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessel_core::{
    AbortCause, Address, Result, StateMachine, StreamId, TesselError, UpdateOp, Value,
};
use tracing::{debug, error, info, trace};

struct ManagerState<T> {
    object: T,
    stream: StateMachineStream,
}

/// Counters of one manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Times the object was discarded and rebuilt from scratch
    pub resets: u64,
    /// Trims encountered while syncing
    pub trims: u64,
    /// Times a decorated stream was rolled back to the root
    pub rollbacks: u64,
    /// Reads served without taking the lock
    pub optimistic_reads: u64,
    /// Reads that took the lock and synced
    pub synced_reads: u64,
}

#[derive(Default)]
struct Counters {
    resets: AtomicU64,
    trims: AtomicU64,
    rollbacks: AtomicU64,
    optimistic_reads: AtomicU64,
    synced_reads: AtomicU64,
}

/// In-memory, versioned copy of one replicated object
pub struct VersionedObjectManager<T: StateMachine> {
    builder: ObjectBuilder<T>,
    root: Arc<RootCore>,
    lock: HybridLock<ManagerState<T>>,
    counters: Counters,
}

impl<T: StateMachine> VersionedObjectManager<T> {
    pub(crate) fn new(builder: ObjectBuilder<T>) -> Self {
        let runtime = builder.runtime();
        let root = Arc::new(RootCore::new(
            builder.stream(),
            Arc::clone(runtime.log()),
            Arc::clone(builder.serializer()),
            runtime.config().undo_history,
        ));
        let state = ManagerState {
            object: builder.blank(),
            stream: StateMachineStream::Root(RootStream::new(Arc::clone(&root))),
        };
        Self {
            builder,
            root,
            lock: HybridLock::new(state),
            counters: Counters::default(),
        }
    }

    /// Stream the object lives on
    pub fn id(&self) -> StreamId {
        self.root.id()
    }

    /// Builder the manager was opened with
    pub fn builder(&self) -> &ObjectBuilder<T> {
        &self.builder
    }

    fn runtime(&self) -> &Runtime {
        self.builder.runtime()
    }

    /// Log address of the last update the object reflects
    pub fn version(&self) -> Address {
        self.lock.read().stream.pos()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            resets: self.counters.resets.load(Ordering::Relaxed),
            trims: self.counters.trims.load(Ordering::Relaxed),
            rollbacks: self.counters.rollbacks.load(Ordering::Relaxed),
            optimistic_reads: self.counters.optimistic_reads.load(Ordering::Relaxed),
            synced_reads: self.counters.synced_reads.load(Ordering::Relaxed),
        }
    }

    /// Read the object as `txn` (or, with `None`, the latest committed
    /// state) should see it
    ///
    /// `keys` identify what the read touches; a read-after-write
    /// transaction validates them at commit. `read_fn` may run more than
    /// once.
    pub fn access<R>(
        &self,
        txn: Option<&Txn>,
        keys: Option<&[Value]>,
        read_fn: impl Fn(&T) -> R,
    ) -> Result<R> {
        if let Some(ticket) = self.lock.try_optimistic() {
            let served = self.lock.read_optimistic(ticket, |state| {
                if self.stream_fits(&state.stream, txn)
                    && state.stream.check() == StreamCheck::UpToDate
                {
                    Some(read_fn(&state.object))
                } else {
                    None
                }
            });
            if let Some(Some(value)) = served {
                if let Some(t) = txn {
                    t.record_unsynced_read(self.id(), self.builder.serializer(), keys);
                }
                self.counters.optimistic_reads.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
        }

        let mut guard = self.lock.write();
        let state = &mut *guard;
        self.check_and_switch(state, txn)?;
        self.sync_unsafe(state, txn, SyncTarget::Max, keys)?;
        self.counters.synced_reads.fetch_add(1, Ordering::Relaxed);
        Ok(read_fn(&state.object))
    }

    /// Record an update, returning its log address (or, inside an
    /// optimistic transaction, its transaction-local index)
    ///
    /// With `keep_result` the update's upcall result can later be fetched
    /// with `get_upcall_result`.
    pub fn log_update(
        &self,
        txn: Option<&Txn>,
        method: &str,
        args: Vec<Value>,
        keys: Option<&[Value]>,
        keep_result: bool,
    ) -> Result<Address> {
        let mut stream = self.fresh_stream(txn)?;
        let address = stream.append(method, args, keys, keep_result)?;
        trace!(stream = %self.id(), kind = stream.kind(), method, address, "Log update");
        Ok(address)
    }

    /// Result of the update recorded at `address`
    ///
    /// Syncs as far as needed to compute it.
    ///
    /// # Errors
    ///
    /// `UpcallMissing` if a full sync did not produce the result. A kept
    /// log address is released on failure; its result cannot be asked for
    /// again.
    pub fn get_upcall_result(
        &self,
        txn: Option<&Txn>,
        address: Address,
        keys: Option<&[Value]>,
    ) -> Result<Option<Value>> {
        let view = self.fresh_stream(txn)?;
        let outcome = self.upcall_result(&view, txn, address, keys);
        if outcome.is_err() && view.is_root() {
            self.root.release(address);
        }
        outcome
    }

    fn upcall_result(
        &self,
        view: &StateMachineStream,
        txn: Option<&Txn>,
        address: Address,
        keys: Option<&[Value]>,
    ) -> Result<Option<Value>> {
        if let Some(result) = Self::computed(view, address)? {
            return Ok(result);
        }

        // A writer holding the lock may be applying our update right now
        if self.lock.is_write_locked() {
            let _shared = self.lock.read();
            if let Some(result) = Self::computed(view, address)? {
                return Ok(result);
            }
        }

        let mut guard = self.lock.write();
        let state = &mut *guard;
        self.check_and_switch(state, txn)?;
        self.sync_unsafe(state, txn, SyncTarget::Max, keys)?;
        if let Some(result) = Self::computed(view, address)? {
            return Ok(result);
        }
        Err(TesselError::UpcallMissing {
            stream: self.id(),
            address,
            version: state.stream.pos(),
        })
    }

    /// Replay the object forward to the latest state `txn` can see
    pub fn sync(&self, txn: Option<&Txn>) -> Result<()> {
        let mut guard = self.lock.write();
        let state = &mut *guard;
        self.check_and_switch(state, txn)?;
        self.sync_unsafe(state, txn, SyncTarget::Max, None)
    }

    /// Discard the object and every attached decorator
    ///
    /// The next access rebuilds the object from the start of its stream.
    pub fn reset(&self) {
        let mut guard = self.lock.write();
        self.reset_unsafe(&mut guard);
    }

    /// Run `body` transactionally
    ///
    /// Inside `txn` the body runs as a nested transaction (no retry at this
    /// level); otherwise a new transaction is retried per the runtime's
    /// retry policy.
    pub fn tx_execute<R>(
        &self,
        txn: Option<&Txn>,
        builder: TransactionBuilder,
        body: impl FnMut(&Txn) -> Result<R>,
    ) -> Result<R> {
        match txn {
            Some(t) => t.nested(&builder, body),
            None => self.runtime().transaction(builder, body),
        }
    }

    /// Stream accesses through `txn` go to, built fresh over the root
    fn fresh_stream(&self, txn: Option<&Txn>) -> Result<StateMachineStream> {
        let root = RootStream::new(Arc::clone(&self.root));
        match txn {
            None => Ok(StateMachineStream::Root(root)),
            Some(t) => {
                t.ensure_active()?;
                t.active_stream(root)
            }
        }
    }

    fn computed(stream: &StateMachineStream, address: Address) -> Result<Option<Option<Value>>> {
        Ok(stream
            .consume_entry(address)?
            .and_then(|op| op.upcall_result()))
    }

    fn stream_fits(&self, stream: &StateMachineStream, txn: Option<&Txn>) -> bool {
        match txn {
            Some(t) => t.matches(stream),
            None => stream.is_root(),
        }
    }

    /// Install the stream `txn` needs, rolling back whatever is attached
    fn check_and_switch(&self, state: &mut ManagerState<T>, txn: Option<&Txn>) -> Result<()> {
        let Some(t) = txn else {
            return self.rollback_to_root(state);
        };
        t.ensure_active()?;
        if t.matches(&state.stream) {
            return Ok(());
        }
        let snapshot = t.stream_snapshot()?;
        self.rollback_to_root(state)?;
        let root = self.take_root(state);
        state.stream = t.wrap(root, snapshot);
        debug!(
            stream = %self.id(),
            txn = %t.id(),
            kind = state.stream.kind(),
            snapshot,
            "Switched stream"
        );
        Ok(())
    }

    /// Undo every decorator's effects and leave the bare root attached
    fn rollback_to_root(&self, state: &mut ManagerState<T>) -> Result<()> {
        if state.stream.is_root() {
            return Ok(());
        }
        self.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
        match state.stream.sync(SyncTarget::Optimistic, None) {
            Ok(ops) => self.apply_all(state, &ops)?,
            Err(TesselError::NoRollback { reason, .. }) => {
                info!(stream = %self.id(), %reason, "Failed to rollback, resetting");
                self.reset_unsafe(state);
                return Ok(());
            }
            Err(e @ TesselError::Trimmed { .. }) => {
                info!(stream = %self.id(), error = %e, "Trim during rollback, resetting");
                self.reset_unsafe(state);
                return Ok(());
            }
            Err(e) => {
                self.reset_unsafe(state);
                return Err(e);
            }
        }
        let root = self.take_root(state);
        state.stream = StateMachineStream::Root(root);
        trace!(stream = %self.id(), version = state.stream.pos(), "Rolled back to root");
        Ok(())
    }

    fn take_root(&self, state: &mut ManagerState<T>) -> RootStream {
        let placeholder = StateMachineStream::Root(RootStream::new(Arc::clone(&self.root)));
        std::mem::replace(&mut state.stream, placeholder).into_root()
    }

    fn sync_unsafe(
        &self,
        state: &mut ManagerState<T>,
        txn: Option<&Txn>,
        target: SyncTarget,
        keys: Option<&[Value]>,
    ) -> Result<()> {
        let bound = self.runtime().config().trim_retry.max(1);
        for attempt in 0..bound {
            trace!(
                stream = %self.id(),
                version = state.stream.pos(),
                ?target,
                attempt,
                "Sync"
            );
            match state.stream.sync(target, keys) {
                Ok(ops) => return self.apply_all(state, &ops),
                Err(TesselError::NoRollback { reason, .. }) => {
                    info!(stream = %self.id(), %reason, "Failed to rollback, resetting and retrying");
                    self.reset_unsafe(state);
                }
                Err(e @ TesselError::Trimmed { .. }) => {
                    self.counters.trims.fetch_add(1, Ordering::Relaxed);
                    if attempt + 1 >= bound {
                        return Err(match txn {
                            Some(t) => t.abort_on(AbortCause::Trim, self.id(), e),
                            None => e,
                        });
                    }
                    info!(stream = %self.id(), attempt, "Encountered trim during playback, resetting and retrying");
                    self.reset_unsafe(state);
                }
                Err(e) => return Err(e),
            }
            // Restore the transactional stream the reset removed
            self.check_and_switch(state, txn)?;
        }
        Err(TesselError::SyncExhausted {
            stream: self.id(),
            attempts: bound,
        })
    }

    fn apply_all(&self, state: &mut ManagerState<T>, ops: &[Arc<UpdateOp>]) -> Result<()> {
        for op in ops {
            match state.object.apply(op.method(), op.args()) {
                Ok(applied) => op.record_applied(applied),
                Err(e) => {
                    error!(
                        stream = %self.id(),
                        op = %op,
                        error = %e,
                        "Couldn't execute upcall"
                    );
                    let failure = TesselError::ApplyFailed {
                        stream: self.id(),
                        address: op.address(),
                        method: op.method().to_string(),
                        reason: e.to_string(),
                    };
                    self.reset_unsafe(state);
                    return Err(failure);
                }
            }
        }
        Ok(())
    }

    fn reset_unsafe(&self, state: &mut ManagerState<T>) {
        state.object = self.builder.blank();
        let mut root = self.take_root(state);
        root.reset();
        state.stream = StateMachineStream::Root(root);
        self.counters.resets.fetch_add(1, Ordering::Relaxed);
        debug!(stream = %self.id(), "Reset");
    }
}

impl<T: StateMachine> fmt::Debug for VersionedObjectManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("VersionedObjectManager");
        out.field("stream", &self.id());
        match self.lock.try_read() {
            Some(state) => out
                .field("kind", &state.stream.kind())
                .field("version", &state.stream.pos()),
            None => out.field("version", &"locked"),
        };
        out.field("stats", &self.stats()).finish()
    }
}

impl<T: StateMachine> fmt::Display for VersionedObjectManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = std::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        write!(f, "{}[{}]@", short, self.id().readable())?;
        match self.lock.try_read() {
            Some(state) => write!(f, "{}", state.stream.pos()),
            None => f.write_str("?"),
        }
    }
}
