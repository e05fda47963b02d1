//! Transactions
//!
//! A transaction decides which stream an object manager reads through and
//! what happens at commit. Three variants:
//!
//! | Kind              | Stream installed             | Snapshot obtained       | Commit               |
//! |-------------------|------------------------------|-------------------------|----------------------|
//! | `Snapshot`        | `Snapshot` pinned at address | at begin (or requested) | read-only, no append |
//! | `ReadAfterWrite`  | `ReadAfterWrite` over buffer | lazily, on first access | append write set     |
//! | `WriteAfterWrite` | `WriteAfterWrite` over buffer| eagerly, at begin       | append write set     |
//!
//! The transaction is passed explicitly to every manager call as a `&Txn`.
//! Nesting is explicit too: `Txn::begin_nested` returns a handle sharing the
//! parent's context, so an inner abort is visible to every level.
//!
//! Dropping an outermost handle that was neither committed nor aborted
//! aborts it with `AbortCause::User`.

use crate::context::{TransactionContext, TransactionStatus};
use crate::runtime::Runtime;
use crate::stream::{
    ConflictPolicy, OptimisticStream, RootStream, SnapshotStream, StateMachineStream,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessel_core::{
    AbortCause, Address, Result, Serializer, StreamId, TesselError, TxRecord, TxnId, Value,
};
use tracing::{debug, warn};

/// Transaction variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// Read-only view pinned at one address
    Snapshot,
    /// Optimistic; reads are validated at commit
    ReadAfterWrite,
    /// Optimistic; writes are validated at commit
    WriteAfterWrite,
}

/// Parameters of a transaction to begin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionBuilder {
    kind: TransactionKind,
    snapshot: Option<Address>,
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::read_after_write()
    }
}

impl TransactionBuilder {
    /// Snapshot transaction at the sequencer's current timestamp
    pub fn snapshot() -> Self {
        Self {
            kind: TransactionKind::Snapshot,
            snapshot: None,
        }
    }

    /// Read-after-write transaction
    pub fn read_after_write() -> Self {
        Self {
            kind: TransactionKind::ReadAfterWrite,
            snapshot: None,
        }
    }

    /// Write-after-write transaction
    pub fn write_after_write() -> Self {
        Self {
            kind: TransactionKind::WriteAfterWrite,
            snapshot: None,
        }
    }

    /// Pin reads to `address` instead of asking the sequencer
    pub fn at(mut self, address: Address) -> Self {
        self.snapshot = Some(address);
        self
    }

    /// Variant to begin
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Requested snapshot address
    pub fn requested_snapshot(&self) -> Option<Address> {
        self.snapshot
    }
}

/// One level of a (possibly nested) transaction
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    kind: TransactionKind,
    started: Instant,
    parent: Option<Arc<Transaction>>,
    /// Read snapshot of the enclosing level, restored when a nested
    /// snapshot transaction commits
    previous_snapshot: Option<Address>,
}

impl Transaction {
    /// Id of this level
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Variant of this level
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Enclosing level, if nested
    pub fn parent(&self) -> Option<&Arc<Transaction>> {
        self.parent.as_ref()
    }

    /// Nesting depth (0 for the outermost)
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent.as_ref();
        while let Some(p) = current {
            depth += 1;
            current = p.parent.as_ref();
        }
        depth
    }

    /// Time since this level began
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// What a successful commit did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The write set landed at this log address
    Committed(Address),
    /// Nothing to write; no log append happened
    NoWrite,
    /// Nested commit; writes stay buffered for the outermost level
    Folded,
}

impl CommitOutcome {
    /// Log address of the commit record, if one was appended
    pub fn address(&self) -> Option<Address> {
        match self {
            CommitOutcome::Committed(a) => Some(*a),
            _ => None,
        }
    }
}

/// Handle to an in-flight transaction
pub struct Txn {
    runtime: Runtime,
    context: Arc<TransactionContext>,
    transaction: Arc<Transaction>,
}

impl Txn {
    pub(crate) fn begin(runtime: Runtime, builder: &TransactionBuilder) -> Result<Txn> {
        let context = Arc::new(TransactionContext::new(TxnId::new()));
        context.activate()?;
        let txn = Txn {
            runtime,
            context,
            transaction: Arc::new(Transaction {
                id: TxnId::new(),
                kind: builder.kind,
                started: Instant::now(),
                parent: None,
                previous_snapshot: None,
            }),
        };
        txn.pin_snapshot(builder.snapshot)?;
        debug!(
            txn = %txn.id(),
            kind = ?builder.kind,
            snapshot = ?txn.context.read_snapshot(),
            "Transaction begin"
        );
        Ok(txn)
    }

    /// Begin a nested transaction sharing this one's context
    pub fn begin_nested(&self, builder: &TransactionBuilder) -> Result<Txn> {
        self.ensure_active()?;
        let txn = Txn {
            runtime: self.runtime.clone(),
            context: Arc::clone(&self.context),
            transaction: Arc::new(Transaction {
                id: TxnId::new(),
                kind: builder.kind,
                started: Instant::now(),
                parent: Some(Arc::clone(&self.transaction)),
                previous_snapshot: self.context.read_snapshot(),
            }),
        };
        if let Err(e) = txn.pin_snapshot(builder.snapshot) {
            return Err(txn.fail(e));
        }
        debug!(
            txn = %txn.id(),
            depth = txn.transaction.depth(),
            kind = ?builder.kind,
            "Nested transaction begin"
        );
        Ok(txn)
    }

    fn pin_snapshot(&self, requested: Option<Address>) -> Result<()> {
        match self.transaction.kind {
            TransactionKind::Snapshot => {
                let snapshot = match requested {
                    Some(address) => address,
                    None => self.obtain_snapshot()?,
                };
                self.context.set_read_snapshot(Some(snapshot));
            }
            TransactionKind::ReadAfterWrite => {
                if let Some(address) = requested {
                    self.context.read_snapshot_or_else(|| Ok(address))?;
                }
            }
            TransactionKind::WriteAfterWrite => {
                let sequencer = self.runtime.sequencer();
                self.context.read_snapshot_or_else(|| match requested {
                    Some(address) => Ok(address),
                    None => sequencer.next_snapshot_timestamp(),
                })?;
            }
        }
        Ok(())
    }

    fn obtain_snapshot(&self) -> Result<Address> {
        match self.context.read_snapshot() {
            Some(address) => Ok(address),
            None => self.runtime.sequencer().next_snapshot_timestamp(),
        }
    }

    /// Id of the outermost transaction (the one the log sees)
    pub fn id(&self) -> TxnId {
        self.context.id()
    }

    /// Variant of this level
    pub fn kind(&self) -> TransactionKind {
        self.transaction.kind
    }

    /// This level
    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.transaction
    }

    /// Shared context
    pub fn context(&self) -> &Arc<TransactionContext> {
        &self.context
    }

    /// Owning runtime
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// True unless this is the outermost level
    pub fn is_nested(&self) -> bool {
        self.transaction.parent.is_some()
    }

    /// Status of the shared context
    pub fn status(&self) -> TransactionStatus {
        self.context.status()
    }

    /// Address reads are pinned to, once obtained
    pub fn read_snapshot(&self) -> Option<Address> {
        self.context.read_snapshot()
    }

    /// Fail unless the shared context is active
    ///
    /// An aborted context reports the abort itself, so callers deep in a
    /// nested body see the same cause the outer level will.
    pub fn ensure_active(&self) -> Result<()> {
        match self.context.status() {
            TransactionStatus::Active => Ok(()),
            TransactionStatus::Aborted { cause } => Err(self.aborted_error(cause, None, None)),
            _ => self.context.ensure_active(),
        }
    }

    /// Whether `stream` is already the stream this transaction would install
    pub(crate) fn matches(&self, stream: &StateMachineStream) -> bool {
        match (self.transaction.kind, stream) {
            (TransactionKind::Snapshot, StateMachineStream::Snapshot(s)) => {
                self.context.read_snapshot() == Some(s.pinned())
            }
            (TransactionKind::ReadAfterWrite, StateMachineStream::ReadAfterWrite(s))
            | (TransactionKind::WriteAfterWrite, StateMachineStream::WriteAfterWrite(s)) => {
                Arc::ptr_eq(s.writer(), &self.context) && self.context.is_active()
            }
            _ => false,
        }
    }

    /// Snapshot the installed stream is pinned to
    pub(crate) fn stream_snapshot(&self) -> Result<Address> {
        let sequencer = self.runtime.sequencer();
        self.context
            .read_snapshot_or_else(|| sequencer.next_snapshot_timestamp())
    }

    /// Wrap `root` in this transaction's decorator
    pub(crate) fn active_stream(&self, root: RootStream) -> Result<StateMachineStream> {
        let snapshot = self.stream_snapshot()?;
        Ok(self.wrap(root, snapshot))
    }

    /// Wrap `root` in this transaction's decorator pinned at `snapshot`
    pub(crate) fn wrap(&self, root: RootStream, snapshot: Address) -> StateMachineStream {
        let context = Arc::clone(&self.context);
        match self.transaction.kind {
            TransactionKind::Snapshot => {
                StateMachineStream::Snapshot(SnapshotStream::new(root, snapshot))
            }
            TransactionKind::ReadAfterWrite => StateMachineStream::ReadAfterWrite(
                OptimisticStream::new(root, snapshot, context, ConflictPolicy::OnRead),
            ),
            TransactionKind::WriteAfterWrite => StateMachineStream::WriteAfterWrite(
                OptimisticStream::new(root, snapshot, context, ConflictPolicy::OnWrite),
            ),
        }
    }

    /// Record a read served without a sync
    pub(crate) fn record_unsynced_read(
        &self,
        stream: StreamId,
        serializer: &Arc<dyn Serializer>,
        keys: Option<&[Value]>,
    ) {
        if self.transaction.kind == TransactionKind::ReadAfterWrite {
            self.context.record_read(stream, serializer, keys);
        }
    }

    /// Commit this level
    ///
    /// # Errors
    ///
    /// `TransactionAborted` if the context was aborted or the log rejected
    /// the write set; the cause is classified from the log's error.
    pub fn commit(self) -> Result<CommitOutcome> {
        self.ensure_active()?;

        if self.is_nested() {
            if self.transaction.kind == TransactionKind::Snapshot {
                self.context
                    .set_read_snapshot(self.transaction.previous_snapshot);
                return Ok(CommitOutcome::NoWrite);
            }
            return Ok(CommitOutcome::Folded);
        }

        if self.context.is_read_only() {
            self.context.mark_committed(None)?;
            debug!(txn = %self.id(), "Transaction commit (no write)");
            return Ok(CommitOutcome::NoWrite);
        }

        if self.transaction.kind == TransactionKind::Snapshot {
            return Err(self.abort(
                AbortCause::Unsupported,
                Some(TesselError::unsupported(
                    "snapshot transaction cannot commit writes",
                )),
            ));
        }

        let (encoded, read_conflicts) = match self.context.commit_payload() {
            Ok(payload) => payload,
            Err(e) => return Err(self.abort(e.classify(), Some(e))),
        };
        let record = TxRecord {
            txn: Some(self.id()),
            read_snapshot: self.context.read_snapshot(),
            writes: encoded.writes,
            write_conflicts: encoded.conflicts,
            read_conflicts,
        };
        let updates = record.update_count();

        match self.runtime.log().append(record) {
            Ok(address) => {
                self.context.mark_committed(Some(address))?;
                debug!(txn = %self.id(), address, updates, "Transaction commit");
                Ok(CommitOutcome::Committed(address))
            }
            Err(e) => Err(self.abort(e.classify(), Some(e))),
        }
    }

    /// Abort the shared context, returning the error to raise
    ///
    /// An abort error passed as `source` is returned unchanged so every
    /// level reports the original cause.
    pub fn abort(&self, cause: AbortCause, source: Option<TesselError>) -> TesselError {
        if let Some(e) = source {
            if e.abort_cause().is_some() {
                self.context.mark_aborted(e.classify());
                return e;
            }
            let stream = match &e {
                TesselError::Conflict { stream, .. } => Some(*stream),
                TesselError::Trimmed { stream, .. } => *stream,
                _ => None,
            };
            self.mark_aborted(cause);
            return self.aborted_error(cause, stream, Some(e));
        }
        self.mark_aborted(cause);
        self.aborted_error(cause, None, None)
    }

    /// Abort attributing the failure to `stream`
    pub(crate) fn abort_on(
        &self,
        cause: AbortCause,
        stream: StreamId,
        source: TesselError,
    ) -> TesselError {
        self.mark_aborted(cause);
        self.aborted_error(cause, Some(stream), Some(source))
    }

    /// Mark the context aborted for a failed body and hand `error` back
    pub(crate) fn fail(&self, error: TesselError) -> TesselError {
        self.mark_aborted(error.classify());
        error
    }

    fn mark_aborted(&self, cause: AbortCause) {
        if self.context.mark_aborted(cause) {
            warn!(
                txn = %self.id(),
                %cause,
                snapshot = ?self.context.read_snapshot(),
                "Transaction aborted"
            );
        }
    }

    fn aborted_error(
        &self,
        cause: AbortCause,
        stream: Option<StreamId>,
        source: Option<TesselError>,
    ) -> TesselError {
        TesselError::TransactionAborted {
            txn: self.id(),
            cause,
            snapshot: self.context.read_snapshot(),
            stream,
            source: source.map(Box::new),
        }
    }

    /// Run `body` as a nested transaction
    ///
    /// There is no retry at this level: a failure aborts the shared context
    /// and is returned for the outermost level to handle.
    pub fn nested<R>(
        &self,
        builder: &TransactionBuilder,
        body: impl FnOnce(&Txn) -> Result<R>,
    ) -> Result<R> {
        let inner = self.begin_nested(builder)?;
        match body(&inner) {
            Ok(value) => {
                inner.commit()?;
                Ok(value)
            }
            Err(e) => Err(inner.fail(e)),
        }
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        if !self.is_nested() && self.context.is_active() {
            self.mark_aborted(AbortCause::User);
        }
    }
}

impl std::fmt::Debug for Txn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txn")
            .field("id", &self.id())
            .field("kind", &self.transaction.kind)
            .field("depth", &self.transaction.depth())
            .field("status", &self.context.status())
            .finish()
    }
}
