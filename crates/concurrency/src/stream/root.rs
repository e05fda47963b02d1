//! Root stream: reads one stream of the shared log
//!
//! Besides moving forward, a root stream can travel backward: it keeps the
//! most recent applied updates (up to the configured history) and, asked to
//! sync below its position, yields their undo records newest first. If the
//! history does not reach far enough back, or an update has no undo record,
//! it reports `NoRollback` and the caller resets.
//!
//! Updates appended with `keep_result` are registered in an upcall table
//! shared by every root over the same stream; when a sync later decodes
//! such an update, the op is parked there until its result is consumed.
//! A sync can decode an update before its append has returned; while any
//! kept append is in flight, decoded ops without a slot are held aside and
//! handed to the slot when the append registers it.

use super::SyncTarget;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tessel_core::{
    Address, Mutation, Result, Serializer, SharedLog, SmrRecord, StreamId, TesselError, TxRecord,
    UpdateOp, Value, ORIGIN,
};
use tracing::trace;

/// State shared by every root over one stream
pub struct RootCore {
    id: StreamId,
    log: Arc<dyn SharedLog>,
    serializer: Arc<dyn Serializer>,
    history_limit: usize,
    upcalls: Mutex<UpcallTable>,
}

#[derive(Default)]
struct UpcallTable {
    /// Kept addresses; `None` until a sync decodes the update
    slots: HashMap<Address, Option<Arc<UpdateOp>>>,
    /// Kept appends whose address is not known yet
    in_flight: usize,
    /// Ops decoded while an append was in flight, by address
    unclaimed: HashMap<Address, Arc<UpdateOp>>,
}

impl UpcallTable {
    fn park(&mut self, op: &Arc<UpdateOp>) {
        if let Some(slot) = self.slots.get_mut(&op.address()) {
            *slot = Some(Arc::clone(op));
        } else if self.in_flight > 0 {
            self.unclaimed.insert(op.address(), Arc::clone(op));
        }
    }

    fn settle(&mut self, address: Option<Address>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if let Some(address) = address {
            let early = self.unclaimed.remove(&address);
            self.slots.insert(address, early);
        }
        if self.in_flight == 0 {
            self.unclaimed.clear();
        }
    }
}

impl RootCore {
    /// Create the shared state for `id`
    pub fn new(
        id: StreamId,
        log: Arc<dyn SharedLog>,
        serializer: Arc<dyn Serializer>,
        history_limit: usize,
    ) -> Self {
        Self {
            id,
            log,
            serializer,
            history_limit,
            upcalls: Mutex::new(UpcallTable::default()),
        }
    }

    /// Stream id
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Serializer for this stream's arguments and keys
    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    /// Number of kept addresses not yet consumed
    pub fn pending_upcalls(&self) -> usize {
        self.upcalls.lock().slots.len()
    }

    /// Drop the slot for `address` whether or not its result was consumed
    pub fn release(&self, address: Address) {
        self.upcalls.lock().slots.remove(&address);
    }
}

/// Cursor over one log stream
pub struct RootStream {
    core: Arc<RootCore>,
    pos: Address,
    history: VecDeque<Arc<UpdateOp>>,
    /// Position before the oldest retained update
    floor: Address,
}

impl RootStream {
    /// Create a root at `ORIGIN`
    pub fn new(core: Arc<RootCore>) -> Self {
        Self {
            core,
            pos: ORIGIN,
            history: VecDeque::new(),
            floor: ORIGIN,
        }
    }

    /// A fresh root over the same stream, sharing the upcall table
    pub fn detached(&self) -> Self {
        Self::new(Arc::clone(&self.core))
    }

    /// Stream id
    pub fn id(&self) -> StreamId {
        self.core.id
    }

    /// Address of the last update incorporated
    pub fn pos(&self) -> Address {
        self.pos
    }

    /// Shared state
    pub fn core(&self) -> &Arc<RootCore> {
        &self.core
    }

    /// Retained updates available for rollback
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Updates to apply to reach `target`
    pub fn sync(&mut self, target: SyncTarget) -> Result<Vec<Arc<UpdateOp>>> {
        match target {
            SyncTarget::Optimistic => Ok(Vec::new()),
            SyncTarget::Max => {
                let tail = self.core.log.tail()?;
                self.sync_to(tail)
            }
            SyncTarget::At(address) => self.sync_to(address),
        }
    }

    /// Move forward or backward to `address`
    pub fn sync_to(&mut self, address: Address) -> Result<Vec<Arc<UpdateOp>>> {
        if address < self.pos {
            self.rollback(address)
        } else {
            self.forward(address)
        }
    }

    fn forward(&mut self, up_to: Address) -> Result<Vec<Arc<UpdateOp>>> {
        if up_to == self.pos {
            return Ok(Vec::new());
        }
        let entries = self.core.log.read(self.core.id, self.pos, up_to)?;
        let ops = entries
            .into_iter()
            .map(|entry| {
                let args = self.core.serializer.decode(&entry.record.payload)?;
                Ok(Arc::new(UpdateOp::new(
                    Mutation::new(entry.record.method, args),
                    entry.address,
                )))
            })
            .collect::<Result<Vec<_>>>()?;

        trace!(stream = %self.core.id, from = self.pos, to = up_to, updates = ops.len(), "root forward");

        if !ops.is_empty() {
            let mut upcalls = self.core.upcalls.lock();
            for op in &ops {
                upcalls.park(op);
            }
        }

        for op in &ops {
            self.pos = op.address();
            self.history.push_back(Arc::clone(op));
        }
        while self.history.len() > self.core.history_limit {
            if let Some(evicted) = self.history.pop_front() {
                self.floor = evicted.address();
            }
        }
        Ok(ops)
    }

    fn rollback(&mut self, to: Address) -> Result<Vec<Arc<UpdateOp>>> {
        let keep = self.history.partition_point(|op| op.address() <= to);
        let new_pos = match keep {
            0 => self.floor,
            n => self.history[n - 1].address(),
        };
        if keep == 0 && self.floor > to {
            return Err(TesselError::NoRollback {
                stream: self.core.id,
                reason: format!(
                    "history starts after {} but rollback to {} requested",
                    self.floor, to
                ),
            });
        }

        let mut undo = Vec::with_capacity(self.history.len() - keep);
        for op in self.history.iter().skip(keep).rev() {
            match op.undo() {
                Some(u) => undo.push(u),
                None => {
                    return Err(TesselError::NoRollback {
                        stream: self.core.id,
                        reason: format!("update {} has no undo record", op),
                    })
                }
            }
        }

        trace!(stream = %self.core.id, from = self.pos, to = new_pos, updates = undo.len(), "root rollback");
        self.history.truncate(keep);
        self.pos = new_pos;
        Ok(undo)
    }

    /// Durably append one update, returning its log address
    pub fn append(
        &mut self,
        method: &str,
        args: Vec<Value>,
        keep_result: bool,
    ) -> Result<Address> {
        let payload = self.core.serializer.encode(&args)?;
        let record = TxRecord::single(
            self.core.id,
            SmrRecord {
                method: method.to_string(),
                payload,
            },
        );
        if !keep_result {
            let address = self.core.log.append(record)?;
            trace!(stream = %self.core.id, address, method, "root append");
            return Ok(address);
        }

        self.core.upcalls.lock().in_flight += 1;
        let appended = self.core.log.append(record);
        self.core.upcalls.lock().settle(appended.as_ref().ok().copied());
        let address = appended?;
        trace!(stream = %self.core.id, address, method, "root append");
        Ok(address)
    }

    /// The kept update at `address`, once a sync has decoded it
    ///
    /// The table entry is released once its result is present.
    pub fn consume_entry(&self, address: Address) -> Option<Arc<UpdateOp>> {
        let mut upcalls = self.core.upcalls.lock();
        let op = upcalls.slots.get(&address)?.clone()?;
        if op.has_upcall_result() {
            upcalls.slots.remove(&address);
        }
        Some(op)
    }

    /// Back to `ORIGIN`, forgetting history
    pub fn reset(&mut self) {
        self.pos = ORIGIN;
        self.floor = ORIGIN;
        self.history.clear();
    }
}
