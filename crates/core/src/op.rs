//! State-machine update operations
//!
//! An `UpdateOp` is one ordered mutation of a replicated object: a method
//! name plus arguments, tagged with the address it was recorded at. Ops come
//! either from decoding a log entry or from a transaction's write buffer, in
//! which case the address is the op's index in that buffer.
//!
//! Applying an op records what the apply produced on the op itself: the
//! upcall result the calling method should observe and the undo record that
//! reverses it. Both are overwritten on every apply, because the undo record
//! depends on the object state the op was applied to.

use crate::types::Address;
use crate::value::Value;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A method invocation on a state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Method name, resolved by the state machine
    pub method: String,
    /// Arguments, in call order
    pub args: Vec<Value>,
}

impl Mutation {
    /// Create a new mutation
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Mutation {
            method: method.into(),
            args,
        }
    }
}

/// Outcome of applying one mutation to a state machine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// Value the calling method returns, if any
    pub result: Option<Value>,
    /// Mutation that reverses this one on the post-state, if the state
    /// machine can produce one
    pub undo: Option<Mutation>,
}

impl Applied {
    /// Nothing to return, nothing to undo
    pub fn none() -> Self {
        Applied::default()
    }

    /// Builder: set the upcall result
    pub fn with_result(mut self, result: impl Into<Value>) -> Self {
        self.result = Some(result.into());
        self
    }

    /// Builder: set the undo record
    pub fn with_undo(mut self, method: impl Into<String>, args: Vec<Value>) -> Self {
        self.undo = Some(Mutation::new(method, args));
        self
    }
}

/// What the most recent apply of an op produced
#[derive(Debug, Default)]
struct ApplyRecord {
    upcall: Option<Option<Value>>,
    undo: Option<Arc<UpdateOp>>,
}

/// One ordered update to a replicated object
#[derive(Debug)]
pub struct UpdateOp {
    mutation: Mutation,
    address: Address,
    record: Mutex<ApplyRecord>,
}

impl UpdateOp {
    /// Create an op at the given address
    pub fn new(mutation: Mutation, address: Address) -> Self {
        UpdateOp {
            mutation,
            address,
            record: Mutex::new(ApplyRecord::default()),
        }
    }

    /// Method name
    pub fn method(&self) -> &str {
        &self.mutation.method
    }

    /// Arguments
    pub fn args(&self) -> &[Value] {
        &self.mutation.args
    }

    /// The underlying mutation
    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// Log address, or write-buffer index for buffered ops
    pub fn address(&self) -> Address {
        self.address
    }

    /// Record the outcome of applying this op
    pub fn record_applied(&self, applied: Applied) {
        let address = self.address;
        let mut record = self.record.lock();
        record.upcall = Some(applied.result);
        record.undo = applied
            .undo
            .map(|mutation| Arc::new(UpdateOp::new(mutation, address)));
    }

    /// Whether an apply has produced an upcall result yet
    pub fn has_upcall_result(&self) -> bool {
        self.record.lock().upcall.is_some()
    }

    /// Upcall result of the most recent apply
    ///
    /// The outer `Option` is `None` until the op has been applied; the inner
    /// one is the method's (possibly absent) return value.
    pub fn upcall_result(&self) -> Option<Option<Value>> {
        self.record.lock().upcall.clone()
    }

    /// Undo record of the most recent apply
    pub fn undo(&self) -> Option<Arc<UpdateOp>> {
        self.record.lock().undo.clone()
    }
}

impl fmt::Display for UpdateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.mutation.method, self.address)
    }
}
