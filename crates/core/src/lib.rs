//! Core types and traits for Tessel
//!
//! This crate defines the foundational types used throughout the system:
//! - Address / StreamId / TxnId: log positions and identities
//! - Value: argument, result and conflict-key values
//! - UpdateOp: one ordered state-machine update, with its upcall result and
//!   undo record
//! - TxRecord / LogEntry: what crosses the shared-log boundary
//! - TesselError: the error taxonomy
//! - Traits: the collaborators the object layer consumes (SharedLog,
//!   Sequencer, StateMachine, Serializer)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod op;
pub mod record;
pub mod serializer;
pub mod traits;
pub mod types;
pub mod value;

pub use error::{AbortCause, Result, TesselError};
pub use op::{Applied, Mutation, UpdateOp};
pub use record::{HashedConflictSet, LogEntry, SmrRecord, TxRecord};
pub use serializer::MsgPackSerializer;
pub use traits::{Sequencer, Serializer, SharedLog, StateMachine};
pub use types::{Address, ConflictHash, StreamId, TxnId, ORIGIN};
pub use value::Value;
