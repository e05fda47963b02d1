//! In-memory shared log for Tessel
//!
//! This crate provides a single-process implementation of the collaborator
//! traits the object layer consumes:
//! - MemoryLog: `SharedLog` + `Sequencer` with one global address space
//! - ConflictResolver: commit-time validation of read conflict sets
//! - FaultInjector: armed network / trim failures for testing recovery paths
//!
//! It is the log every test in the workspace runs against, and a usable
//! backend for embedders that only need one process.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fault;
pub mod memory;
pub mod resolver;

pub use fault::{Fault, FaultInjector, FaultSite};
pub use memory::{LogStats, MemoryLog};
pub use resolver::{ConflictResolver, Rejection};
