//! Error types for Tessel
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Propagation
//!
//! - `Trimmed` and `NoRollback` are recoverable: the object manager handles
//!   them inside its sync retry loop by resetting and replaying.
//! - `TransactionAborted` is terminal for one transaction attempt. The
//!   transactional caller retries the whole body unless the cause is
//!   `Network`.
//! - `Network` is never retried silently inside a transaction.
//! - `Unsupported` and `ApplyFailed` are always fatal to the caller.

use crate::types::{Address, StreamId, TxnId};
use std::fmt;
use thiserror::Error;

/// Result type alias for Tessel operations
pub type Result<T> = std::result::Result<T, TesselError>;

/// Why a transaction was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortCause {
    /// The log rejected the commit because a conflicting write landed first
    Conflict,
    /// A collaborator could not be reached
    Network,
    /// The transaction attempted an operation its streams cannot perform
    Unsupported,
    /// Log entries needed by the transaction were reclaimed
    Trim,
    /// The application aborted explicitly
    User,
    /// Any other failure inside the transactional body
    Undefined,
}

impl AbortCause {
    /// Whether the transactional body may be retried after this abort
    ///
    /// Network aborts are surfaced to the caller instead; explicit user
    /// aborts and unsupported operations would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AbortCause::Conflict | AbortCause::Trim | AbortCause::Undefined
        )
    }
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbortCause::Conflict => "CONFLICT",
            AbortCause::Network => "NETWORK",
            AbortCause::Unsupported => "UNSUPPORTED",
            AbortCause::Trim => "TRIM",
            AbortCause::User => "USER",
            AbortCause::Undefined => "UNDEFINED",
        };
        f.write_str(s)
    }
}

/// Error types for the object layer
#[derive(Debug, Error)]
pub enum TesselError {
    /// Log entries at or below `address` were reclaimed
    #[error("Trimmed: stream {stream:?} needs address {address} which was reclaimed")]
    Trimmed {
        /// Stream being read, if known
        stream: Option<StreamId>,
        /// First address that could not be served
        address: Address,
    },

    /// A stream could not produce undo records back to a consistent state
    #[error("No rollback possible on stream {stream}: {reason}")]
    NoRollback {
        /// Stream that failed to roll back
        stream: StreamId,
        /// What was missing
        reason: String,
    },

    /// The current transaction attempt is over
    #[error("Transaction {txn} aborted ({cause})")]
    TransactionAborted {
        /// Aborted transaction
        txn: TxnId,
        /// Classified cause
        cause: AbortCause,
        /// Snapshot the transaction read at, if one was obtained
        snapshot: Option<Address>,
        /// Stream implicated in the abort, if any
        stream: Option<StreamId>,
        /// Underlying failure
        #[source]
        source: Option<Box<TesselError>>,
    },

    /// The log refused a commit because of a conflicting write
    #[error("Conflict on stream {stream} (conflicting write at {address})")]
    Conflict {
        /// Stream whose conflict set was violated
        stream: StreamId,
        /// Address of the write that won
        address: Address,
    },

    /// Communication with a collaborator failed
    #[error("Network error: {0}")]
    Network(String),

    /// Operation invalid for the current stream kind
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A state-machine upcall failed while applying an update
    #[error("Apply failed on stream {stream} at {address} ({method}): {reason}")]
    ApplyFailed {
        /// Stream being replayed
        stream: StreamId,
        /// Address of the update
        address: Address,
        /// Update method name
        method: String,
        /// Upcall error message
        reason: String,
    },

    /// An upcall result was requested but a full sync did not produce it
    #[error("No upcall result for address {address} on stream {stream} (object at {version})")]
    UpcallMissing {
        /// Stream of the object
        stream: StreamId,
        /// Requested address
        address: Address,
        /// Object version at the time of the request
        version: Address,
    },

    /// Sync failed on every allowed attempt
    #[error("Unable to sync stream {stream}: retry limit of {attempts} exhausted")]
    SyncExhausted {
        /// Stream being synced
        stream: StreamId,
        /// Attempts made
        attempts: u32,
    },

    /// Invalid operation or state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TesselError {
    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        TesselError::Network(msg.into())
    }

    /// Create an unsupported-operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        TesselError::Unsupported(msg.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        TesselError::InvalidState(msg.into())
    }

    /// Abort cause, if this is a transaction abort
    pub fn abort_cause(&self) -> Option<AbortCause> {
        match self {
            TesselError::TransactionAborted { cause, .. } => Some(*cause),
            _ => None,
        }
    }

    /// True for aborts the transactional body may be retried after
    pub fn is_retryable_abort(&self) -> bool {
        self.abort_cause().map_or(false, |c| c.is_retryable())
    }

    /// True if this is a trim, whether raw or wrapped in an abort
    pub fn is_trim(&self) -> bool {
        matches!(self, TesselError::Trimmed { .. })
            || self.abort_cause() == Some(AbortCause::Trim)
    }

    /// Classify an arbitrary failure into the cause a transaction aborts with
    pub fn classify(&self) -> AbortCause {
        match self {
            TesselError::TransactionAborted { cause, .. } => *cause,
            TesselError::Conflict { .. } => AbortCause::Conflict,
            TesselError::Network(_) => AbortCause::Network,
            TesselError::Unsupported(_) => AbortCause::Unsupported,
            TesselError::Trimmed { .. } => AbortCause::Trim,
            _ => AbortCause::Undefined,
        }
    }
}

impl From<rmp_serde::encode::Error> for TesselError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TesselError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TesselError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TesselError::Serialization(e.to_string())
    }
}
