//! Identity and addressing types
//!
//! This module defines the foundational identifiers used throughout the system:
//! - Address: a position in the global shared log
//! - StreamId: identity of one log stream (and of the object replicated on it)
//! - TxnId: identity of one transaction, used for tracing only
//! - ConflictHash: content hash of a conflict key

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A position in the global shared log
///
/// Log entries are numbered from 1. Every stream shares this address space,
/// so one multi-stream record appears at the same address in each stream
/// it touches.
pub type Address = u64;

/// Position before the first log entry
///
/// Streams start here, and a snapshot pinned at `ORIGIN` observes nothing.
pub const ORIGIN: Address = 0;

/// 128-bit content hash of a conflict key
pub type ConflictHash = [u8; 16];

/// Render the first 8 hex digits of a UUID, enough to tell ids apart in logs
fn readable(id: &Uuid) -> String {
    let mut s = id.simple().to_string();
    s.truncate(8);
    s
}

/// Unique identifier for a log stream
///
/// One stream carries the update history of exactly one object; the object
/// manager for that object is identified by the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(Uuid);

impl StreamId {
    /// Create a new random StreamId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a StreamId from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Create a StreamId from a 128-bit integer
    ///
    /// Handy for tests and well-known system streams.
    pub fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }

    /// Parse a StreamId from its string representation
    ///
    /// Returns None if the string is not a valid UUID.
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get the raw bytes of this StreamId
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short form used in log lines and `Display` impls of objects
    pub fn readable(&self) -> String {
        readable(&self.0)
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a transaction
///
/// Never recorded in the log; it exists so aborts and traces can be
/// attributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxnId(Uuid);

impl TxnId {
    /// Create a new random TxnId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short form used in log lines
    pub fn readable(&self) -> String {
        readable(&self.0)
    }
}

impl Default for TxnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TX[{}]", self.readable())
    }
}
