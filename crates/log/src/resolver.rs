//! Commit-time conflict resolution
//!
//! The resolver remembers, per stream, the address of the latest write to
//! each conflict hash, the latest key-less ("wildcard") write and the latest
//! write of any kind. A transactional append is rejected if anything it read
//! was written after its snapshot:
//!
//! ```text
//! read keys for stream S == {}      -> conflict if tail(S)         > snapshot
//! read key  h for stream S          -> conflict if last(S, h)      > snapshot
//!                                      or        if wildcard(S)    > snapshot
//! ```
//!
//! Appends without a snapshot (plain, non-transactional writes) are never
//! checked but still update the tables.

use rustc_hash::FxHashMap;
use tessel_core::{Address, ConflictHash, StreamId, TxRecord};

/// A rejected commit: the stream and the address of the write that won
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    /// Stream whose read set was violated
    pub stream: StreamId,
    /// Address of the conflicting write
    pub address: Address,
}

/// Latest-write tables used to validate commits
#[derive(Debug, Default)]
pub struct ConflictResolver {
    last_write: FxHashMap<(StreamId, ConflictHash), Address>,
    wildcard: FxHashMap<StreamId, Address>,
    stream_tail: FxHashMap<StreamId, Address>,
}

impl ConflictResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest write of any kind to `stream`
    pub fn stream_tail(&self, stream: &StreamId) -> Option<Address> {
        self.stream_tail.get(stream).copied()
    }

    /// Validate a record against everything recorded so far
    ///
    /// Returns the first violation found, in stream order.
    pub fn check(&self, record: &TxRecord) -> Option<Rejection> {
        let snapshot = record.read_snapshot?;

        for (stream, hashes) in &record.read_conflicts {
            if hashes.is_empty() {
                if let Some(tail) = self.stream_tail(stream) {
                    if tail > snapshot {
                        return Some(Rejection {
                            stream: *stream,
                            address: tail,
                        });
                    }
                }
                continue;
            }

            if let Some(&wild) = self.wildcard.get(stream) {
                if wild > snapshot {
                    return Some(Rejection {
                        stream: *stream,
                        address: wild,
                    });
                }
            }

            for hash in hashes {
                if let Some(&last) = self.last_write.get(&(*stream, *hash)) {
                    if last > snapshot {
                        return Some(Rejection {
                            stream: *stream,
                            address: last,
                        });
                    }
                }
            }
        }
        None
    }

    /// Record the writes of a record that landed at `address`
    pub fn record(&mut self, record: &TxRecord, address: Address) {
        for stream in record.streams() {
            self.stream_tail.insert(*stream, address);
            match record.write_conflicts.get(stream) {
                Some(hashes) if !hashes.is_empty() => {
                    for hash in hashes {
                        self.last_write.insert((*stream, *hash), address);
                    }
                }
                _ => {
                    self.wildcard.insert(*stream, address);
                }
            }
        }
    }
}
