//! Single-process shared log
//!
//! `MemoryLog` implements both `SharedLog` and `Sequencer` over an in-memory
//! address space. Addresses start at 1; `ORIGIN` (0) means "before any
//! entry". Every append, including a multi-stream transactional one, lands at
//! exactly one new address.
//!
//! ## Trim
//!
//! `trim(address)` reclaims every entry at or below `address`. A stream that
//! lost entries can no longer be read from any position below the highest
//! address it lost; such reads fail with `Trimmed`. Streams that had nothing
//! below the mark are unaffected.

use crate::fault::{FaultInjector, FaultSite};
use crate::resolver::ConflictResolver;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tessel_core::{
    Address, LogEntry, Result, Sequencer, SharedLog, SmrRecord, StreamId, TesselError, TxRecord,
    ORIGIN,
};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct LogState {
    /// Per-stream updates, in address order
    streams: FxHashMap<StreamId, Vec<(Address, SmrRecord)>>,
    /// Highest reclaimed address per stream
    trimmed: FxHashMap<StreamId, Address>,
    resolver: ConflictResolver,
    tail: Address,
    trim_mark: Address,
}

/// Call counters, for asserting which paths touched the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogStats {
    /// `read` calls
    pub reads: u64,
    /// Successful appends
    pub appends: u64,
    /// Appends rejected by conflict resolution
    pub conflicts: u64,
    /// Snapshot timestamps issued
    pub snapshots: u64,
}

/// In-memory shared log and sequencer
#[derive(Debug, Default)]
pub struct MemoryLog {
    state: RwLock<LogState>,
    faults: FaultInjector,
    reads: AtomicU64,
    appends: AtomicU64,
    conflicts: AtomicU64,
    snapshots: AtomicU64,
}

impl MemoryLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injector for this log
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Reclaim every entry at or below `address`
    ///
    /// Trimming is monotonic; a lower mark than the current one is a no-op.
    pub fn trim(&self, address: Address) {
        let mut state = self.state.write();
        if address <= state.trim_mark {
            return;
        }
        state.trim_mark = address;

        let LogState {
            streams, trimmed, ..
        } = &mut *state;
        for (stream, entries) in streams.iter_mut() {
            let cut = entries.partition_point(|(a, _)| *a <= address);
            if cut == 0 {
                continue;
            }
            let highest = entries[cut - 1].0;
            entries.drain(..cut);
            let mark = trimmed.entry(*stream).or_insert(ORIGIN);
            *mark = (*mark).max(highest);
        }
        debug!(address, "trimmed log prefix");
    }

    /// Current trim mark
    pub fn trim_mark(&self) -> Address {
        self.state.read().trim_mark
    }

    /// Number of updates currently held for `stream`
    pub fn stream_len(&self, stream: &StreamId) -> usize {
        self.state
            .read()
            .streams
            .get(stream)
            .map_or(0, Vec::len)
    }

    /// Call counters
    pub fn stats(&self) -> LogStats {
        LogStats {
            reads: self.reads.load(Ordering::Relaxed),
            appends: self.appends.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            snapshots: self.snapshots.load(Ordering::Relaxed),
        }
    }
}

impl SharedLog for MemoryLog {
    fn read(&self, stream: StreamId, after: Address, up_to: Address) -> Result<Vec<LogEntry>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.faults
            .check(FaultSite::Read, Some(stream), after + 1)?;

        if up_to <= after {
            return Ok(Vec::new());
        }

        let state = self.state.read();
        if let Some(&lost) = state.trimmed.get(&stream) {
            if after < lost {
                return Err(TesselError::Trimmed {
                    stream: Some(stream),
                    address: after + 1,
                });
            }
        }

        let Some(entries) = state.streams.get(&stream) else {
            return Ok(Vec::new());
        };
        let start = entries.partition_point(|(a, _)| *a <= after);
        let end = entries.partition_point(|(a, _)| *a <= up_to);
        Ok(entries[start..end]
            .iter()
            .map(|(address, record)| LogEntry {
                address: *address,
                stream,
                record: record.clone(),
            })
            .collect())
    }

    fn tail(&self) -> Result<Address> {
        Ok(self.state.read().tail)
    }

    fn append(&self, record: TxRecord) -> Result<Address> {
        if record.is_empty() {
            return Err(TesselError::invalid_state("append of an empty record"));
        }
        self.faults
            .check(FaultSite::Append, None, record.read_snapshot.unwrap_or(ORIGIN))?;

        let mut state = self.state.write();
        if let Some(snapshot) = record.read_snapshot {
            if snapshot < state.trim_mark {
                return Err(TesselError::Trimmed {
                    stream: None,
                    address: snapshot,
                });
            }
        }
        if let Some(rejected) = state.resolver.check(&record) {
            self.conflicts.fetch_add(1, Ordering::Relaxed);
            debug!(
                stream = %rejected.stream,
                address = rejected.address,
                snapshot = ?record.read_snapshot,
                "append rejected by conflict"
            );
            return Err(TesselError::Conflict {
                stream: rejected.stream,
                address: rejected.address,
            });
        }

        state.tail += 1;
        let address = state.tail;
        state.resolver.record(&record, address);
        for (stream, updates) in record.writes {
            let entries = state.streams.entry(stream).or_default();
            entries.extend(updates.into_iter().map(|u| (address, u)));
        }
        self.appends.fetch_add(1, Ordering::Relaxed);
        trace!(address, txn = ?record.txn, "appended");
        Ok(address)
    }
}

impl Sequencer for MemoryLog {
    fn next_snapshot_timestamp(&self) -> Result<Address> {
        let tail = self.state.read().tail;
        self.faults.check(FaultSite::Sequencer, None, tail)?;
        self.snapshots.fetch_add(1, Ordering::Relaxed);
        Ok(tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(method: &str) -> SmrRecord {
        SmrRecord {
            method: method.to_string(),
            payload: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_addresses_start_at_one() {
        let log = MemoryLog::new();
        assert_eq!(log.tail().unwrap(), ORIGIN);
        let s = StreamId::new();
        assert_eq!(log.append(TxRecord::single(s, rec("a"))).unwrap(), 1);
        assert_eq!(log.append(TxRecord::single(s, rec("b"))).unwrap(), 2);
        assert_eq!(log.tail().unwrap(), 2);
    }

    #[test]
    fn test_read_range_is_half_open() {
        let log = MemoryLog::new();
        let s = StreamId::new();
        for m in ["a", "b", "c"] {
            log.append(TxRecord::single(s, rec(m))).unwrap();
        }
        let got: Vec<_> = log
            .read(s, 1, 2)
            .unwrap()
            .into_iter()
            .map(|e| e.address)
            .collect();
        assert_eq!(got, vec![2]);
        assert!(log.read(s, 3, 3).unwrap().is_empty());
    }

    #[test]
    fn test_read_filters_by_stream() {
        let log = MemoryLog::new();
        let a = StreamId::new();
        let b = StreamId::new();
        log.append(TxRecord::single(a, rec("a"))).unwrap();
        log.append(TxRecord::single(b, rec("b"))).unwrap();
        let got = log.read(a, ORIGIN, 2).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].record.method, "a");
    }

    #[test]
    fn test_multi_stream_record_shares_address() {
        let log = MemoryLog::new();
        let a = StreamId::new();
        let b = StreamId::new();
        let mut r = TxRecord::default();
        r.writes.insert(a, vec![rec("x"), rec("y")]);
        r.writes.insert(b, vec![rec("z")]);
        let addr = log.append(r).unwrap();
        let got_a = log.read(a, ORIGIN, addr).unwrap();
        assert_eq!(got_a.len(), 2);
        assert!(got_a.iter().all(|e| e.address == addr));
        assert_eq!(log.read(b, ORIGIN, addr).unwrap()[0].address, addr);
    }

    #[test]
    fn test_empty_append_rejected() {
        let log = MemoryLog::new();
        assert!(log.append(TxRecord::default()).is_err());
    }

    #[test]
    fn test_trim_blocks_old_reads_only_for_affected_streams() {
        let log = MemoryLog::new();
        let a = StreamId::new();
        let b = StreamId::new();
        log.append(TxRecord::single(a, rec("1"))).unwrap();
        log.append(TxRecord::single(a, rec("2"))).unwrap();
        log.append(TxRecord::single(b, rec("3"))).unwrap();
        log.trim(2);

        let err = log.read(a, ORIGIN, 3).unwrap_err();
        assert!(err.is_trim());
        assert!(log.read(a, 2, 3).unwrap().is_empty());
        assert_eq!(log.read(b, ORIGIN, 3).unwrap().len(), 1);
        assert_eq!(log.stream_len(&a), 0);
    }

    #[test]
    fn test_trim_is_monotonic() {
        let log = MemoryLog::new();
        log.trim(5);
        log.trim(2);
        assert_eq!(log.trim_mark(), 5);
    }

    #[test]
    fn test_append_with_stale_snapshot_after_trim() {
        let log = MemoryLog::new();
        let s = StreamId::new();
        log.append(TxRecord::single(s, rec("a"))).unwrap();
        log.append(TxRecord::single(s, rec("b"))).unwrap();
        log.trim(2);
        let mut r = TxRecord::single(s, rec("c"));
        r.read_snapshot = Some(1);
        assert!(log.append(r).unwrap_err().is_trim());
    }

    #[test]
    fn test_conflicting_append_is_rejected() {
        let log = MemoryLog::new();
        let s = StreamId::new();
        let snapshot = log.next_snapshot_timestamp().unwrap();
        log.append(TxRecord::single(s, rec("a"))).unwrap();

        let mut r = TxRecord::single(s, rec("b"));
        r.read_snapshot = Some(snapshot);
        r.read_conflicts.insert(s, Default::default());
        let err = log.append(r).unwrap_err();
        assert!(matches!(err, TesselError::Conflict { address: 1, .. }));
        assert_eq!(log.stats().conflicts, 1);
        assert_eq!(log.tail().unwrap(), 1);
    }

    #[test]
    fn test_sequencer_returns_tail() {
        let log = MemoryLog::new();
        let s = StreamId::new();
        log.append(TxRecord::single(s, rec("a"))).unwrap();
        assert_eq!(log.next_snapshot_timestamp().unwrap(), 1);
        assert_eq!(log.stats().snapshots, 1);
    }
}
