//! Hybrid optimistic / shared / exclusive lock
//!
//! An atomic version counter sits next to a `parking_lot::RwLock`. Every
//! exclusive guard bumps the counter when it is released, so a ticket taken
//! before a read tells whether a writer got in since.
//!
//! ```text
//! optimistic:  ticket = version   (refused while a writer holds the lock)
//!              try_read, version == ticket ? run f : give up
//! shared:      read()             (used for the upcall-result fast path)
//! exclusive:   write()            (stream switches and syncs; bumps version)
//! ```
//!
//! The optimistic mode never blocks: if the lock cannot be taken shared
//! immediately, or the version moved, the caller falls back to `write()`.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

/// Validation ticket for an optimistic read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Version-stamped reader/writer lock
#[derive(Debug, Default)]
pub struct HybridLock<T> {
    version: AtomicU64,
    inner: RwLock<T>,
}

/// Exclusive guard; releasing it invalidates outstanding tickets
pub struct HybridWriteGuard<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    version: &'a AtomicU64,
}

impl<T> HybridLock<T> {
    /// Create a new lock around `value`
    pub fn new(value: T) -> Self {
        Self {
            version: AtomicU64::new(0),
            inner: RwLock::new(value),
        }
    }

    /// Take an optimistic ticket, unless a writer currently holds the lock
    pub fn try_optimistic(&self) -> Option<Ticket> {
        if self.inner.is_locked_exclusive() {
            return None;
        }
        Some(Ticket(self.version.load(Ordering::Acquire)))
    }

    /// Whether no exclusive holder has come and gone since `ticket`
    pub fn validate(&self, ticket: Ticket) -> bool {
        !self.inner.is_locked_exclusive() && self.version.load(Ordering::Acquire) == ticket.0
    }

    /// Run `f` without blocking, if `ticket` is still valid
    ///
    /// Returns `None` when the lock is contended or a writer has
    /// intervened; the caller must then retry under `write()`.
    pub fn read_optimistic<R>(&self, ticket: Ticket, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.inner.try_read()?;
        if self.version.load(Ordering::Acquire) != ticket.0 {
            return None;
        }
        Some(f(&guard))
    }

    /// Acquire shared mode, blocking while a writer holds the lock
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    /// Try shared mode without blocking
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        self.inner.try_read()
    }

    /// Acquire exclusive mode
    pub fn write(&self) -> HybridWriteGuard<'_, T> {
        HybridWriteGuard {
            guard: self.inner.write(),
            version: &self.version,
        }
    }

    /// Whether a writer holds the lock right now
    pub fn is_write_locked(&self) -> bool {
        self.inner.is_locked_exclusive()
    }

    /// Number of completed exclusive sections
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl<T> Deref for HybridWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for HybridWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for HybridWriteGuard<'_, T> {
    fn drop(&mut self) {
        // Bumped while still exclusive, so no reader can validate against
        // the pre-write version after seeing post-write state.
        self.version.fetch_add(1, Ordering::Release);
    }
}
