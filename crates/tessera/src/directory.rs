//! # Object Directory
//!
//! A fixed set of named shared objects.
//!
//! ```text
//!  readers (any thread)                 writers
//!  ─────────────────────               ─────────────────────────────
//!  handle.protect(cell) ─► &V          lock.write()
//!  (no lock taken)                       cell.store(new)  ─► retire(old)
//!                                      release
//! ```
//!
//! Writers are serialized by a [`TracedLock`], so a stalled writer shows
//! up in the lock's contention reports. Readers never touch the lock.

use std::collections::HashMap;
use std::fmt;

use tessera_core::{
    CoreResult, HazardCell, HazardDomain, HazardHandle, LockStats, ReclaimStats, TracedLock,
};

/// Named objects readable without locking.
pub struct ObjectDirectory<V> {
    domain: HazardDomain,
    entries: HashMap<String, HazardCell<V>>,
    writers: TracedLock,
}

impl<V: Send + Sync + 'static> ObjectDirectory<V> {
    /// Builds a directory whose objects retire into `domain`.
    ///
    /// `writers` serializes updates; its configuration decides whether
    /// stalled writers are reported.
    pub fn new(
        domain: &HazardDomain,
        writers: TracedLock,
        entries: impl IntoIterator<Item = (String, V)>,
    ) -> Self {
        let entries = entries
            .into_iter()
            .map(|(name, value)| (name, HazardCell::new(domain, value)))
            .collect();
        Self {
            domain: domain.clone(),
            entries,
            writers,
        }
    }

    /// Claims a hazard record for the calling thread.
    #[must_use]
    pub fn register(&self) -> HazardHandle {
        self.domain.register()
    }

    /// Whether `name` is in the directory.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entry names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the directory has no entries.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs `f` on the current object for `name` without locking.
    ///
    /// Returns `Ok(None)` for an unknown name or an empty entry.
    ///
    /// # Errors
    ///
    /// Fails if `handle` belongs to another domain or has no free slot.
    pub fn read<R>(
        &self,
        handle: &HazardHandle,
        name: &str,
        f: impl FnOnce(&V) -> R,
    ) -> CoreResult<Option<R>> {
        let Some(cell) = self.entries.get(name) else {
            return Ok(None);
        };
        Ok(handle.protect(cell)?.map(|object| f(&*object)))
    }

    /// Installs `value` under `name` and retires the previous object.
    ///
    /// Returns `false` (dropping `value`) if `name` is unknown.
    pub fn replace(&self, name: &str, value: V) -> bool {
        let Some(cell) = self.entries.get(name) else {
            return false;
        };
        let _writer = self.writers.write();
        cell.store(value);
        true
    }

    /// Derives a new object from the current one and installs it.
    ///
    /// Returns `Ok(false)` if `name` is unknown or the entry is empty.
    ///
    /// # Errors
    ///
    /// Fails if `handle` belongs to another domain or has no free slot.
    pub fn update(
        &self,
        handle: &HazardHandle,
        name: &str,
        f: impl FnOnce(&V) -> V,
    ) -> CoreResult<bool> {
        let Some(cell) = self.entries.get(name) else {
            return Ok(false);
        };

        let _writer = self.writers.write();
        let Some(current) = handle.protect(cell)? else {
            return Ok(false);
        };
        let next = f(&*current);
        drop(current);

        cell.store(next);
        Ok(true)
    }

    /// Lock serializing writers.
    #[inline]
    #[must_use]
    pub fn writer_lock(&self) -> &TracedLock {
        &self.writers
    }

    /// Domain the objects retire into.
    #[inline]
    #[must_use]
    pub fn domain(&self) -> &HazardDomain {
        &self.domain
    }

    /// Writer lock counters.
    #[must_use]
    pub fn lock_stats(&self) -> LockStats {
        self.writers.stats()
    }

    /// Reclamation counters of the domain.
    #[must_use]
    pub fn reclaim_stats(&self) -> ReclaimStats {
        self.domain.stats()
    }
}

impl<V> fmt::Debug for ObjectDirectory<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectDirectory")
            .field("entries", &self.entries.len())
            .field("writers", &self.writers)
            .finish_non_exhaustive()
    }
}
