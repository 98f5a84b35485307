//! # Hazard Slots
//!
//! Per-thread published pointers. A non-zero slot announces "this thread may
//! be dereferencing the object at this address"; a scan never destroys an
//! address that appears in any slot.
//!
//! ```text
//!  record table (domain)      HazardHandle (one per thread)
//!  ┌────────────────────┐     ┌────────────────────────┐
//!  │ record 0 [s0][s1]  │◄────│ record, slot bitmasks  │
//!  │ record 1 [s0][s1]  │     └────────────────────────┘
//!  │ record 2 [s0][s1]  │  free records are reused by the next register()
//!  └────────────────────┘
//! ```

#![allow(unsafe_code)]

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::cell::HazardCell;
use super::domain::HazardDomain;
use crate::error::{CoreError, CoreResult};

/// Sentinel for "no hazard".
const EMPTY: usize = 0;

/// A fixed group of hazard slots, owned by at most one thread at a time.
pub(crate) struct HazardRecord {
    slots: Box<[AtomicUsize]>,
    active: AtomicBool,
}

impl HazardRecord {
    /// Creates a record already claimed by the caller.
    pub(crate) fn claimed(slots: usize) -> Self {
        Self {
            slots: (0..slots).map(|_| AtomicUsize::new(EMPTY)).collect(),
            active: AtomicBool::new(true),
        }
    }

    /// Claims a free record for the calling thread.
    pub(crate) fn try_claim(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Clears every slot, then hands the record back to the table.
    fn release(&self) {
        for slot in self.slots.iter() {
            slot.store(EMPTY, Ordering::Release);
        }
        self.active.store(false, Ordering::Release);
    }

    /// Appends every published address to `out`.
    pub(crate) fn collect_into(&self, out: &mut Vec<usize>) {
        out.extend(
            self.slots
                .iter()
                .map(|slot| slot.load(Ordering::SeqCst))
                .filter(|&addr| addr != EMPTY),
        );
    }
}

/// A thread's claim on one hazard record.
///
/// Obtained from [`HazardDomain::register`]. The handle is neither `Send`
/// nor `Sync`: its slots describe what *this* thread is reading. Dropping it
/// clears all slots and frees the record for another thread.
///
/// # Example
///
/// ```rust,ignore
/// let domain = HazardDomain::default();
/// let cell = HazardCell::new(&domain, Npc::new("guard"));
///
/// let handle = domain.register();
/// if let Some(npc) = handle.protect(&cell)? {
///     // `npc` cannot be destroyed until this guard drops
///     println!("{}", npc.name);
/// }
/// ```
pub struct HazardHandle {
    domain: HazardDomain,
    record: Arc<HazardRecord>,
    /// Bit `i` set while slot `i` holds a raw [`HazardHandle::publish`].
    published: Cell<u32>,
    /// Bit `i` set while a [`Protected`] guard owns slot `i`.
    guarded: Cell<u32>,
    _not_send: PhantomData<*const ()>,
}

impl HazardHandle {
    pub(crate) fn new(domain: HazardDomain, record: Arc<HazardRecord>) -> Self {
        Self {
            domain,
            record,
            published: Cell::new(0),
            guarded: Cell::new(0),
            _not_send: PhantomData,
        }
    }

    /// Domain this handle publishes into.
    #[inline]
    #[must_use]
    pub fn domain(&self) -> &HazardDomain {
        &self.domain
    }

    /// Number of slots owned by this handle.
    #[inline]
    #[must_use]
    pub fn slots(&self) -> usize {
        self.record.slots.len()
    }

    /// Number of slots currently publishing.
    #[inline]
    #[must_use]
    pub fn slots_in_use(&self) -> usize {
        (self.published.get() | self.guarded.get()).count_ones() as usize
    }

    /// Publishes `ptr` in `slot`, replacing a previous raw publication.
    ///
    /// Publishing alone does not make a dereference safe: the caller must
    /// re-check that the object is still reachable after publishing, as
    /// [`HazardHandle::protect`] does. A null `ptr` clears the slot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SlotInUse`] if a live [`Protected`] guard owns
    /// `slot`; the slot is left untouched.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not below [`HazardHandle::slots`].
    pub fn publish<T>(&self, slot: usize, ptr: *const T) -> CoreResult<()> {
        self.check_unguarded(slot)?;
        self.record.slots[slot].store(ptr as usize, Ordering::SeqCst);
        let mask = self.published.get();
        if ptr.is_null() {
            self.published.set(mask & !(1 << slot));
        } else {
            self.published.set(mask | (1 << slot));
        }
        Ok(())
    }

    /// Clears a raw publication in `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SlotInUse`] if a live [`Protected`] guard owns
    /// `slot`; the slot is left untouched.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not below [`HazardHandle::slots`].
    pub fn clear(&self, slot: usize) -> CoreResult<()> {
        self.check_unguarded(slot)?;
        self.record.slots[slot].store(EMPTY, Ordering::Release);
        self.published.set(self.published.get() & !(1 << slot));
        Ok(())
    }

    /// Clears every raw publication. Slots owned by live guards are kept.
    pub fn clear_all(&self) {
        let guarded = self.guarded.get();
        for slot in (0..self.slots()).filter(|slot| guarded & (1 << slot) == 0) {
            self.record.slots[slot].store(EMPTY, Ordering::Release);
        }
        self.published.set(0);
    }

    /// Address published in `slot`, or null.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not below [`HazardHandle::slots`].
    #[must_use]
    pub fn published(&self, slot: usize) -> *const () {
        self.record.slots[slot].load(Ordering::Acquire) as *const ()
    }

    /// Protects the object currently stored in `cell`.
    ///
    /// Loads the cell, publishes the pointer in a free slot and re-loads the
    /// cell until both loads agree, so the returned guard refers to an
    /// object that was reachable while already hazarded.
    ///
    /// Returns `Ok(None)` if the cell is empty.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DomainMismatch`] if `cell` retires into another domain
    /// - [`CoreError::SlotsExhausted`] if every slot is already publishing
    pub fn protect<'a, T>(&'a self, cell: &'a HazardCell<T>) -> CoreResult<Option<Protected<'a, T>>> {
        if !self.domain.same_domain(cell.domain()) {
            return Err(CoreError::DomainMismatch);
        }
        let slot = self.free_slot().ok_or(CoreError::SlotsExhausted {
            slots: self.slots(),
        })?;
        let hazard = &self.record.slots[slot];

        let mut ptr = cell.load_raw();
        loop {
            let Some(object) = NonNull::new(ptr) else {
                hazard.store(EMPTY, Ordering::Release);
                return Ok(None);
            };

            hazard.store(object.as_ptr() as usize, Ordering::SeqCst);
            let current = cell.load_raw();
            if current == ptr {
                self.guarded.set(self.guarded.get() | (1 << slot));
                return Ok(Some(Protected {
                    handle: self,
                    slot,
                    object,
                    _cell: PhantomData,
                }));
            }
            ptr = current;
        }
    }

    fn free_slot(&self) -> Option<usize> {
        let used = self.published.get() | self.guarded.get();
        (0..self.slots()).find(|slot| used & (1 << slot) == 0)
    }

    fn check_unguarded(&self, slot: usize) -> CoreResult<()> {
        assert!(slot < self.slots(), "hazard slot {slot} out of range");
        if self.guarded.get() & (1 << slot) != 0 {
            return Err(CoreError::SlotInUse { slot });
        }
        Ok(())
    }

    /// Ends a guard's ownership of `slot`.
    fn release_guarded(&self, slot: usize) {
        self.record.slots[slot].store(EMPTY, Ordering::Release);
        self.guarded.set(self.guarded.get() & !(1 << slot));
    }
}

impl Drop for HazardHandle {
    fn drop(&mut self) {
        self.record.release();
    }
}

impl fmt::Debug for HazardHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HazardHandle")
            .field("slots", &self.slots())
            .field("in_use", &self.slots_in_use())
            .finish()
    }
}

/// Guard proving that one slot publishes the referenced object.
///
/// Derefs to the object. Dropping the guard clears the slot.
pub struct Protected<'a, T> {
    handle: &'a HazardHandle,
    slot: usize,
    object: NonNull<T>,
    _cell: PhantomData<&'a HazardCell<T>>,
}

impl<T> Protected<'_, T> {
    /// Address of the protected object.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.object.as_ptr()
    }

    /// Slot index publishing this object.
    #[inline]
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<T> Deref for Protected<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the address is published in a hazard slot and was still
        // stored in the cell after publication, so no scan can destroy it
        // until this guard clears the slot.
        unsafe { self.object.as_ref() }
    }
}

impl<T> Drop for Protected<'_, T> {
    fn drop(&mut self) {
        self.handle.release_guarded(self.slot);
    }
}

impl<T: fmt::Debug> fmt::Debug for Protected<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protected")
            .field("slot", &self.slot)
            .field("value", &**self)
            .finish()
    }
}
