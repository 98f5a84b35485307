//! # Hazard Cell
//!
//! A shared, atomically replaceable pointer to one object. Readers go
//! through [`HazardHandle::protect`](super::HazardHandle::protect); writers
//! replace the object and the displaced one is retired into the cell's
//! domain instead of being freed on the spot.

#![allow(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use super::domain::HazardDomain;
use super::hazard::Protected;

/// Atomic owning pointer whose old values are reclaimed through a
/// [`HazardDomain`].
///
/// The cell is bound to one domain at construction, so every object it
/// displaces is retired where readers of the cell publish their hazards.
pub struct HazardCell<T> {
    ptr: AtomicPtr<T>,
    domain: HazardDomain,
    _owns: PhantomData<Box<T>>,
}

impl<T> HazardCell<T> {
    /// Creates a cell holding `value`.
    #[must_use]
    pub fn new(domain: &HazardDomain, value: T) -> Self {
        Self {
            ptr: AtomicPtr::new(Box::into_raw(Box::new(value))),
            domain: domain.clone(),
            _owns: PhantomData,
        }
    }

    /// Creates an empty cell.
    #[must_use]
    pub fn empty(domain: &HazardDomain) -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            domain: domain.clone(),
            _owns: PhantomData,
        }
    }

    /// Domain that reclaims displaced values.
    #[inline]
    #[must_use]
    pub fn domain(&self) -> &HazardDomain {
        &self.domain
    }

    /// Whether the cell currently holds no object.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.load_raw().is_null()
    }

    /// Exclusive access to the current value.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        // SAFETY: `&mut self` rules out readers and writers; a non-null
        // pointer is a live Box owned by the cell.
        unsafe { self.ptr.get_mut().as_mut() }
    }

    /// Consumes the cell, returning its value.
    #[must_use]
    pub fn into_inner(mut self) -> Option<T> {
        let raw = std::mem::replace(self.ptr.get_mut(), ptr::null_mut());
        // SAFETY: the pointer came from Box::into_raw and is no longer
        // reachable through the cell.
        NonNull::new(raw).map(|object| *unsafe { Box::from_raw(object.as_ptr()) })
    }

    #[inline]
    pub(crate) fn load_raw(&self) -> *mut T {
        self.ptr.load(Ordering::SeqCst)
    }
}

impl<T: Send + 'static> HazardCell<T> {
    /// Installs `value` and retires the previous object, if any.
    pub fn store(&self, value: T) {
        let fresh = Box::into_raw(Box::new(value));
        let old = self.ptr.swap(fresh, Ordering::SeqCst);
        self.retire_displaced(old);
    }

    /// Empties the cell and retires the previous object.
    ///
    /// Returns whether an object was retired.
    pub fn take(&self) -> bool {
        let old = self.ptr.swap(ptr::null_mut(), Ordering::SeqCst);
        self.retire_displaced(old)
    }

    /// Replaces the object only if the cell still holds `current`.
    ///
    /// # Errors
    ///
    /// Hands `value` back if another writer replaced the object first.
    pub fn compare_and_swap(&self, current: &Protected<'_, T>, value: T) -> Result<(), T> {
        let expected = current.as_ptr().cast_mut();
        let fresh = Box::into_raw(Box::new(value));

        match self
            .ptr
            .compare_exchange(expected, fresh, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(old) => {
                self.retire_displaced(old);
                Ok(())
            }
            // SAFETY: `fresh` was never published.
            Err(_) => Err(*unsafe { Box::from_raw(fresh) }),
        }
    }

    fn retire_displaced(&self, old: *mut T) -> bool {
        match NonNull::new(old) {
            Some(old) => {
                // SAFETY: `old` came from Box::into_raw, the swap above
                // unlinked it, and only this caller observed the swap result.
                unsafe { self.domain.retire(old) };
                true
            }
            None => false,
        }
    }
}

impl<T> Drop for HazardCell<T> {
    fn drop(&mut self) {
        let raw = *self.ptr.get_mut();
        if let Some(object) = NonNull::new(raw) {
            // SAFETY: dropping the cell proves no reader borrows it, and
            // protection guards borrow the cell they protect.
            drop(unsafe { Box::from_raw(object.as_ptr()) });
        }
    }
}

impl<T> fmt::Debug for HazardCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HazardCell")
            .field("ptr", &self.load_raw())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct Tracked(u32, Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.1.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_store_retires_previous() {
        let drops = Arc::new(AtomicUsize::new(0));
        let domain = HazardDomain::default();
        let cell = HazardCell::new(&domain, Tracked(1, Arc::clone(&drops)));

        cell.store(Tracked(2, Arc::clone(&drops)));
        assert_eq!(domain.stats().pending, 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        assert_eq!(domain.scan(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_protected_value_survives_scan() {
        let drops = Arc::new(AtomicUsize::new(0));
        let domain = HazardDomain::default();
        let cell = HazardCell::new(&domain, Tracked(1, Arc::clone(&drops)));
        let handle = domain.register();

        let guard = handle.protect(&cell).unwrap().unwrap();
        cell.store(Tracked(2, Arc::clone(&drops)));

        assert_eq!(domain.scan(), 0);
        assert_eq!(guard.0, 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(guard);
        assert_eq!(domain.scan(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_take_and_into_inner() {
        let domain = HazardDomain::default();
        let cell = HazardCell::new(&domain, String::from("zone"));
        assert!(cell.take());
        assert!(cell.is_empty());
        assert!(!cell.take());

        let cell = HazardCell::new(&domain, 9_u8);
        assert_eq!(cell.into_inner(), Some(9));
    }

    #[test]
    fn test_compare_and_swap() {
        let domain = HazardDomain::default();
        let cell = HazardCell::new(&domain, 10_u32);
        let handle = domain.register();

        let seen = handle.protect(&cell).unwrap().unwrap();
        cell.store(11);
        assert_eq!(cell.compare_and_swap(&seen, 12), Err(12));
        drop(seen);

        let seen = handle.protect(&cell).unwrap().unwrap();
        assert_eq!(*seen, 11);
        assert!(cell.compare_and_swap(&seen, 12).is_ok());
        drop(seen);

        assert_eq!(*handle.protect(&cell).unwrap().unwrap(), 12);
    }

    #[test]
    fn test_drop_frees_current_value() {
        let drops = Arc::new(AtomicUsize::new(0));
        let domain = HazardDomain::default();
        {
            let mut cell = HazardCell::new(&domain, Tracked(4, Arc::clone(&drops)));
            cell.get_mut().unwrap().0 = 5;
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(domain.stats().pending, 0);
    }
}
