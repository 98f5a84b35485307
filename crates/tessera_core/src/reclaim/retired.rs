//! Type-erased objects pending destruction.

#![allow(unsafe_code)]

use std::fmt;
use std::ptr::NonNull;

/// An object that has been unlinked from every shared structure and whose
/// destruction now belongs to a hazard domain.
///
/// The entry is the only owner of the allocation. It is destroyed by
/// [`Retired::reclaim`], or leaked if simply dropped.
pub(crate) struct Retired {
    /// Address of the boxed object, compared against published hazards.
    ptr: NonNull<()>,
    /// Monomorphized destructor for the erased type.
    drop_fn: unsafe fn(NonNull<()>),
}

// SAFETY: Retired is only constructed from `T: Send` objects, and the pointer
// is dereferenced once, by whichever thread reclaims it.
unsafe impl Send for Retired {}

impl Retired {
    /// Takes ownership of a boxed object for deferred destruction.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::<T>::into_raw`, must not be reachable from
    /// any shared structure anymore, and must not be retired twice.
    pub(crate) unsafe fn new<T: Send + 'static>(ptr: NonNull<T>) -> Self {
        unsafe fn drop_boxed<T>(ptr: NonNull<()>) {
            // SAFETY: the pointer was produced by Box::<T>::into_raw (see `new`).
            drop(unsafe { Box::from_raw(ptr.cast::<T>().as_ptr()) });
        }

        Self {
            ptr: ptr.cast(),
            drop_fn: drop_boxed::<T>,
        }
    }

    /// Address used for hazard matching.
    #[inline]
    pub(crate) fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Runs the object's destructor and frees its allocation.
    ///
    /// # Safety
    ///
    /// No thread may still publish a hazard on this address.
    pub(crate) unsafe fn reclaim(self) {
        // SAFETY: `drop_fn` matches the erased type; the caller guarantees
        // no reader can still observe the object.
        unsafe { (self.drop_fn)(self.ptr) }
    }
}

impl fmt::Debug for Retired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retired")
            .field("address", &self.ptr)
            .finish()
    }
}
