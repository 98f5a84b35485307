//! Thread-local access to the process-wide domain.
//!
//! Each thread lazily registers one [`HazardHandle`] with
//! [`HazardDomain::global`] on first use; the record is released when the
//! thread exits.

#![allow(unsafe_code)]

use std::ptr::NonNull;

use super::domain::HazardDomain;
use super::hazard::HazardHandle;
use crate::error::CoreResult;

thread_local! {
    static LOCAL_HANDLE: HazardHandle = HazardDomain::global().register();
}

/// Runs `f` with this thread's handle on the global domain.
pub fn with_local_handle<R>(f: impl FnOnce(&HazardHandle) -> R) -> R {
    LOCAL_HANDLE.with(f)
}

/// Publishes `ptr` in `slot` of this thread's global handle.
///
/// # Errors
///
/// Returns [`CoreError::SlotInUse`](crate::error::CoreError::SlotInUse) if a
/// live guard from [`with_local_handle`] owns `slot`.
///
/// # Panics
///
/// Panics if `slot` is not below the global domain's `slots_per_thread`.
pub fn publish_hazard<T>(slot: usize, ptr: *const T) -> CoreResult<()> {
    with_local_handle(|handle| handle.publish(slot, ptr))
}

/// Clears `slot` of this thread's global handle.
///
/// # Errors
///
/// Returns [`CoreError::SlotInUse`](crate::error::CoreError::SlotInUse) if a
/// live guard from [`with_local_handle`] owns `slot`.
///
/// # Panics
///
/// Panics if `slot` is not below the global domain's `slots_per_thread`.
pub fn clear_hazard(slot: usize) -> CoreResult<()> {
    with_local_handle(|handle| handle.clear(slot))
}

/// Retires a boxed object into the global domain.
///
/// # Safety
///
/// Same contract as [`HazardDomain::retire`].
pub unsafe fn retire<T: Send + 'static>(ptr: NonNull<T>) {
    // SAFETY: forwarded from the caller.
    unsafe { HazardDomain::global().retire(ptr) }
}

/// Runs a scan on the global domain.
pub fn scan() -> usize {
    HazardDomain::global().scan()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reclaim::HazardCell;

    #[test]
    fn test_local_handle_is_per_thread() {
        let value = 3_u64;
        let ptr: *const u64 = &value;

        publish_hazard(0, ptr).unwrap();
        with_local_handle(|handle| assert_eq!(handle.published(0), ptr.cast::<()>()));

        std::thread::spawn(|| with_local_handle(|handle| assert!(handle.published(0).is_null())))
            .join()
            .unwrap();

        clear_hazard(0).unwrap();
        with_local_handle(|handle| assert!(handle.published(0).is_null()));
    }

    #[test]
    fn test_global_hazard_blocks_reclaim() {
        let raw = Box::into_raw(Box::new([7_u8; 32]));
        publish_hazard(1, raw.cast_const()).unwrap();
        unsafe { retire(NonNull::new_unchecked(raw)) };

        scan();
        // Still published, so still readable.
        assert_eq!(unsafe { (*raw)[0] }, 7);

        clear_hazard(1).unwrap();
        scan();
    }

    #[test]
    fn test_local_functions_refuse_guarded_slot() {
        let cell = HazardCell::new(HazardDomain::global(), String::from("zone"));

        with_local_handle(|handle| {
            let guard = handle.protect(&cell).unwrap().unwrap();
            let slot = guard.slot();
            let other = 5_u32;

            assert!(clear_hazard(slot).is_err());
            assert!(publish_hazard(slot, &other as *const u32).is_err());
            assert_eq!(handle.published(slot), guard.as_ptr().cast::<()>());
            assert_eq!(guard.as_str(), "zone");
        });
    }
}
