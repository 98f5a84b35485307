//! Integration test for tearing down the process-wide hazard domain.
//!
//! Runs in its own test binary so no other test touches the global domain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tessera_core::{HazardCell, HazardDomain, ReclaimConfig};

struct Tracked(Arc<AtomicUsize>);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_shutdown_global_drains_retire_list() {
    // Never created yet: nothing to do.
    assert_eq!(HazardDomain::shutdown_global(), 0);

    let domain = HazardDomain::install_global(ReclaimConfig {
        retire_threshold: 1000,
        ..ReclaimConfig::default()
    })
    .unwrap();

    let drops = Arc::new(AtomicUsize::new(0));
    let cell = HazardCell::new(domain, Tracked(Arc::clone(&drops)));
    for _ in 0..10 {
        cell.store(Tracked(Arc::clone(&drops)));
    }
    assert_eq!(domain.pending(), 10);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    // A live hazard pins its object through shutdown.
    let handle = domain.register();
    let guard = handle.protect(&cell).unwrap().unwrap();
    cell.store(Tracked(Arc::clone(&drops)));

    assert_eq!(HazardDomain::shutdown_global(), 10);
    assert_eq!(domain.pending(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 10);

    drop(guard);
    assert_eq!(HazardDomain::shutdown_global(), 1);
    assert_eq!(domain.pending(), 0);
    assert_eq!(drops.load(Ordering::SeqCst), 11);
}
