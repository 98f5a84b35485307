//! Integration tests for traced reader/writer locks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use tessera_core::{AccessMode, ChannelReporter, LockConfig, LockEvent, TracedLock, TracedRwLock};

/// Holds the write side of `lock` on another thread for `hold`.
///
/// Returns once the lock is held.
fn hold_write(lock: &Arc<TracedLock>, hold: Duration) -> thread::JoinHandle<()> {
    let barrier = Arc::new(Barrier::new(2));
    let holder = {
        let lock = Arc::clone(lock);
        let barrier = Arc::clone(&barrier);
        thread::Builder::new()
            .name("holder".into())
            .spawn(move || {
                let _guard = lock.write();
                barrier.wait();
                thread::sleep(hold);
            })
            .unwrap()
    };
    barrier.wait();
    holder
}

#[test]
fn test_readers_share_the_lock() {
    let lock = Arc::new(TracedRwLock::named("shared", 7_u32));
    let barrier = Arc::new(Barrier::new(4));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let value = lock.read();
                // Every reader reaches the barrier while holding the lock.
                barrier.wait();
                *value
            })
        })
        .collect();

    for reader in readers {
        assert_eq!(reader.join().unwrap(), 7);
    }
    assert_eq!(lock.stats().acquisitions, 4);
}

#[test]
fn test_writer_waits_for_readers() {
    let lock = Arc::new(TracedRwLock::named("exclusive", Vec::<u32>::new()));
    let written = Arc::new(AtomicBool::new(false));

    let reader = lock.read();

    let writer = {
        let lock = Arc::clone(&lock);
        let written = Arc::clone(&written);
        thread::spawn(move || {
            lock.write().push(1);
            written.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!written.load(Ordering::SeqCst));
    assert!(reader.is_empty());

    drop(reader);
    writer.join().unwrap();

    assert!(written.load(Ordering::SeqCst));
    assert_eq!(*lock.read(), vec![1]);
}

#[test]
fn test_try_write_never_blocks() {
    let lock = Arc::new(TracedLock::named("probe", ()));
    let holder = hold_write(&lock, Duration::from_millis(100));

    let start = Instant::now();
    assert!(lock.try_write().is_none());
    assert!(lock.try_read().is_none());
    assert!(start.elapsed() < Duration::from_millis(50));

    holder.join().unwrap();
    assert!(lock.try_write().is_some());
}

#[test]
fn test_diagnostic_reports_contention_then_recovers() {
    let (reporter, events) = ChannelReporter::unbounded();
    let lock = Arc::new(
        TracedLock::with_config("zone-12", (), LockConfig::diagnostic().with_timeout_ms(50))
            .with_reporter(Arc::new(reporter)),
    );

    let holder = hold_write(&lock, Duration::from_millis(130));

    // Blocks past the first timeout, then succeeds once the holder leaves.
    let guard = lock.read();
    assert_eq!(guard.acquisition().mode, AccessMode::Read);
    drop(guard);
    holder.join().unwrap();

    let events: Vec<LockEvent> = events.try_iter().collect();
    let reports: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            LockEvent::Contention(report) => Some(report),
            _ => None,
        })
        .collect();

    // 50 ms expires once; the 100 ms retry outlasts the 130 ms hold.
    assert_eq!(reports.len(), 1, "got {} reports", reports.len());
    let first = reports[0];
    assert_eq!(first.lock, "zone-12");
    assert_eq!(first.mode, AccessMode::Read);
    assert_eq!(first.attempt, 1);

    // The holder was visible to the waiter.
    assert_eq!(first.holders.len(), 1);
    assert_eq!(first.holders[0].mode, AccessMode::Write);
    assert_eq!(first.holders[0].thread, "holder");
    assert!(first.holders[0].trace.is_some());

    assert!(matches!(
        events.last(),
        Some(LockEvent::Recovered { timeouts: 1, .. })
    ));
    assert_eq!(lock.stats().contentions, 1);
    assert!(lock.holders().is_empty());
}

#[test]
fn test_reports_suppressed_after_limit() {
    let (reporter, events) = ChannelReporter::unbounded();
    let config = LockConfig::diagnostic()
        .with_timeout_ms(5)
        .with_max_timeout_ms(5)
        .with_max_reports(1);
    let lock = Arc::new(
        TracedLock::with_config("chat", (), config).with_reporter(Arc::new(reporter)),
    );

    let holder = hold_write(&lock, Duration::from_millis(100));
    drop(lock.write());
    holder.join().unwrap();

    let events: Vec<LockEvent> = events.try_iter().collect();
    let contentions = events
        .iter()
        .filter(|event| matches!(event, LockEvent::Contention(_)))
        .count();
    let suppressed = events
        .iter()
        .filter(|event| matches!(event, LockEvent::ReportsSuppressed { after: 1, .. }))
        .count();

    assert_eq!(contentions, 1);
    assert_eq!(suppressed, 1);
    assert!(matches!(
        events.last(),
        Some(LockEvent::Recovered { timeouts, .. }) if *timeouts >= 2
    ));
}

#[test]
fn test_guard_released_on_other_thread_lock_reports_mismatch() {
    let (reporter, events) = ChannelReporter::unbounded();
    let zone = TracedLock::named("zone", ()).with_reporter(Arc::new(reporter));
    let inventory = TracedLock::named("inventory", ());

    let guard = inventory.read();
    assert!(zone.release_read(guard).is_err());
    assert!(!inventory.is_locked());

    match events.try_recv().unwrap() {
        LockEvent::ReleaseMismatch(report) => {
            assert_eq!(report.lock, "zone");
            assert_eq!(report.owner, "inventory");
            assert!(!report.trace.to_string().is_empty());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
