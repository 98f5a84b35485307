//! Integration tests for the object directory and the contention probe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tessera::core::{HazardDomain, LockConfig, LockEvent, TesseraConfig, TracedLock};
use tessera::{run_probe, ObjectDirectory, ProbeConfig, Record};

#[test]
fn test_readers_never_block_on_stalled_writer() {
    let domain = HazardDomain::default();
    let directory = Arc::new(ObjectDirectory::new(
        &domain,
        TracedLock::named("directory", ()),
        [("zone".to_string(), Record::new(0))],
    ));

    // Hold the writer lock for the whole read phase.
    let held = directory.writer_lock().try_write();
    assert!(held.is_some());

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let directory = Arc::clone(&directory);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let handle = directory.register();
            for _ in 0..1_000 {
                let consistent = directory
                    .read(&handle, "zone", Record::is_consistent)
                    .unwrap();
                assert_eq!(consistent, Some(true));
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    reader.join().unwrap();
    assert!(done.load(Ordering::SeqCst));
    drop(held);
}

#[test]
fn test_concurrent_updates_are_serialized() {
    let domain = HazardDomain::default();
    let directory = Arc::new(ObjectDirectory::new(
        &domain,
        TracedLock::named("directory", ()),
        [("counter".to_string(), Record::new(0))],
    ));

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let directory = Arc::clone(&directory);
            thread::spawn(move || {
                let handle = directory.register();
                for _ in 0..250 {
                    assert!(directory.update(&handle, "counter", Record::next).unwrap());
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let handle = directory.register();
    let version = directory.read(&handle, "counter", Record::version).unwrap();
    assert_eq!(version, Some(1_000));
    assert_eq!(directory.reclaim_stats().retired, 1_000);
}

#[test]
fn test_probe_stall_produces_contention_reports() {
    let core = TesseraConfig {
        lock: LockConfig::diagnostic().with_timeout_ms(20),
        ..TesseraConfig::default()
    };
    let config = ProbeConfig {
        readers: 2,
        writers: 2,
        entries: 4,
        duration: Duration::from_millis(300),
        stall: Some(Duration::from_millis(120)),
        core,
        ..ProbeConfig::default()
    };

    let report = run_probe(&config).unwrap();

    assert_eq!(report.torn_reads, 0);
    assert!(report.reads > 0);
    assert!(report.contention_reports() >= 1);
    assert!(report.events.iter().any(|event| matches!(
        event,
        LockEvent::Contention(report)
            if report.holders.iter().any(|holder| holder.thread == "stalled-writer")
    )));
}
