//! # Reclamation Benchmark
//!
//! Measures the reader fast path (protect + dereference) and the writer
//! path (store + retire, including amortized scans).
//!
//! Run with: `cargo bench --package tessera_core --bench reclaim_benchmark`

// Benchmarks don't need strict docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tessera_core::{HazardCell, HazardDomain, ReclaimConfig};

/// Benchmark: reader protect and release on an uncontended cell.
fn bench_protect(c: &mut Criterion) {
    let domain = HazardDomain::default();
    let cell = HazardCell::new(&domain, [0_u64; 8]);
    let handle = domain.register();

    c.bench_function("protect_read_release", |b| {
        b.iter(|| {
            let guard = handle.protect(&cell).unwrap().unwrap();
            black_box(guard[3])
        });
    });
}

/// Benchmark: store cost as the retire threshold varies.
fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_and_retire");

    for threshold in [16, 100, 1000] {
        let domain = HazardDomain::new(ReclaimConfig {
            retire_threshold: threshold,
            ..ReclaimConfig::default()
        })
        .unwrap();
        let cell = HazardCell::new(&domain, 0_u64);

        group.bench_with_input(BenchmarkId::from_parameter(threshold), &threshold, |b, _| {
            let mut next = 0_u64;
            b.iter(|| {
                next += 1;
                cell.store(black_box(next));
            });
        });
    }

    group.finish();
}

/// Benchmark: a full scan with many registered readers and no hazards.
fn bench_scan(c: &mut Criterion) {
    let domain = HazardDomain::new(ReclaimConfig {
        retire_threshold: usize::MAX,
        ..ReclaimConfig::default()
    })
    .unwrap();
    let _handles: Vec<_> = (0..64).map(|_| domain.register()).collect();
    let cell = HazardCell::new(&domain, 0_u64);

    c.bench_function("scan_100_retired_64_records", |b| {
        b.iter(|| {
            for value in 0..100 {
                cell.store(value);
            }
            black_box(domain.scan())
        });
    });
}

criterion_group!(benches, bench_protect, bench_store, bench_scan);
criterion_main!(benches);
