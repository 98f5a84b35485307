//! # Contention Probe
//!
//! Runs readers and writers against a shared object directory and prints
//! reclamation counters and every lock diagnostic raised during the run.
//!
//! ## Usage
//!
//! ```bash
//! contention_probe --readers 8 --writers 2 --millis 2000
//!
//! # Hold the writer lock for 600 ms to provoke contention reports
//! contention_probe --stall-ms 600 --config config/tessera.toml
//! ```

use std::process;
use std::time::Duration;

use tessera::core::{HazardDomain, LockMode, TesseraConfig};
use tessera::{run_probe, ProbeConfig};

/// Events printed in full before the rest are summarized.
const MAX_PRINTED_EVENTS: usize = 6;

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         TESSERA CONTENTION PROBE                                 ║");
    println!("║         HAZARD POINTERS + TRACED LOCKS                           ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    // Parse command line arguments (simple parsing, no external deps)
    let args: Vec<String> = std::env::args().collect();
    let mut config = ProbeConfig::default();
    let mut config_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--readers" | "-r" => {
                if i + 1 < args.len() {
                    config.readers = args[i + 1].parse().unwrap_or(config.readers);
                    i += 1;
                }
            }
            "--writers" | "-w" => {
                if i + 1 < args.len() {
                    config.writers = args[i + 1].parse().unwrap_or(config.writers);
                    i += 1;
                }
            }
            "--millis" | "-m" => {
                if i + 1 < args.len() {
                    if let Ok(millis) = args[i + 1].parse() {
                        config.duration = Duration::from_millis(millis);
                    }
                    i += 1;
                }
            }
            "--stall-ms" | "-s" => {
                if i + 1 < args.len() {
                    config.stall = args[i + 1].parse().ok().map(Duration::from_millis);
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Usage: contention_probe [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -r, --readers <NUM>     Reader threads (default: 4)");
                println!("  -w, --writers <NUM>     Writer threads (default: 2)");
                println!("  -m, --millis <MS>       Run time in milliseconds (default: 500)");
                println!("  -s, --stall-ms <MS>     Hold the writer lock this long on one thread");
                println!("  -c, --config <PATH>     TOML file with [lock] and [reclaim] sections");
                println!("  -h, --help              Show this help");
                return;
            }
            _ => {}
        }
        i += 1;
    }

    if let Some(path) = &config_path {
        match TesseraConfig::load(path) {
            Ok(core) => config.core = core,
            Err(e) => {
                eprintln!("   ✗ FATAL: Failed to load {path}: {e}");
                process::exit(1);
            }
        }
    }

    // A stall only produces reports when waits are timed.
    if let Some(stall) = config.stall {
        let lock = &mut config.core.lock;
        if lock.mode == LockMode::Direct {
            lock.mode = LockMode::Diagnostic;
        }
        let stall_ms = u64::try_from(stall.as_millis()).unwrap_or(u64::MAX);
        if lock.timeout_ms >= stall_ms {
            *lock = lock.clone().with_timeout_ms((stall_ms / 4).max(1));
        }
    }

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Readers:            {}", config.readers);
    println!("│ Writers:            {}", config.writers);
    println!("│ Duration:           {:?}", config.duration);
    match config.stall {
        Some(stall) => println!("│ Stall:              {stall:?}"),
        None => println!("│ Stall:              none"),
    }
    println!("│ Lock mode:          {:?}", config.core.lock.mode);
    println!("│ Lock timeout:       {} ms", config.core.lock.timeout_ms);
    println!("│ Retire threshold:   {}", config.core.reclaim.retire_threshold);
    println!("│ Slots per thread:   {}", config.core.reclaim.slots_per_thread);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let report = match run_probe(&config) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("   ✗ FATAL: Probe failed: {e}");
            process::exit(1);
        }
    };

    println!("┌─ RESULTS ───────────────────────────────────────────────────────┐");
    println!("│ Elapsed:            {:?}", report.elapsed);
    println!("│ Reads:              {}", report.reads);
    println!("│ Torn reads:         {}", report.torn_reads);
    println!("│ Writes:             {}", report.writes);
    println!("│ Retired:            {}", report.reclaim.retired);
    println!("│ Reclaimed:          {}", report.reclaim.reclaimed);
    println!("│ Pending:            {}", report.reclaim.pending);
    println!("│ Scans:              {}", report.reclaim.scans);
    println!("│ Stalled scans:      {}", report.reclaim.stalled_scans);
    println!("│ Lock acquisitions:  {}", report.lock.acquisitions);
    println!("│ Lock timeouts:      {}", report.lock.contentions);
    println!("└──────────────────────────────────────────────────────────────────┘");

    if !report.events.is_empty() {
        println!();
        println!("═══ LOCK DIAGNOSTICS ({} events) ═══", report.events.len());
        for event in report.events.iter().take(MAX_PRINTED_EVENTS) {
            println!();
            println!("{event}");
        }
        if report.events.len() > MAX_PRINTED_EVENTS {
            println!("... {} more", report.events.len() - MAX_PRINTED_EVENTS);
        }
    }

    // Workers have joined; nothing protects global retirements any more.
    HazardDomain::shutdown_global();

    println!();
    if report.torn_reads == 0 {
        println!("   ✓ Every read saw a consistent object");
    } else {
        println!("   ✗ {} reads saw a reclaimed object", report.torn_reads);
        process::exit(2);
    }
}
