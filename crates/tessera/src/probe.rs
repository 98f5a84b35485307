//! # Contention Probe
//!
//! A timed workload over an [`ObjectDirectory`]: readers validate objects
//! lock-free while writers replace them, and an optional stalled writer
//! holds the writer lock long enough to provoke contention reports.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera_core::{
    ChannelReporter, CoreResult, HazardDomain, LockEvent, LockStats, ReclaimStats, TesseraConfig,
    TracedLock,
};

use crate::directory::ObjectDirectory;

/// Object stored in the probe's directory.
///
/// Every field is derived from `version`, so a reader can tell whether the
/// object it sees was ever freed and overwritten.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    version: u64,
    lanes: [u64; 4],
    digest: u64,
}

impl Record {
    /// Builds the record for `version`.
    #[must_use]
    pub fn new(version: u64) -> Self {
        let lanes = [
            version,
            version.wrapping_mul(3),
            version.rotate_left(17),
            !version,
        ];
        Self {
            version,
            lanes,
            digest: Self::digest_of(&lanes),
        }
    }

    fn digest_of(lanes: &[u64; 4]) -> u64 {
        lanes.iter().fold(0x9e37_79b9, |acc, lane| acc.rotate_left(7) ^ lane)
    }

    /// Successor record.
    #[must_use]
    pub fn next(&self) -> Self {
        Self::new(self.version.wrapping_add(1))
    }

    /// Version number.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether every field still matches the version.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.digest == Self::digest_of(&self.lanes) && *self == Self::new(self.version)
    }
}

/// Probe parameters.
#[derive(Clone, Debug)]
pub struct ProbeConfig {
    /// Reader threads.
    pub readers: usize,
    /// Writer threads.
    pub writers: usize,
    /// Directory entries.
    pub entries: usize,
    /// How long readers and writers run.
    pub duration: Duration,
    /// Hold the writer lock this long on a dedicated thread.
    pub stall: Option<Duration>,
    /// Base seed for per-thread entry selection.
    pub seed: u64,
    /// Lock and reclamation settings.
    pub core: TesseraConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            readers: 4,
            writers: 2,
            entries: 8,
            duration: Duration::from_millis(500),
            stall: None,
            seed: 0x7e55_e7a0,
            core: TesseraConfig::default(),
        }
    }
}

/// Outcome of [`run_probe`].
#[derive(Debug)]
pub struct ProbeReport {
    /// Successful lock-free reads.
    pub reads: u64,
    /// Reads that saw an inconsistent object.
    pub torn_reads: u64,
    /// Completed updates.
    pub writes: u64,
    /// Wall time of the run.
    pub elapsed: Duration,
    /// Writer lock counters.
    pub lock: LockStats,
    /// Reclamation counters.
    pub reclaim: ReclaimStats,
    /// Lock diagnostics emitted during the run.
    pub events: Vec<LockEvent>,
}

impl ProbeReport {
    /// Number of contention reports among [`ProbeReport::events`].
    #[must_use]
    pub fn contention_reports(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, LockEvent::Contention(_)))
            .count()
    }
}

#[derive(Default)]
struct Tally {
    reads: u64,
    torn_reads: u64,
    writes: u64,
}

/// Runs the workload described by `config`.
///
/// # Errors
///
/// Fails if the configuration is invalid or a worker thread cannot be
/// spawned.
pub fn run_probe(config: &ProbeConfig) -> CoreResult<ProbeReport> {
    config.core.validate()?;

    let domain = HazardDomain::new(config.core.reclaim.clone())?;
    let (reporter, events) = ChannelReporter::unbounded();
    let writers = TracedLock::with_config("directory", (), config.core.lock.clone())
        .with_reporter(Arc::new(reporter));

    let names: Vec<String> = (0..config.entries).map(|i| format!("object-{i}")).collect();
    let directory = ObjectDirectory::new(
        &domain,
        writers,
        names.iter().map(|name| (name.clone(), Record::new(0))),
    );

    tracing::info!(
        "Probe starting: {} readers, {} writers, {} entries, {:?}",
        config.readers,
        config.writers,
        config.entries,
        config.duration
    );

    let started = Instant::now();
    let deadline = started + config.duration;

    let tally = thread::scope(|scope| -> CoreResult<Tally> {
        let mut workers = Vec::with_capacity(config.readers + config.writers);

        if let Some(stall) = config.stall {
            let directory = &directory;
            workers.push(
                thread::Builder::new()
                    .name("stalled-writer".into())
                    .spawn_scoped(scope, move || -> CoreResult<Tally> {
                        let _held = directory.writer_lock().write();
                        thread::sleep(stall);
                        Ok(Tally::default())
                    })?,
            );
        }

        for index in 0..config.readers {
            let (directory, names) = (&directory, &names);
            let seed = config.seed ^ (index as u64);
            workers.push(
                thread::Builder::new()
                    .name(format!("reader-{index}"))
                    .spawn_scoped(scope, move || read_until(directory, names, seed, deadline))?,
            );
        }

        for index in 0..config.writers {
            let (directory, names) = (&directory, &names);
            let seed = config.seed.rotate_left(32) ^ (index as u64);
            workers.push(
                thread::Builder::new()
                    .name(format!("writer-{index}"))
                    .spawn_scoped(scope, move || write_until(directory, names, seed, deadline))?,
            );
        }

        let mut total = Tally::default();
        for worker in workers {
            let tally = match worker.join() {
                Ok(result) => result?,
                Err(payload) => std::panic::resume_unwind(payload),
            };
            total.reads += tally.reads;
            total.torn_reads += tally.torn_reads;
            total.writes += tally.writes;
        }
        Ok(total)
    })?;

    let report = ProbeReport {
        reads: tally.reads,
        torn_reads: tally.torn_reads,
        writes: tally.writes,
        elapsed: started.elapsed(),
        lock: directory.lock_stats(),
        reclaim: directory.reclaim_stats(),
        events: events.try_iter().collect(),
    };

    if report.torn_reads > 0 {
        tracing::error!("Probe observed {} inconsistent reads", report.torn_reads);
    }
    tracing::info!(
        "Probe finished: {} reads, {} writes, {} reclaimed, {} contention reports",
        report.reads,
        report.writes,
        report.reclaim.reclaimed,
        report.contention_reports()
    );

    Ok(report)
}

fn read_until(
    directory: &ObjectDirectory<Record>,
    names: &[String],
    seed: u64,
    deadline: Instant,
) -> CoreResult<Tally> {
    let handle = directory.register();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut tally = Tally::default();

    while Instant::now() < deadline {
        let Some(name) = pick(&mut rng, names) else { break };
        match directory.read(&handle, name, Record::is_consistent)? {
            Some(true) => tally.reads += 1,
            Some(false) => tally.torn_reads += 1,
            None => {}
        }
    }
    Ok(tally)
}

fn write_until(
    directory: &ObjectDirectory<Record>,
    names: &[String],
    seed: u64,
    deadline: Instant,
) -> CoreResult<Tally> {
    let handle = directory.register();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut tally = Tally::default();

    while Instant::now() < deadline {
        let Some(name) = pick(&mut rng, names) else { break };
        if directory.update(&handle, name, Record::next)? {
            tally.writes += 1;
        }
    }
    Ok(tally)
}

fn pick<'a>(rng: &mut StdRng, names: &'a [String]) -> Option<&'a str> {
    if names.is_empty() {
        return None;
    }
    Some(names[rng.gen_range(0..names.len())].as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_consistency() {
        let record = Record::new(41);
        assert!(record.is_consistent());
        assert_eq!(record.next().version(), 42);
        assert!(record.next().is_consistent());
    }

    #[test]
    fn test_short_probe_runs_clean() {
        let config = ProbeConfig {
            readers: 2,
            writers: 1,
            entries: 4,
            duration: Duration::from_millis(50),
            ..ProbeConfig::default()
        };

        let report = run_probe(&config).unwrap();
        assert_eq!(report.torn_reads, 0);
        assert!(report.reads > 0);
        assert!(report.writes > 0);
        assert_eq!(report.reclaim.retired, report.writes);
        assert_eq!(report.lock.acquisitions, report.writes);
        assert!(report.events.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ProbeConfig::default();
        config.core.reclaim.slots_per_thread = 0;
        assert!(run_probe(&config).is_err());
    }
}
