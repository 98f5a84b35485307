//! # Hazard Domain
//!
//! The reclamation manager: a hazard record table, a retire list, and the
//! scan that reconciles the two.
//!
//! ## Scan
//!
//! ```text
//!  retire list ──take──► [a][b][c][d]
//!                              │
//!  record table ──snapshot──► {b, d}   (sorted, deduplicated)
//!                              │
//!             ┌────────────────┴───────────────┐
//!             ▼                                ▼
//!        destroy a, c                   re-append b, d
//!   (after the list lock is released)   (next scan retries)
//! ```
//!
//! The whole list is detached before the snapshot, so retirements that
//! race with a scan land on a fresh list and are handled by a later pass.

#![allow(unsafe_code)]

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use super::hazard::{HazardHandle, HazardRecord};
use super::retired::Retired;
use crate::config::ReclaimConfig;
use crate::error::{CoreError, CoreResult};

/// Process-wide domain.
static GLOBAL: OnceLock<HazardDomain> = OnceLock::new();

/// Counters exposed through [`HazardDomain::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Objects handed to the domain.
    pub retired: u64,
    /// Objects destroyed.
    pub reclaimed: u64,
    /// Objects waiting for destruction.
    pub pending: u64,
    /// Scan passes run.
    pub scans: u64,
    /// Scans that destroyed nothing while the list stayed over threshold.
    pub stalled_scans: u64,
}

#[derive(Default)]
struct Counters {
    retired: AtomicU64,
    reclaimed: AtomicU64,
    scans: AtomicU64,
    stalled_scans: AtomicU64,
}

struct DomainShared {
    config: ReclaimConfig,
    /// Append-only; records are recycled through their `active` flag.
    records: RwLock<Vec<Arc<HazardRecord>>>,
    retired: Mutex<Vec<Retired>>,
    counters: Counters,
}

impl Drop for DomainShared {
    fn drop(&mut self) {
        // Handles and cells keep the domain alive, so none are left and no
        // slot can publish anything.
        for entry in self.retired.get_mut().drain(..) {
            // SAFETY: no hazard can reference a retired object anymore.
            unsafe { entry.reclaim() };
        }
    }
}

/// Deferred reclamation manager.
///
/// Cloning is cheap and yields another handle to the same domain.
///
/// # Example
///
/// ```rust,ignore
/// let domain = HazardDomain::default();
/// let cell = HazardCell::new(&domain, Zone::new(12));
///
/// // Writer: replace the zone; the old one is retired, not freed.
/// cell.store(Zone::new(13));
///
/// // Reader (any thread): protect before dereferencing.
/// let handle = domain.register();
/// let zone = handle.protect(&cell)?;
/// ```
#[derive(Clone)]
pub struct HazardDomain {
    shared: Arc<DomainShared>,
}

impl Default for HazardDomain {
    fn default() -> Self {
        Self::from_valid(ReclaimConfig::default())
    }
}

impl HazardDomain {
    /// Creates a domain.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if the configuration is out of range.
    pub fn new(config: ReclaimConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: ReclaimConfig) -> Self {
        Self {
            shared: Arc::new(DomainShared {
                config,
                records: RwLock::new(Vec::new()),
                retired: Mutex::new(Vec::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// The process-wide domain, created with default settings on first use
    /// unless [`HazardDomain::install_global`] ran earlier.
    ///
    /// A static is never dropped: objects still on its retire list at exit
    /// are destroyed only by [`HazardDomain::shutdown_global`].
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::default)
    }

    /// Final scan of the process-wide domain, for use at exit once worker
    /// threads have joined.
    ///
    /// Returns the number of objects destroyed. Objects a live hazard still
    /// publishes are logged and leaked. Does nothing if the global domain
    /// was never created.
    pub fn shutdown_global() -> usize {
        let Some(domain) = GLOBAL.get() else {
            return 0;
        };

        let reclaimed = domain.scan();
        let pending = domain.pending();
        if pending > 0 {
            tracing::warn!(
                "Global hazard domain shut down with {} objects still hazarded; leaking them",
                pending
            );
        } else {
            tracing::debug!("Global hazard domain shut down, {} objects destroyed", reclaimed);
        }
        reclaimed
    }

    /// Objects currently on the retire list.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.retired.lock().len()
    }

    /// Creates the process-wide domain with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if the configuration is invalid or the
    /// global domain already exists.
    pub fn install_global(config: ReclaimConfig) -> CoreResult<&'static Self> {
        let domain = Self::new(config)?;
        GLOBAL
            .set(domain)
            .map_err(|_| CoreError::Config("global hazard domain is already initialized".into()))?;
        Ok(Self::global())
    }

    /// Configuration of this domain.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ReclaimConfig {
        &self.shared.config
    }

    /// Whether `other` refers to the same domain.
    #[inline]
    #[must_use]
    pub fn same_domain(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Claims a hazard record for the calling thread.
    ///
    /// Reuses a record released by an exited thread when one is free.
    #[must_use]
    pub fn register(&self) -> HazardHandle {
        {
            let records = self.shared.records.read();
            if let Some(record) = records.iter().find(|record| record.try_claim()) {
                return HazardHandle::new(self.clone(), Arc::clone(record));
            }
        }

        let record = Arc::new(HazardRecord::claimed(self.shared.config.slots_per_thread));
        self.shared.records.write().push(Arc::clone(&record));
        HazardHandle::new(self.clone(), record)
    }

    /// Number of records ever created (the high-water mark of registered threads).
    #[must_use]
    pub fn registered_records(&self) -> usize {
        self.shared.records.read().len()
    }

    /// Number of records currently claimed by a thread.
    #[must_use]
    pub fn active_records(&self) -> usize {
        self.shared
            .records
            .read()
            .iter()
            .filter(|record| record.is_active())
            .count()
    }

    /// Hands a boxed object to the domain for deferred destruction.
    ///
    /// Runs [`HazardDomain::scan`] before returning once the retire list
    /// grows past the configured threshold.
    ///
    /// # Safety
    ///
    /// - `ptr` must come from `Box::<T>::into_raw`
    /// - the object must already be unreachable from every shared structure,
    ///   so no new hazard on it can be validated
    /// - the object must not be retired twice
    pub unsafe fn retire<T: Send + 'static>(&self, ptr: NonNull<T>) {
        // SAFETY: forwarded from the caller.
        let entry = unsafe { Retired::new(ptr) };

        let pending = {
            let mut list = self.shared.retired.lock();
            list.push(entry);
            list.len()
        };
        self.shared.counters.retired.fetch_add(1, Ordering::Relaxed);

        if pending > self.shared.config.retire_threshold {
            self.scan();
        }
    }

    /// Destroys every retired object that no hazard slot publishes.
    ///
    /// Returns the number of objects destroyed. Objects still published
    /// stay on the retire list for a later scan.
    pub fn scan(&self) -> usize {
        let shared = &*self.shared;
        shared.counters.scans.fetch_add(1, Ordering::Relaxed);

        let pending = std::mem::take(&mut *shared.retired.lock());
        if pending.is_empty() {
            return 0;
        }

        let hazards = self.snapshot_hazards();
        let (kept, safe): (Vec<Retired>, Vec<Retired>) = pending
            .into_iter()
            .partition(|entry| hazards.binary_search(&entry.address()).is_ok());

        if !kept.is_empty() {
            let kept_count = kept.len();
            let remaining = {
                let mut list = shared.retired.lock();
                list.extend(kept);
                list.len()
            };
            if safe.is_empty() && remaining > shared.config.retire_threshold {
                shared.counters.stalled_scans.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Hazard scan reclaimed nothing: {} objects still hazarded, {} pending",
                    kept_count,
                    remaining
                );
            }
        }

        let reclaimed = safe.len();
        for entry in safe {
            // SAFETY: the address was absent from a snapshot taken after the
            // object was unlinked, so no reader can still validate it.
            unsafe { entry.reclaim() };
        }
        shared
            .counters
            .reclaimed
            .fetch_add(reclaimed as u64, Ordering::Relaxed);

        tracing::trace!("Hazard scan destroyed {} objects", reclaimed);
        reclaimed
    }

    /// Sorted, deduplicated addresses published by all records.
    fn snapshot_hazards(&self) -> Vec<usize> {
        fence(Ordering::SeqCst);

        let records = self.shared.records.read();
        let mut hazards = Vec::with_capacity(records.len() * self.shared.config.slots_per_thread);
        for record in records.iter() {
            record.collect_into(&mut hazards);
        }
        drop(records);

        hazards.sort_unstable();
        hazards.dedup();
        hazards
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> ReclaimStats {
        let counters = &self.shared.counters;
        let retired = counters.retired.load(Ordering::Relaxed);
        let reclaimed = counters.reclaimed.load(Ordering::Relaxed);
        ReclaimStats {
            retired,
            reclaimed,
            pending: retired.saturating_sub(reclaimed),
            scans: counters.scans.load(Ordering::Relaxed),
            stalled_scans: counters.stalled_scans.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for HazardDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HazardDomain")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}
