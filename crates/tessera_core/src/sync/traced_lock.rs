//! # Traced Reader/Writer Lock
//!
//! A `parking_lot::RwLock` that counts acquisitions and, in diagnostic
//! mode, turns a silent deadlock into a stream of reports naming the
//! blocked thread and every thread holding the lock.
//!
//! ## Acquisition
//!
//! ```text
//!  direct:      read()/write() ──────────────► native lock (blocks)
//!
//!  diagnostic:  try_*_for(2s) ──timeout──► report #1 ──► try_*_for(4s)
//!                     │                                      │
//!                     ▼                                  ──timeout──► report #2 ...
//!                  acquired                   (backoff capped at max_timeout,
//!                                              reports capped at max_reports)
//! ```
//!
//! Diagnostic state lives in the guard and in a table of live holders.
//! A holder is entered as soon as the native lock is granted, before its
//! stack is captured, and removed before the native lock is released, so a
//! report never misses a holder or shows an acquisition that has ended.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::report::{
    AccessMode, ContentionReport, HolderSnapshot, LockEvent, LockPhase, LockReporter,
    MismatchReport, TracingReporter,
};
use crate::config::{LockConfig, LockMode, MIN_LOCK_TIMEOUT_MS};
use crate::diagnostics::{thread_label, StackSnapshot, Timestamp};
use crate::error::{CoreError, CoreResult};

/// Source of lock identities for release checks.
static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// A traced lock that protects no data of its own.
pub type TracedLock = TracedRwLock<()>;

/// Per-acquisition diagnostic state, owned by the guard.
#[derive(Clone, Debug)]
pub struct Acquisition {
    /// Acquisition number on the lock.
    pub ticket: u64,
    /// Mode held.
    pub mode: AccessMode,
    /// When the lock was granted.
    pub acquired_at: Timestamp,
    /// Acquiring stack (diagnostic mode only).
    pub trace: Option<StackSnapshot>,
}

/// Counters exposed through [`TracedRwLock::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Successful acquisitions.
    pub acquisitions: u64,
    /// Timed attempts that expired.
    pub contentions: u64,
    /// Releases against the wrong lock.
    pub mismatches: u64,
    /// Live acquisitions recorded in the holder table.
    pub holders: usize,
}

/// Reader/writer lock with acquisition accounting and timeout diagnostics.
///
/// # Example
///
/// ```rust,ignore
/// let zone = TracedRwLock::with_config("zone-12", ZoneState::default(), LockConfig::diagnostic());
///
/// {
///     let state = zone.read();
///     // many readers at once
/// }
///
/// let mut state = zone.write();
/// state.tick();
/// ```
pub struct TracedRwLock<T> {
    id: u64,
    name: String,
    config: LockConfig,
    reporter: Arc<dyn LockReporter>,
    tickets: AtomicU64,
    acquisitions: AtomicU64,
    contentions: AtomicU64,
    mismatches: AtomicU64,
    holders: Mutex<Vec<HolderSnapshot>>,
    inner: RwLock<T>,
}

impl<T: Default> Default for TracedRwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> TracedRwLock<T> {
    /// Creates an unnamed lock in direct mode.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_config("", value, LockConfig::default())
    }

    /// Creates a named lock in direct mode.
    #[must_use]
    pub fn named(name: impl Into<String>, value: T) -> Self {
        Self::with_config(name, value, LockConfig::default())
    }

    /// Creates a named lock with an explicit configuration.
    ///
    /// Out-of-range settings are logged and clamped (see
    /// [`LockConfig::normalized`]), so a zero timeout never busy-spins.
    #[must_use]
    pub fn with_config(name: impl Into<String>, value: T, config: LockConfig) -> Self {
        let name = name.into();
        if let Err(err) = config.validate() {
            tracing::warn!("Lock [{}] config clamped: {}", name, err);
        }

        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            name,
            config: config.normalized(),
            reporter: Arc::new(TracingReporter),
            tickets: AtomicU64::new(0),
            acquisitions: AtomicU64::new(0),
            contentions: AtomicU64::new(0),
            mismatches: AtomicU64::new(0),
            holders: Mutex::new(Vec::new()),
            inner: RwLock::new(value),
        }
    }

    /// Replaces the diagnostics sink.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn LockReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Diagnostic label.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the lock.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Active configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Whether any reader or writer currently holds the lock.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Live acquisitions recorded in diagnostic mode.
    #[must_use]
    pub fn holders(&self) -> Vec<HolderSnapshot> {
        self.holders.lock().clone()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contentions: self.contentions.load(Ordering::Relaxed),
            mismatches: self.mismatches.load(Ordering::Relaxed),
            holders: self.holders.lock().len(),
        }
    }

    /// Acquires shared access, blocking until granted.
    ///
    /// In diagnostic mode a wait longer than the configured timeout is
    /// reported and retried with a longer timeout; the call never fails.
    pub fn read(&self) -> TracedReadGuard<'_, T> {
        let ticket = self.next_ticket();
        self.log_phase(AccessMode::Read, ticket, LockPhase::Acquiring);
        let guard = match self.config.mode {
            LockMode::Direct => self.inner.read(),
            LockMode::Diagnostic => {
                self.acquire_timed(AccessMode::Read, ticket, |wait| self.inner.try_read_for(wait))
            }
        };
        TracedReadGuard {
            guard,
            held: self.on_acquired(AccessMode::Read, ticket),
        }
    }

    /// Acquires exclusive access, blocking until granted.
    ///
    /// In diagnostic mode a wait longer than the configured timeout is
    /// reported and retried with a longer timeout; the call never fails.
    pub fn write(&self) -> TracedWriteGuard<'_, T> {
        let ticket = self.next_ticket();
        self.log_phase(AccessMode::Write, ticket, LockPhase::Acquiring);
        let guard = match self.config.mode {
            LockMode::Direct => self.inner.write(),
            LockMode::Diagnostic => {
                self.acquire_timed(AccessMode::Write, ticket, |wait| self.inner.try_write_for(wait))
            }
        };
        TracedWriteGuard {
            guard,
            held: self.on_acquired(AccessMode::Write, ticket),
        }
    }

    /// Attempts exclusive access without blocking or reporting.
    pub fn try_write(&self) -> Option<TracedWriteGuard<'_, T>> {
        let guard = self.inner.try_write()?;
        let ticket = self.next_ticket();
        Some(TracedWriteGuard {
            guard,
            held: self.on_acquired(AccessMode::Write, ticket),
        })
    }

    /// Attempts shared access without blocking or reporting.
    pub fn try_read(&self) -> Option<TracedReadGuard<'_, T>> {
        let guard = self.inner.try_read()?;
        let ticket = self.next_ticket();
        Some(TracedReadGuard {
            guard,
            held: self.on_acquired(AccessMode::Read, ticket),
        })
    }

    /// Releases a read guard, checking that this lock issued it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReleaseMismatch`] if the guard belongs to another
    /// lock. The mismatch is also reported, and the guard is still released
    /// on the lock that issued it.
    pub fn release_read<U>(&self, guard: TracedReadGuard<'_, U>) -> CoreResult<()> {
        let owner = guard.held.lock;
        let result = self.check_release(owner.id, owner.name(), AccessMode::Read);
        drop(guard);
        result
    }

    /// Releases a write guard, checking that this lock issued it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReleaseMismatch`] if the guard belongs to another
    /// lock. The mismatch is also reported, and the guard is still released
    /// on the lock that issued it.
    pub fn release_write<U>(&self, guard: TracedWriteGuard<'_, U>) -> CoreResult<()> {
        let owner = guard.held.lock;
        let result = self.check_release(owner.id, owner.name(), AccessMode::Write);
        drop(guard);
        result
    }

    /// Drains the lock and returns the protected value.
    ///
    /// Takes and drops the write lock first, through the diagnostic path
    /// when configured, so a still-held lock is reported instead of being
    /// destroyed underneath its holder.
    #[must_use]
    pub fn force_unlock_and_destroy(self) -> T {
        drop(self.write());

        tracing::debug!(
            "Destroying lock [{}] after {} acquisitions",
            self.name,
            self.acquisitions.load(Ordering::Relaxed)
        );
        self.inner.into_inner()
    }

    fn next_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Retries `attempt` with growing timeouts until it succeeds.
    fn acquire_timed<G>(
        &self,
        mode: AccessMode,
        ticket: u64,
        mut attempt: impl FnMut(Duration) -> Option<G>,
    ) -> G {
        let started = Timestamp::now();
        let mut wait = self
            .config
            .timeout()
            .max(Duration::from_millis(MIN_LOCK_TIMEOUT_MS));
        let mut timeouts: u32 = 0;

        loop {
            if let Some(guard) = attempt(wait) {
                if timeouts > 0 {
                    self.reporter.report(LockEvent::Recovered {
                        lock: self.name.clone(),
                        mode,
                        ticket,
                        waited: started.elapsed(),
                        timeouts,
                    });
                }
                return guard;
            }

            timeouts = timeouts.saturating_add(1);
            self.contentions.fetch_add(1, Ordering::Relaxed);

            if timeouts <= self.config.max_reports {
                self.report_contention(mode, ticket, timeouts, started.elapsed());
            } else if timeouts == self.config.max_reports.saturating_add(1) {
                self.reporter.report(LockEvent::ReportsSuppressed {
                    lock: self.name.clone(),
                    mode,
                    ticket,
                    after: self.config.max_reports,
                });
            } else {
                tracing::debug!(
                    "[{}] {} #{} still blocked after {:?}",
                    self.name,
                    mode,
                    ticket,
                    started.elapsed()
                );
            }

            wait = wait.saturating_mul(2).min(self.config.max_timeout());
        }
    }

    fn report_contention(&self, mode: AccessMode, ticket: u64, attempt: u32, waited: Duration) {
        self.reporter.report(LockEvent::Contention(ContentionReport {
            lock: self.name.clone(),
            mode,
            ticket,
            attempt,
            waited,
            thread: thread_label(),
            at: Timestamp::now(),
            trace: StackSnapshot::capture(),
            holders: self.holders(),
        }));
    }

    /// Called with the native lock held.
    fn on_acquired(&self, mode: AccessMode, ticket: u64) -> Held<'_, T> {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        let acquired_at = Timestamp::now();

        let trace = if self.config.mode == LockMode::Diagnostic {
            self.register_holder(mode, ticket, acquired_at);
            let trace = StackSnapshot::capture();
            self.attach_trace(ticket, &trace);
            Some(trace)
        } else {
            None
        };

        self.log_phase(mode, ticket, LockPhase::Acquired);

        Held {
            lock: self,
            acquisition: Acquisition {
                ticket,
                mode,
                acquired_at,
                trace,
            },
        }
    }

    /// Enters a holder with no trace yet.
    fn register_holder(&self, mode: AccessMode, ticket: u64, acquired_at: Timestamp) {
        self.holders.lock().push(HolderSnapshot {
            ticket,
            mode,
            thread: thread_label(),
            acquired_at,
            trace: None,
        });
    }

    fn attach_trace(&self, ticket: u64, trace: &StackSnapshot) {
        if let Some(holder) = self.holders.lock().iter_mut().find(|h| h.ticket == ticket) {
            holder.trace = Some(trace.clone());
        }
    }

    /// Called with the native lock still held.
    fn on_released(&self, acquisition: &Acquisition) {
        if self.config.mode == LockMode::Diagnostic {
            let mut holders = self.holders.lock();
            if let Some(index) = holders.iter().position(|h| h.ticket == acquisition.ticket) {
                holders.swap_remove(index);
            }
        }

        self.log_phase(acquisition.mode, acquisition.ticket, LockPhase::Releasing);
    }

    fn log_phase(&self, mode: AccessMode, ticket: u64, phase: LockPhase) {
        if self.config.log_acquisitions {
            self.reporter.report(LockEvent::Transition {
                lock: self.name.clone(),
                mode,
                ticket,
                phase,
                at: Timestamp::now(),
            });
        }
    }

    /// Called with the guard still alive.
    fn check_release(&self, owner_id: u64, owner: &str, mode: AccessMode) -> CoreResult<()> {
        if owner_id == self.id {
            return Ok(());
        }

        self.mismatches.fetch_add(1, Ordering::Relaxed);
        self.reporter.report(LockEvent::ReleaseMismatch(MismatchReport {
            lock: self.name.clone(),
            owner: owner.to_owned(),
            mode,
            thread: thread_label(),
            at: Timestamp::now(),
            trace: StackSnapshot::capture(),
        }));

        Err(CoreError::ReleaseMismatch {
            lock: self.name.clone(),
            owner: owner.to_owned(),
        })
    }
}

impl<T> fmt::Debug for TracedRwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedRwLock")
            .field("name", &self.name)
            .field("mode", &self.config.mode)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Bookkeeping half of a guard. Declared after the native guard, so it
/// drops once the native lock is released.
struct Held<'a, T> {
    lock: &'a TracedRwLock<T>,
    acquisition: Acquisition,
}

impl<T> Drop for Held<'_, T> {
    fn drop(&mut self) {
        self.lock
            .log_phase(self.acquisition.mode, self.acquisition.ticket, LockPhase::Released);
    }
}

/// Shared access to a [`TracedRwLock`]. Dropping it releases the lock.
pub struct TracedReadGuard<'a, T> {
    guard: RwLockReadGuard<'a, T>,
    held: Held<'a, T>,
}

impl<T> TracedReadGuard<'_, T> {
    /// Diagnostic state of this acquisition.
    #[inline]
    #[must_use]
    pub fn acquisition(&self) -> &Acquisition {
        &self.held.acquisition
    }
}

impl<T> Deref for TracedReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Drop for TracedReadGuard<'_, T> {
    fn drop(&mut self) {
        self.held.lock.on_released(&self.held.acquisition);
    }
}

/// Exclusive access to a [`TracedRwLock`]. Dropping it releases the lock.
pub struct TracedWriteGuard<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    held: Held<'a, T>,
}

impl<T> TracedWriteGuard<'_, T> {
    /// Diagnostic state of this acquisition.
    #[inline]
    #[must_use]
    pub fn acquisition(&self) -> &Acquisition {
        &self.held.acquisition
    }
}

impl<T> Deref for TracedWriteGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for TracedWriteGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for TracedWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.held.lock.on_released(&self.held.acquisition);
    }
}
