//! # Diagnostic Capture
//!
//! Stack snapshots, monotonic timestamps and thread labels used by lock
//! contention reports.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Process-wide origin for [`Timestamp`].
static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Captured call path of a thread at one point in its execution.
///
/// Cloning is cheap; the frames are shared.
#[derive(Clone)]
pub struct StackSnapshot {
    trace: Arc<Backtrace>,
}

impl StackSnapshot {
    /// Captures the calling thread's stack, regardless of `RUST_BACKTRACE`.
    #[must_use]
    pub fn capture() -> Self {
        Self {
            trace: Arc::new(Backtrace::force_capture()),
        }
    }

    /// Returns the underlying backtrace.
    #[inline]
    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.trace
    }
}

impl fmt::Display for StackSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.trace, f)
    }
}

impl fmt::Debug for StackSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackSnapshot")
            .field("status", &self.trace.status())
            .finish()
    }
}

/// Monotonic nanosecond timestamp relative to process start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    nanos: u64,
}

impl Timestamp {
    /// Current time.
    #[must_use]
    pub fn now() -> Self {
        let nanos = epoch().elapsed().as_nanos();
        Self {
            nanos: u64::try_from(nanos).unwrap_or(u64::MAX),
        }
    }

    /// Nanoseconds since process start.
    #[inline]
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.nanos
    }

    /// Milliseconds since process start.
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.nanos / 1_000_000
    }

    /// Time elapsed since this timestamp.
    #[must_use]
    pub fn elapsed(self) -> Duration {
        Self::now().duration_since(self)
    }

    /// Time between `earlier` and `self`, zero if `earlier` is later.
    #[inline]
    #[must_use]
    pub const fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(earlier.nanos))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} nsec)", self.nanos)
    }
}

/// Name of the current thread, or its id when unnamed.
#[must_use]
pub fn thread_label() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_owned(),
        None => format!("{:?}", thread.id()),
    }
}
