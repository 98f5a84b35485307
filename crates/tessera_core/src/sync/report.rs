//! # Lock Diagnostics Channel
//!
//! Contention and misuse are never returned to the blocked caller. They are
//! pushed to a [`LockReporter`], which by default writes `tracing` records.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::diagnostics::{StackSnapshot, Timestamp};

/// Shared or exclusive access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Shared (reader) access.
    Read,
    /// Exclusive (writer) access.
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("rlock"),
            Self::Write => f.write_str("wlock"),
        }
    }
}

/// Step of an acquisition traced with `log_acquisitions`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockPhase {
    /// About to wait on the native lock.
    Acquiring,
    /// Native lock granted.
    Acquired,
    /// Guard dropped, native lock still held.
    Releasing,
    /// Native lock released.
    Released,
}

impl fmt::Display for LockPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Acquiring => "acquiring",
            Self::Acquired => "acquired",
            Self::Releasing => "releasing",
            Self::Released => "released",
        })
    }
}

/// One live acquisition of a lock, as seen by a blocked waiter.
#[derive(Clone, Debug)]
pub struct HolderSnapshot {
    /// Acquisition number on the lock.
    pub ticket: u64,
    /// Mode held.
    pub mode: AccessMode,
    /// Holding thread.
    pub thread: String,
    /// When the holder acquired the lock.
    pub acquired_at: Timestamp,
    /// Holder's stack at acquisition.
    pub trace: Option<StackSnapshot>,
}

/// A diagnostic-mode acquisition timed out.
#[derive(Clone, Debug)]
pub struct ContentionReport {
    /// Lock name.
    pub lock: String,
    /// Mode requested by the waiter.
    pub mode: AccessMode,
    /// Acquisition number requested by the waiter.
    pub ticket: u64,
    /// Timeouts so far for this acquisition, starting at 1.
    pub attempt: u32,
    /// Total time spent waiting.
    pub waited: Duration,
    /// Waiting thread.
    pub thread: String,
    /// When the timeout was observed.
    pub at: Timestamp,
    /// Waiter's stack.
    pub trace: StackSnapshot,
    /// Every acquisition live at the time of the report.
    pub holders: Vec<HolderSnapshot>,
}

/// A guard was released on a lock that did not issue it.
#[derive(Clone, Debug)]
pub struct MismatchReport {
    /// Lock the release was attempted on.
    pub lock: String,
    /// Lock that issued the guard.
    pub owner: String,
    /// Mode of the guard.
    pub mode: AccessMode,
    /// Releasing thread.
    pub thread: String,
    /// When the release was attempted.
    pub at: Timestamp,
    /// Releasing thread's stack.
    pub trace: StackSnapshot,
}

/// Out-of-band lock diagnostics.
#[derive(Clone, Debug)]
pub enum LockEvent {
    /// A timed attempt expired; the waiter keeps retrying.
    Contention(ContentionReport),
    /// Reports for this acquisition stop here; retries continue silently.
    ReportsSuppressed {
        /// Lock name.
        lock: String,
        /// Mode requested.
        mode: AccessMode,
        /// Acquisition number requested.
        ticket: u64,
        /// Reports already emitted.
        after: u32,
    },
    /// An acquisition succeeded after at least one timeout.
    Recovered {
        /// Lock name.
        lock: String,
        /// Mode acquired.
        mode: AccessMode,
        /// Acquisition number.
        ticket: u64,
        /// Total time spent waiting.
        waited: Duration,
        /// Timeouts before success.
        timeouts: u32,
    },
    /// A release did not match any acquisition of the lock.
    ReleaseMismatch(MismatchReport),
    /// Acquire/release trace, emitted only with `log_acquisitions`.
    Transition {
        /// Lock name.
        lock: String,
        /// Mode requested or held.
        mode: AccessMode,
        /// Acquisition number.
        ticket: u64,
        /// Step reached.
        phase: LockPhase,
        /// When the step was reached.
        at: Timestamp,
    },
}

impl LockEvent {
    /// Name of the lock the event concerns.
    #[must_use]
    pub fn lock_name(&self) -> &str {
        match self {
            Self::Contention(report) => &report.lock,
            Self::ReleaseMismatch(report) => &report.lock,
            Self::ReportsSuppressed { lock, .. }
            | Self::Recovered { lock, .. }
            | Self::Transition { lock, .. } => lock,
        }
    }
}

impl fmt::Display for LockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contention(report) => {
                writeln!(
                    f,
                    "{} WARNING [{}] unable to access {} #{} (attempt {}, waited {:?}) from {} at",
                    report.at,
                    report.lock,
                    report.mode,
                    report.ticket,
                    report.attempt,
                    report.waited,
                    report.thread
                )?;
                writeln!(f, "{}", report.trace)?;
                if report.holders.is_empty() {
                    return writeln!(f, "no live holder recorded");
                }
                for holder in &report.holders {
                    writeln!(
                        f,
                        "locked ({} #{}) at {} ms by {} (held {:?})",
                        holder.mode,
                        holder.ticket,
                        holder.acquired_at.as_millis(),
                        holder.thread,
                        report.at.duration_since(holder.acquired_at)
                    )?;
                    if let Some(trace) = &holder.trace {
                        writeln!(f, "{trace}")?;
                    }
                }
                Ok(())
            }
            Self::ReportsSuppressed { lock, mode, ticket, after } => write!(
                f,
                "[{lock}] {mode} #{ticket} still blocked; suppressing reports after {after}"
            ),
            Self::Recovered { lock, mode, ticket, waited, timeouts } => write!(
                f,
                "[{lock}] acquired {mode} #{ticket} after {timeouts} timeouts ({waited:?})"
            ),
            Self::ReleaseMismatch(report) => {
                writeln!(
                    f,
                    "{} unlock() failed on RWLock '{}': {} guard belongs to '{}' (thread {})",
                    report.at, report.lock, report.mode, report.owner, report.thread
                )?;
                writeln!(f, "{}", report.trace)
            }
            Self::Transition { lock, mode, ticket, phase, at } => {
                write!(f, "{at} [{lock}] {phase} {mode} #{ticket}")
            }
        }
    }
}

/// Sink for lock diagnostics.
///
/// Called from the blocked or releasing thread; implementations must not
/// block for long and must never acquire the lock being reported.
pub trait LockReporter: Send + Sync {
    /// Handles one event.
    fn report(&self, event: LockEvent);
}

/// Writes events as `tracing` records.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl LockReporter for TracingReporter {
    fn report(&self, event: LockEvent) {
        match &event {
            LockEvent::Contention(_) | LockEvent::ReportsSuppressed { .. } => {
                tracing::warn!("{}", event);
            }
            LockEvent::Recovered { .. } => tracing::info!("{}", event),
            LockEvent::ReleaseMismatch(_) => tracing::error!("{}", event),
            LockEvent::Transition { .. } => tracing::trace!("{}", event),
        }
    }
}

/// Forwards events over a crossbeam channel.
///
/// Never blocks the reporting thread: when a bounded channel is full or the
/// receiver is gone, the event is dropped and noted at `debug` level.
#[derive(Clone, Debug)]
pub struct ChannelReporter {
    sender: Sender<LockEvent>,
}

impl ChannelReporter {
    /// Wraps an existing sender.
    #[must_use]
    pub fn new(sender: Sender<LockEvent>) -> Self {
        Self { sender }
    }

    /// Creates a reporter and the receiving end of an unbounded channel.
    #[must_use]
    pub fn unbounded() -> (Self, Receiver<LockEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }

    /// Creates a reporter and the receiving end of a bounded channel.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, Receiver<LockEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl LockReporter for ChannelReporter {
    fn report(&self, event: LockEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::debug!("Lock diagnostics channel full, dropped event for [{}]", event.lock_name());
            }
            Err(TrySendError::Disconnected(event)) => {
                tracing::debug!("Lock diagnostics channel closed, dropped event for [{}]", event.lock_name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recovered(lock: &str) -> LockEvent {
        LockEvent::Recovered {
            lock: lock.into(),
            mode: AccessMode::Write,
            ticket: 3,
            waited: Duration::from_millis(40),
            timeouts: 2,
        }
    }

    #[test]
    fn test_channel_reporter_forwards() {
        let (reporter, events) = ChannelReporter::unbounded();
        reporter.report(recovered("zone"));

        let event = events.try_recv().unwrap();
        assert_eq!(event.lock_name(), "zone");
        assert!(event.to_string().contains("wlock #3 after 2 timeouts"));
    }

    #[test]
    fn test_channel_reporter_never_blocks_when_full() {
        let (reporter, events) = ChannelReporter::bounded(1);
        reporter.report(recovered("a"));
        reporter.report(recovered("b"));

        assert_eq!(events.len(), 1);
        assert_eq!(events.try_recv().unwrap().lock_name(), "a");

        drop(events);
        reporter.report(recovered("c"));
    }

    #[test]
    fn test_contention_display_lists_holders() {
        let event = LockEvent::Contention(ContentionReport {
            lock: "chat".into(),
            mode: AccessMode::Read,
            ticket: 9,
            attempt: 1,
            waited: Duration::from_millis(2000),
            thread: "worker-1".into(),
            at: Timestamp::now(),
            trace: StackSnapshot::capture(),
            holders: vec![HolderSnapshot {
                ticket: 8,
                mode: AccessMode::Write,
                thread: "worker-2".into(),
                acquired_at: Timestamp::now(),
                trace: None,
            }],
        });

        let text = event.to_string();
        assert!(text.contains("WARNING [chat] unable to access rlock #9"));
        assert!(text.contains("locked (wlock #8)"));
        assert!(text.contains("by worker-2"));
    }
}
