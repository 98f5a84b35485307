//! # Traced Synchronization
//!
//! Reader/writer locks that explain themselves when they stall.
//!
//! In [`LockMode::Direct`](crate::config::LockMode) a [`TracedRwLock`] is a
//! plain `parking_lot` lock plus an acquisition counter. In
//! [`LockMode::Diagnostic`](crate::config::LockMode) every wait is bounded,
//! and each expiry sends a [`LockEvent`] naming the waiter and the holders
//! to the lock's [`LockReporter`].

mod report;
mod traced_lock;

pub use report::{
    AccessMode, ChannelReporter, ContentionReport, HolderSnapshot, LockEvent, LockPhase,
    LockReporter, MismatchReport, TracingReporter,
};
pub use traced_lock::{
    Acquisition, LockStats, TracedLock, TracedReadGuard, TracedRwLock, TracedWriteGuard,
};
