//! # Deferred Reclamation
//!
//! Hazard pointers for objects read without a lock.
//!
//! ## The Problem
//!
//! ```text
//! Thread 1 (reader):  p = cell.load()  ...........  (*p).name
//! Thread 2 (writer):        cell.store(new); free(p)
//!
//! Without reclamation: USE-AFTER-FREE
//! With a lock:         every read contends with every write
//! ```
//!
//! ## The Solution
//!
//! Readers publish `p` in a hazard slot before dereferencing it. Writers
//! retire `p` instead of freeing it. A scan destroys only retired objects
//! that no slot publishes.
//!
//! Each registered thread owns a small fixed number of slots
//! (`slots_per_thread`, default 2), enough for a reader that follows one
//! link while holding another.

mod cell;
mod domain;
mod hazard;
mod local;
mod retired;

pub use cell::HazardCell;
pub use domain::{HazardDomain, ReclaimStats};
pub use hazard::{HazardHandle, Protected};
pub use local::{clear_hazard, publish_hazard, retire, scan, with_local_handle};
