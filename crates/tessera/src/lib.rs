//! # TESSERA
//!
//! A directory of shared objects built on [`tessera_core`], and a probe
//! that exercises it under concurrent load.
//!
//! ## Modules
//!
//! - `directory`: named objects with lock-free reads and traced writes
//! - `probe`: timed reader/writer workload with contention capture

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod directory;
pub mod probe;

// Re-export the core crate
pub use tessera_core as core;

pub use directory::ObjectDirectory;
pub use probe::{run_probe, ProbeConfig, ProbeReport, Record};
