//! # TESSERA Core
//!
//! Safety primitives for objects shared between many threads:
//!
//! - **Deferred reclamation**: hazard pointers let readers dereference
//!   shared objects without a lock while writers replace them.
//! - **Traced locks**: reader/writer locks that report who is waiting and
//!   who is holding when an acquisition takes too long.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  protect()   ┌──────────────┐  retire()   ┌──────────────┐
//! │   Readers    │ ───────────▶ │  HazardCell  │ ◀────────── │   Writers    │
//! │ (no locking) │              └──────┬───────┘             │ (TracedLock) │
//! └──────┬───────┘                     │                     └──────────────┘
//!        │ publish                     ▼
//!        ▼                     ┌──────────────┐
//! ┌──────────────┐   scan()    │ HazardDomain │
//! │ Hazard slots │ ◀────────── │ retire list  │
//! └──────────────┘             └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{HazardCell, HazardDomain};
//!
//! let domain = HazardDomain::default();
//! let cell = HazardCell::new(&domain, String::from("v1"));
//! let handle = domain.register();
//!
//! if let Some(value) = handle.protect(&cell)? {
//!     println!("{}", *value);
//! }
//! cell.store(String::from("v2")); // "v1" is retired, freed once unprotected
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod reclaim;
pub mod sync;

pub use config::{LockConfig, LockMode, ReclaimConfig, TesseraConfig};
pub use diagnostics::{StackSnapshot, Timestamp};
pub use error::{CoreError, CoreResult};
pub use reclaim::{HazardCell, HazardDomain, HazardHandle, Protected, ReclaimStats};
pub use sync::{
    AccessMode, ChannelReporter, LockEvent, LockPhase, LockReporter, LockStats, TracedLock,
    TracedReadGuard, TracedRwLock, TracedWriteGuard, TracingReporter,
};
