//! # Core Error Types
//!
//! Errors surfaced to callers of the core primitives.
//!
//! Contention and reclamation progress are never errors here: they are
//! reported out-of-band. Only misuse the caller can act on, and config
//! loading, produce a value.

use thiserror::Error;

/// Errors that can occur in the core primitives.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configuration file is not valid TOML for the expected schema.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// A guard was released against a lock that did not issue it.
    #[error("release mismatch on lock '{lock}': guard belongs to '{owner}'")]
    ReleaseMismatch {
        /// Lock the release was attempted on.
        lock: String,
        /// Lock that actually issued the guard.
        owner: String,
    },

    /// Every hazard slot of the calling thread is already publishing.
    #[error("all {slots} hazard slots of this thread are in use")]
    SlotsExhausted {
        /// Number of slots per thread.
        slots: usize,
    },

    /// A raw publish or clear targeted a slot owned by a live guard.
    #[error("hazard slot {slot} is owned by a live guard")]
    SlotInUse {
        /// Slot index.
        slot: usize,
    },

    /// A cell was protected through a handle of a different hazard domain.
    #[error("hazard handle and cell belong to different domains")]
    DomainMismatch,
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::SlotsExhausted { slots: 2 };
        assert_eq!(err.to_string(), "all 2 hazard slots of this thread are in use");

        let err = CoreError::SlotInUse { slot: 1 };
        assert_eq!(err.to_string(), "hazard slot 1 is owned by a live guard");

        let err = CoreError::ReleaseMismatch {
            lock: "zone".into(),
            owner: "chat".into(),
        };
        assert!(err.to_string().contains("'zone'"));
        assert!(err.to_string().contains("'chat'"));
    }

    #[test]
    fn test_toml_error_converts() {
        let parse: Result<toml::Value, _> = toml::from_str("not = [valid");
        let err: CoreError = parse.unwrap_err().into();
        assert!(matches!(err, CoreError::ConfigParse(_)));
    }
}
