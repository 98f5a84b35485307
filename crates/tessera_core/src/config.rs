//! # Runtime Configuration
//!
//! Explicit configuration objects for the lock and reclamation primitives.
//! Loaded once at startup from TOML, or built in code.
//!
//! ```toml
//! [lock]
//! mode = "diagnostic"
//! timeout_ms = 2000
//! max_timeout_ms = 30000
//! max_reports = 8
//!
//! [reclaim]
//! retire_threshold = 100
//! slots_per_thread = 2
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// DEFAULTS
// =============================================================================

/// Retire list length above which a retirement triggers a scan.
pub const DEFAULT_RETIRE_THRESHOLD: usize = 100;

/// Hazard slots owned by each registered thread.
pub const DEFAULT_SLOTS_PER_THREAD: usize = 2;

/// Upper bound on hazard slots per thread.
pub const MAX_SLOTS_PER_THREAD: usize = 8;

/// First timed wait of a diagnostic-mode acquisition.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2000;

/// Shortest timed wait a traced lock will use.
pub const MIN_LOCK_TIMEOUT_MS: u64 = 1;

/// Ceiling for the exponential backoff between diagnostic reports.
pub const DEFAULT_MAX_TIMEOUT_MS: u64 = 30_000;

/// Contention reports emitted per acquisition before going quiet.
pub const DEFAULT_MAX_REPORTS: u32 = 8;

/// How a traced lock acquires its native primitive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Block on the native lock with no timeout and no stack capture.
    #[default]
    Direct,
    /// Timed attempts that report contention and keep retrying.
    Diagnostic,
}

/// Configuration for a traced lock.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Acquisition mode.
    pub mode: LockMode,
    /// First timed wait (ms).
    pub timeout_ms: u64,
    /// Longest timed wait after backoff (ms).
    pub max_timeout_ms: u64,
    /// Reports per acquisition before suppression.
    pub max_reports: u32,
    /// Emit a trace record for every acquire and release.
    pub log_acquisitions: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            mode: LockMode::Direct,
            timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            max_timeout_ms: DEFAULT_MAX_TIMEOUT_MS,
            max_reports: DEFAULT_MAX_REPORTS,
            log_acquisitions: false,
        }
    }
}

impl LockConfig {
    /// Low-overhead configuration: plain blocking acquisition.
    #[must_use]
    pub fn direct() -> Self {
        Self::default()
    }

    /// Timed acquisition with contention reports.
    #[must_use]
    pub fn diagnostic() -> Self {
        Self {
            mode: LockMode::Diagnostic,
            ..Self::default()
        }
    }

    /// Sets the first timed wait.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        if self.max_timeout_ms < timeout_ms {
            self.max_timeout_ms = timeout_ms;
        }
        self
    }

    /// Sets the backoff ceiling.
    #[must_use]
    pub const fn with_max_timeout_ms(mut self, max_timeout_ms: u64) -> Self {
        self.max_timeout_ms = max_timeout_ms;
        self
    }

    /// Sets the number of reports before suppression.
    #[must_use]
    pub const fn with_max_reports(mut self, max_reports: u32) -> Self {
        self.max_reports = max_reports;
        self
    }

    /// First timed wait as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff ceiling as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if the timeout is zero or the ceiling
    /// is below the first timeout.
    pub fn validate(&self) -> CoreResult<()> {
        if self.timeout_ms == 0 {
            return Err(CoreError::Config("lock.timeout_ms must be greater than zero".into()));
        }
        if self.max_timeout_ms < self.timeout_ms {
            return Err(CoreError::Config(format!(
                "lock.max_timeout_ms ({}) is below lock.timeout_ms ({})",
                self.max_timeout_ms, self.timeout_ms
            )));
        }
        Ok(())
    }

    /// Returns a copy with the timeout raised to [`MIN_LOCK_TIMEOUT_MS`] and
    /// the ceiling raised to the timeout.
    #[must_use]
    pub const fn normalized(mut self) -> Self {
        if self.timeout_ms < MIN_LOCK_TIMEOUT_MS {
            self.timeout_ms = MIN_LOCK_TIMEOUT_MS;
        }
        if self.max_timeout_ms < self.timeout_ms {
            self.max_timeout_ms = self.timeout_ms;
        }
        self
    }
}

/// Configuration for a hazard domain.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReclaimConfig {
    /// Retire list length that triggers a scan once exceeded.
    pub retire_threshold: usize,
    /// Hazard slots per registered thread.
    pub slots_per_thread: usize,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            retire_threshold: DEFAULT_RETIRE_THRESHOLD,
            slots_per_thread: DEFAULT_SLOTS_PER_THREAD,
        }
    }
}

impl ReclaimConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if `slots_per_thread` is outside
    /// `1..=MAX_SLOTS_PER_THREAD`.
    pub fn validate(&self) -> CoreResult<()> {
        if self.slots_per_thread == 0 || self.slots_per_thread > MAX_SLOTS_PER_THREAD {
            return Err(CoreError::Config(format!(
                "reclaim.slots_per_thread must be in 1..={MAX_SLOTS_PER_THREAD}, got {}",
                self.slots_per_thread
            )));
        }
        Ok(())
    }
}

/// Top-level configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    /// Lock settings.
    pub lock: LockConfig,
    /// Reclamation settings.
    pub reclaim: ReclaimConfig,
}

impl TesseraConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse or a value is out of range.
    pub fn from_toml_str(source: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Validates both sections.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range value found.
    pub fn validate(&self) -> CoreResult<()> {
        self.lock.validate()?;
        self.reclaim.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TesseraConfig::default();
        assert_eq!(config.lock.mode, LockMode::Direct);
        assert_eq!(config.lock.timeout_ms, 2000);
        assert_eq!(config.reclaim.retire_threshold, 100);
        assert_eq!(config.reclaim.slots_per_thread, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_document() {
        let config = TesseraConfig::from_toml_str(
            r#"
            [lock]
            mode = "diagnostic"
            timeout_ms = 250

            [reclaim]
            slots_per_thread = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.lock.mode, LockMode::Diagnostic);
        assert_eq!(config.lock.timeout_ms, 250);
        assert_eq!(config.lock.max_timeout_ms, DEFAULT_MAX_TIMEOUT_MS);
        assert_eq!(config.reclaim.slots_per_thread, 4);
        assert_eq!(config.reclaim.retire_threshold, DEFAULT_RETIRE_THRESHOLD);
    }

    #[test]
    fn test_rejects_unknown_mode() {
        let result = TesseraConfig::from_toml_str("[lock]\nmode = \"spin\"\n");
        assert!(matches!(result, Err(CoreError::ConfigParse(_))));
    }

    #[test]
    fn test_rejects_out_of_range() {
        let result = TesseraConfig::from_toml_str("[reclaim]\nslots_per_thread = 0\n");
        assert!(matches!(result, Err(CoreError::Config(_))));

        let result = TesseraConfig::from_toml_str("[lock]\ntimeout_ms = 500\nmax_timeout_ms = 100\n");
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_builder_keeps_ceiling_consistent() {
        let config = LockConfig::diagnostic()
            .with_max_timeout_ms(10)
            .with_timeout_ms(50);
        assert_eq!(config.max_timeout_ms, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_normalized_clamps_zero_timeout() {
        let config = LockConfig::diagnostic().with_timeout_ms(0);
        assert!(config.validate().is_err());

        let config = config.normalized();
        assert_eq!(config.timeout_ms, MIN_LOCK_TIMEOUT_MS);
        assert!(config.max_timeout_ms >= MIN_LOCK_TIMEOUT_MS);
        assert!(config.validate().is_ok());

        let config = LockConfig::diagnostic().with_max_timeout_ms(0).normalized();
        assert_eq!(config.max_timeout_ms, config.timeout_ms);
    }
}
