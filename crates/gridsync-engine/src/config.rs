#![forbid(unsafe_code)]

//! Engine timing and normalization configuration.
//!
//! The original constants were tuned empirically against real editor
//! sessions; they are defaults here, not invariants. Every consumer reads
//! them from the config rather than hard-coding.

use web_time::Duration;

use gridsync_core::{BreakpointMap, NormalizeOptions};

use crate::error::ConfigError;

/// Tunable windows and tables for the synchronization engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default debounce for proposed changes (default: 100ms).
    pub debounce: Duration,
    /// Grace window between gesture end and commit (default: 150ms).
    pub grace: Duration,
    /// Ceiling on the debounce applied to user-sourced commits, so
    /// persistence is not perceptibly delayed (default: 20ms).
    pub user_commit_debounce_cap: Duration,
    /// How long the "just committed" highlight stays on (default: 400ms).
    pub highlight: Duration,
    /// Safety timeout for pending-commit waiters (default: 5s).
    pub pending_commit_guard: Duration,
    /// How long a closed operation lingers so trailing grid-library events
    /// are still attributable to it (default: 300ms).
    pub operation_linger: Duration,
    /// Grid-library breakpoint name translation.
    pub breakpoint_map: BreakpointMap,
    /// Delimiter for the legacy id-prefix plugin fallback (default: `"_"`).
    pub plugin_delimiter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            grace: Duration::from_millis(150),
            user_commit_debounce_cap: Duration::from_millis(20),
            highlight: Duration::from_millis(400),
            pending_commit_guard: Duration::from_secs(5),
            operation_linger: Duration::from_millis(300),
            breakpoint_map: BreakpointMap::default(),
            plugin_delimiter: "_".to_owned(),
        }
    }
}

impl EngineConfig {
    /// Upper bound on the post-commit flush wait: `max(2 × grace, 600ms)`.
    #[must_use]
    pub fn flush_window(&self) -> Duration {
        (self.grace * 2).max(Duration::from_millis(600))
    }

    /// Normalization options derived from this config.
    #[must_use]
    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            breakpoint_map: self.breakpoint_map.clone(),
            plugin_delimiter: self.plugin_delimiter.clone(),
        }
    }

    /// Reject configurations that would break engine invariants.
    ///
    /// A zero grace window is legal (commit immediately on gesture end);
    /// a zero commit debounce cap or pending guard is not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_commit_debounce_cap.is_zero() {
            return Err(ConfigError::ZeroCommitDebounceCap);
        }
        if self.plugin_delimiter.is_empty() {
            return Err(ConfigError::EmptyPluginDelimiter);
        }
        if self.pending_commit_guard.is_zero() {
            return Err(ConfigError::ZeroPendingGuard);
        }
        Ok(())
    }
}
