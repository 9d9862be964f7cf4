#![forbid(unsafe_code)]

//! Engine error types.
//!
//! Most "failures" in this engine are policy rejections (stale updates,
//! invalid transitions) that are logged and dropped rather than surfaced as
//! errors. The types here cover the conditions that callers genuinely need
//! to observe: configuration mistakes, commits with no usable input, and
//! persistence failures routed through the error callback.

use gridsync_core::NormalizeError;

use crate::unified_state::PersistError;

/// Invalid [`EngineConfig`](crate::EngineConfig) values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The user-commit debounce ceiling must be non-zero.
    ZeroCommitDebounceCap,
    /// The plugin delimiter must be non-empty.
    EmptyPluginDelimiter,
    /// The pending-commit guard must be non-zero.
    ZeroPendingGuard,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroCommitDebounceCap => {
                write!(f, "user commit debounce cap must be greater than zero")
            }
            Self::EmptyPluginDelimiter => write!(f, "plugin delimiter must be non-empty"),
            Self::ZeroPendingGuard => {
                write!(f, "pending commit guard timeout must be greater than zero")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failures routed to the caller's error callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A commit fired with neither raw gesture data nor a buffered working
    /// snapshot available.
    CommitInputUnavailable,
    /// Raw gesture input could not be normalized into canonical items.
    Normalize(NormalizeError),
    /// The persistence sink reported a failure.
    Persist(PersistError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommitInputUnavailable => {
                write!(f, "commit attempted with no layout input available")
            }
            Self::Normalize(e) => write!(f, "raw layout normalization failed: {e}"),
            Self::Persist(e) => write!(f, "persistence failed: {e}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CommitInputUnavailable => None,
            Self::Normalize(e) => Some(e),
            Self::Persist(e) => Some(e),
        }
    }
}

impl From<NormalizeError> for SyncError {
    fn from(e: NormalizeError) -> Self {
        Self::Normalize(e)
    }
}

impl From<PersistError> for SyncError {
    fn from(e: PersistError) -> Self {
        Self::Persist(e)
    }
}
