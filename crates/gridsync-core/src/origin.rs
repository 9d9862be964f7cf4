#![forbid(unsafe_code)]

//! Change-origin metadata.
//!
//! Every proposed layout change carries an [`Origin`]: where the change came
//! from, when, optionally which user gesture produced it, and optionally a
//! monotonic version for staleness checks. The engine keys its debouncing on
//! the origin (`operation_id` when present, otherwise the source tag) and
//! forwards only user-initiated sources to the persistence sink.

use serde::{Deserialize, Serialize};

/// Fixed vocabulary of change sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeSource {
    UserDrag,
    UserResize,
    UserRemove,
    DropAdd,
    ExternalSync,
}

impl ChangeSource {
    /// Kebab-case tag, matching the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ChangeSource::UserDrag => "user-drag",
            ChangeSource::UserResize => "user-resize",
            ChangeSource::UserRemove => "user-remove",
            ChangeSource::DropAdd => "drop-add",
            ChangeSource::ExternalSync => "external-sync",
        }
    }

    /// Whether changes from this source should be forwarded to persistence.
    #[must_use]
    pub const fn is_user_initiated(self) -> bool {
        matches!(
            self,
            ChangeSource::UserDrag
                | ChangeSource::UserResize
                | ChangeSource::UserRemove
                | ChangeSource::DropAdd
        )
    }
}

impl std::fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached to every proposed layout change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub source: ChangeSource,
    /// Milliseconds since the engine's epoch.
    pub timestamp_ms: u64,
    /// Correlates a burst of events to one user gesture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Monotonic version for staleness checks. Once observed, only higher
    /// versions are honored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl Origin {
    #[must_use]
    pub fn new(source: ChangeSource, timestamp_ms: u64) -> Self {
        Self {
            source,
            timestamp_ms,
            operation_id: None,
            version: None,
        }
    }

    #[must_use]
    pub fn with_operation(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Debounce grouping key: the operation id when present, else the source.
    #[must_use]
    pub fn debounce_key(&self) -> String {
        self.operation_id
            .clone()
            .unwrap_or_else(|| self.source.as_str().to_owned())
    }
}
