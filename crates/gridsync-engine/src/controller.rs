#![forbid(unsafe_code)]

//! Gesture controller state machine.
//!
//! A small explicit state machine decides, at any instant, whether the UI
//! renders the live working buffer (during an active gesture) or the
//! canonical snapshot, and gates when a commit may be attempted:
//!
//! ```text
//! idle → {dragging, resizing} → grace → commit → idle
//!              └──────────────→ idle    └─(grace → idle on abort)
//! ```
//!
//! Transition checking is a pure function ([`transition_allowed`]) over a
//! fixed table; the struct around it is a thin stateful shell. Rejected
//! transitions leave the state unchanged and log a warning — rapid UI
//! interaction reaches them routinely, so they must never panic.
//!
//! # Invariants
//!
//! 1. Transitions never skip states; any pair not in the table is rejected.
//! 2. While state ∈ {dragging, resizing, grace} the display buffer is the
//!    working buffer; otherwise it is the canonical mirror.
//! 3. Every transition into `idle` resynchronizes the working buffer and the
//!    canonical mirror, applying any external sync that was deferred while a
//!    gesture was active.

use gridsync_core::ResponsiveLayouts;

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    #[default]
    Idle,
    Dragging,
    Resizing,
    Grace,
    Commit,
}

impl ControllerState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::Dragging => "dragging",
            ControllerState::Resizing => "resizing",
            ControllerState::Grace => "grace",
            ControllerState::Commit => "commit",
        }
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which gesture opened the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    Drag,
    Resize,
}

/// The allowed-transition table, as a pure predicate.
#[must_use]
pub const fn transition_allowed(from: ControllerState, to: ControllerState) -> bool {
    use ControllerState::*;
    matches!(
        (from, to),
        (Idle, Dragging)
            | (Idle, Resizing)
            | (Dragging, Grace)
            | (Dragging, Idle)
            | (Resizing, Grace)
            | (Resizing, Idle)
            | (Grace, Commit)
            | (Grace, Idle)
            | (Commit, Idle)
    )
}

/// Stateful shell around [`transition_allowed`], owning the working buffer
/// and the canonical mirror.
#[derive(Debug, Default)]
pub struct Controller {
    state: ControllerState,
    last_gesture: Option<GestureKind>,
    /// Live buffer shown during a gesture.
    working: Option<ResponsiveLayouts>,
    /// Private mirror of the canonical snapshot.
    mirror: Option<ResponsiveLayouts>,
    /// External sync that arrived mid-gesture, applied on return to idle.
    deferred_sync: Option<ResponsiveLayouts>,
    /// Version tag of the in-flight commit, if any.
    commit_version: Option<u64>,
}

impl Controller {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    #[must_use]
    pub fn last_gesture(&self) -> Option<GestureKind> {
        self.last_gesture
    }

    #[must_use]
    pub fn commit_version(&self) -> Option<u64> {
        self.commit_version
    }

    /// Whether a gesture (or its grace window) is active.
    #[must_use]
    pub fn is_gesturing(&self) -> bool {
        matches!(
            self.state,
            ControllerState::Dragging | ControllerState::Resizing | ControllerState::Grace
        )
    }

    /// Request a transition. Returns whether it was applied.
    pub fn transition(&mut self, to: ControllerState, reason: &str) -> bool {
        if !transition_allowed(self.state, to) {
            tracing::warn!(
                from = %self.state,
                to = %to,
                reason,
                "controller transition rejected"
            );
            return false;
        }
        tracing::trace!(from = %self.state, to = %to, reason, "controller transition");
        let from = self.state;
        self.state = to;
        if to == ControllerState::Idle && from != ControllerState::Idle {
            self.resync_on_idle();
        }
        true
    }

    /// Open a gesture cycle. Only valid from `idle`.
    pub fn begin_gesture(&mut self, kind: GestureKind) -> bool {
        let to = match kind {
            GestureKind::Drag => ControllerState::Dragging,
            GestureKind::Resize => ControllerState::Resizing,
        };
        if self.transition(to, "gesture_start") {
            self.last_gesture = Some(kind);
            true
        } else {
            false
        }
    }

    /// Tag the in-flight commit and enter `commit`. Only valid from `grace`.
    pub fn begin_commit(&mut self, version: u64) -> bool {
        if self.transition(ControllerState::Commit, "commit_start") {
            self.commit_version = Some(version);
            true
        } else {
            false
        }
    }

    /// The buffer the UI must render right now.
    #[must_use]
    pub fn display_buffer(&self) -> Option<&ResponsiveLayouts> {
        if self.is_gesturing() {
            self.working.as_ref()
        } else {
            self.mirror.as_ref()
        }
    }

    /// Latest raw working snapshot buffered during a gesture.
    #[must_use]
    pub fn working(&self) -> Option<&ResponsiveLayouts> {
        self.working.as_ref()
    }

    #[must_use]
    pub fn mirror(&self) -> Option<&ResponsiveLayouts> {
        self.mirror.as_ref()
    }

    /// Store the live gesture buffer.
    pub fn buffer_working(&mut self, snapshot: ResponsiveLayouts) {
        self.working = Some(snapshot);
    }

    /// Optimistically update the canonical mirror (commit path).
    pub fn set_mirror(&mut self, snapshot: ResponsiveLayouts) {
        self.mirror = Some(snapshot);
    }

    /// A new canonical snapshot arrived from outside (initial load, page
    /// change). Applied immediately when idle; otherwise buffered so an
    /// active gesture is not visually yanked, and applied on return to idle.
    pub fn sync_external(&mut self, snapshot: ResponsiveLayouts) {
        if self.state == ControllerState::Idle {
            self.working = Some(snapshot.clone());
            self.mirror = Some(snapshot);
        } else {
            tracing::debug!(state = %self.state, "external sync deferred until idle");
            self.deferred_sync = Some(snapshot);
        }
    }

    /// Whether an external sync is waiting for idle.
    #[must_use]
    pub fn has_deferred_sync(&self) -> bool {
        self.deferred_sync.is_some()
    }

    fn resync_on_idle(&mut self) {
        self.commit_version = None;
        if let Some(snapshot) = self.deferred_sync.take() {
            self.working = Some(snapshot.clone());
            self.mirror = Some(snapshot);
        } else {
            self.working = self.mirror.clone();
        }
    }
}
