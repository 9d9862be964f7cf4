#![forbid(unsafe_code)]

//! Debounced, versioned layout synchronization for an interactive grid editor.
//!
//! The engine turns a rapid, noisy stream of gesture-driven layout mutations
//! (drag, resize, add, remove, external reset) into a single, versioned,
//! eventually-persisted canonical layout, without ever letting the displayed
//! layout diverge from what the user is manipulating.
//!
//! # Execution model
//!
//! The engine is time-explicit and host-pumped: every debounce and timeout is
//! a stored deadline, and the host calls [`LayoutSyncEngine::poll`] with the
//! current instant on its own cadence. All due work runs synchronously inside
//! that call. Nothing blocks and nothing can wait forever — every deadline
//! has an upper bound.
//!
//! # Components
//!
//! - [`change_queue`] — per-key debounced dedup of proposed changes.
//! - [`unified_state`] — canonical snapshot owner; stale-version guard and
//!   at-most-once-per-hash persistence forwarding.
//! - [`controller`] — explicit gesture state machine deciding which buffer
//!   the UI displays and when a commit may run.
//! - [`commit_queue`] — guarded debounced commit with a bounded flush wait.
//! - [`tracker`] — records committed versions/hashes and lets callers await
//!   a specific pending commit.
//! - [`mailbox`] — single-slot delivery to possibly-late subscribers.
//! - [`engine`] — facade wiring the pieces behind grid-library gesture
//!   callbacks.

pub mod change_queue;
pub mod commit_queue;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod mailbox;
pub mod tracker;
pub mod unified_state;

pub use change_queue::{ChangeEvent, ChangeQueue};
pub use commit_queue::{CommitResolution, GuardedCommitQueue};
pub use config::EngineConfig;
pub use controller::{Controller, ControllerState, GestureKind};
pub use engine::LayoutSyncEngine;
pub use error::{ConfigError, SyncError};
pub use mailbox::Mailbox;
pub use tracker::{CommitMetadata, CommitTracker, CommitWaiter};
pub use unified_state::{
    FlushState, LayoutPersist, PersistError, PersistOutcome, PersistTicket, UnifiedLayoutState,
    UpdateOptions,
};
