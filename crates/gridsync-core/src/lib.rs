#![forbid(unsafe_code)]

//! Layout data model and snapshot codec for gridsync.
//!
//! This crate holds the pure, timer-free half of the layout synchronization
//! engine: the breakpoint vocabulary, positioned layout items, responsive
//! layout maps, change-origin metadata, and the content-hash / semantic
//! equality codec that the engine uses to deduplicate proposed updates.
//!
//! Everything here is plain data. The debouncing, state machine, and commit
//! pipeline live in `gridsync-engine`.

pub mod breakpoint;
pub mod item;
pub mod origin;
pub mod snapshot;

pub use breakpoint::{Breakpoint, BreakpointMap};
pub use item::{
    LayoutItem, NormalizeError, NormalizeOptions, RawLayoutItem, ResponsiveLayouts, normalize_raw,
};
pub use origin::{ChangeSource, Origin};
pub use snapshot::{semantically_equal, snapshot_hash};
