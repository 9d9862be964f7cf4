#![forbid(unsafe_code)]

//! Engine facade: gesture callbacks in, canonical layouts out.
//!
//! [`LayoutSyncEngine`] wires the controller, unified state, guarded commit
//! queue, and commit tracker behind the callback surface an external grid
//! library expects (`on_drag_start`/`on_drag_stop`, `on_resize_start`/
//! `on_resize_stop`, `on_layout_change`) plus the programmatic entry points
//! (external sync, reset, add, remove). The host pumps everything with a
//! single [`poll`](LayoutSyncEngine::poll).
//!
//! Data flow: gesture start opens an operation and moves the controller into
//! `dragging`/`resizing`; raw per-breakpoint arrays stream into the working
//! buffer during the gesture; gesture end schedules a debounced commit; the
//! commit normalizes, version-stamps, persists through the unified state,
//! and races the flush against a safety deadline; the controller returns to
//! `idle` and the operation and highlight are released.

use std::collections::BTreeMap;
use std::sync::Arc;

use web_time::Instant;

use gridsync_core::{
    Breakpoint, ChangeSource, LayoutItem, Origin, RawLayoutItem, ResponsiveLayouts, normalize_raw,
};

use crate::commit_queue::{CommitResolution, GuardedCommitQueue};
use crate::config::EngineConfig;
use crate::controller::{Controller, ControllerState, GestureKind};
use crate::error::ConfigError;
use crate::tracker::CommitTracker;
use crate::unified_state::{
    LayoutPersist, PersistError, PersistTicket, UnifiedLayoutState, UpdateOptions,
};

/// Read-only engine state for debug display.
#[cfg(feature = "debug-surface")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub controller_state: ControllerState,
    pub committed_version: u64,
    pub layout_hash: Option<u64>,
    pub has_pending_commit: bool,
}

/// The layout synchronization engine. See module docs.
pub struct LayoutSyncEngine {
    config: EngineConfig,
    epoch: Instant,
    controller: Controller,
    state: UnifiedLayoutState,
    commit_queue: GuardedCommitQueue,
    tracker: Arc<CommitTracker>,
    operation_counter: u64,
    current_operation: Option<String>,
    /// Last canonical snapshot forwarded to the controller, for change
    /// detection across polls.
    seen_canonical: Option<Arc<ResponsiveLayouts>>,
}

impl std::fmt::Debug for LayoutSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutSyncEngine")
            .field("controller", &self.controller.state())
            .field("state", &self.state)
            .field("commit_queue", &self.commit_queue)
            .finish()
    }
}

impl LayoutSyncEngine {
    /// Build an engine with its own tracker.
    pub fn new(config: EngineConfig, sink: Box<dyn LayoutPersist>) -> Result<Self, ConfigError> {
        let tracker = Arc::new(CommitTracker::new(config.pending_commit_guard));
        Self::with_tracker(config, sink, tracker)
    }

    /// Build an engine reporting into a shared tracker.
    pub fn with_tracker(
        config: EngineConfig,
        sink: Box<dyn LayoutPersist>,
        tracker: Arc<CommitTracker>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            state: UnifiedLayoutState::new(&config, sink),
            commit_queue: GuardedCommitQueue::new(&config),
            controller: Controller::new(),
            tracker,
            epoch: Instant::now(),
            config,
            operation_counter: 0,
            current_operation: None,
            seen_canonical: None,
        })
    }

    // -----------------------------------------------------------------------
    // Grid-library gesture callbacks
    // -----------------------------------------------------------------------

    /// A drag gesture began. Returns the opened operation id.
    pub fn on_drag_start(&mut self, now: Instant) -> Option<String> {
        self.begin_gesture(GestureKind::Drag, now)
    }

    /// A resize gesture began. Returns the opened operation id.
    pub fn on_resize_start(&mut self, now: Instant) -> Option<String> {
        self.begin_gesture(GestureKind::Resize, now)
    }

    /// Raw per-breakpoint arrays streamed in mid-gesture. Updates the live
    /// working buffer; outside a gesture the event is ignored (programmatic
    /// changes arrive through [`external_sync`](Self::external_sync)).
    pub fn on_layout_change(
        &mut self,
        raw_active: Option<&[RawLayoutItem]>,
        raw_all: Option<&BTreeMap<String, Vec<RawLayoutItem>>>,
        active_breakpoint: Option<&str>,
    ) {
        if !self.controller.is_gesturing() {
            tracing::trace!("layout change outside gesture ignored");
            return;
        }
        let mut raw = raw_all.cloned().unwrap_or_default();
        if let (Some(active), Some(bp)) = (raw_active, active_breakpoint) {
            raw.insert(bp.to_owned(), active.to_vec());
        }
        if raw.is_empty() {
            return;
        }
        let existing = self.state.layouts().cloned();
        match normalize_raw(&raw, existing.as_deref(), &self.config.normalize_options()) {
            Ok(snapshot) => self.controller.buffer_working(snapshot),
            Err(e) => tracing::debug!(error = %e, "mid-gesture layout change not normalizable"),
        }
    }

    /// A drag gesture ended; schedule the guarded commit.
    pub fn on_drag_stop(
        &mut self,
        raw_active: Option<Vec<RawLayoutItem>>,
        raw_all: Option<BTreeMap<String, Vec<RawLayoutItem>>>,
        active_breakpoint: Option<String>,
        active_item: Option<String>,
        now: Instant,
    ) {
        self.end_gesture(raw_active, raw_all, active_breakpoint, active_item, now);
    }

    /// A resize gesture ended; schedule the guarded commit.
    pub fn on_resize_stop(
        &mut self,
        raw_active: Option<Vec<RawLayoutItem>>,
        raw_all: Option<BTreeMap<String, Vec<RawLayoutItem>>>,
        active_breakpoint: Option<String>,
        active_item: Option<String>,
        now: Instant,
    ) {
        self.end_gesture(raw_active, raw_all, active_breakpoint, active_item, now);
    }

    /// Abort the current gesture without committing (Escape, focus loss).
    pub fn cancel_gesture(&mut self, now: Instant) {
        if self.controller.is_gesturing() {
            self.controller
                .transition(ControllerState::Idle, "gesture_cancel");
            self.close_operation(now);
        }
    }

    // -----------------------------------------------------------------------
    // Programmatic entry points
    // -----------------------------------------------------------------------

    /// A new snapshot arrived from outside (initial load, another client).
    /// Debounced like any other change; never forwarded to persistence.
    pub fn external_sync(&mut self, layouts: ResponsiveLayouts, now: Instant) {
        let origin = Origin::new(ChangeSource::ExternalSync, self.now_ms(now));
        self.state
            .update_layouts(layouts, origin, UpdateOptions::default(), now);
    }

    /// Wholesale replacement on page change. Flushes pending work, replaces
    /// the canonical snapshot, and clears the forwarded-hash cache.
    pub fn reset(&mut self, layouts: Option<ResponsiveLayouts>, _now: Instant) {
        self.state.reset_layouts(layouts.clone());
        self.seen_canonical = self.state.layouts().cloned();
        self.controller.sync_external(layouts.unwrap_or_default());
    }

    /// Drop a new item onto a breakpoint (`drop-add`).
    pub fn add_item(&mut self, item: LayoutItem, bp: Breakpoint, now: Instant) {
        let mut next = self
            .state
            .layouts()
            .map_or_else(ResponsiveLayouts::default, |l| (**l).clone());
        let mut items = next.get(bp).to_vec();
        items.push(item);
        next.set(bp, items);
        let origin = Origin::new(ChangeSource::DropAdd, self.now_ms(now));
        self.state
            .update_layouts(next, origin, UpdateOptions::default(), now);
    }

    /// Remove an item from every breakpoint (`user-remove`).
    pub fn remove_item(&mut self, id: &str, now: Instant) {
        let Some(current) = self.state.layouts() else {
            return;
        };
        let mut next = (**current).clone();
        if next.remove_item(id) == 0 {
            tracing::debug!(id, "remove for unknown item ignored");
            return;
        }
        let origin = Origin::new(ChangeSource::UserRemove, self.now_ms(now));
        self.state
            .update_layouts(next, origin, UpdateOptions::default(), now);
    }

    // -----------------------------------------------------------------------
    // Pump
    // -----------------------------------------------------------------------

    /// Run all due work. Call on the host's cadence;
    /// [`next_deadline`](Self::next_deadline) sizes the next sleep.
    pub fn poll(&mut self, now: Instant) -> Option<CommitResolution> {
        self.state.poll(now);
        let now_ms = self.now_ms(now);
        let resolution = self.commit_queue.poll(
            now,
            now_ms,
            &mut self.controller,
            &mut self.state,
            &self.tracker,
        );
        self.tracker.sweep(now);
        if resolution.is_some() {
            self.close_operation(now);
        }
        self.forward_canonical_changes();
        resolution
    }

    /// Force all pending debounced work to run immediately.
    pub fn flush(&mut self) {
        self.state.flush();
        self.forward_canonical_changes();
    }

    /// Earliest deadline any component is waiting on.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.state.next_deadline(), self.commit_queue.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    /// Settle a deferred persistence request.
    pub fn complete_persist(&mut self, ticket: PersistTicket, result: Result<(), PersistError>) {
        self.state.complete_persist(ticket, result);
    }

    /// Cancel all timers and waiters on teardown.
    pub fn destroy(&mut self) {
        self.state.destroy();
        self.commit_queue.destroy();
        self.tracker.cleanup();
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    /// The layouts the UI must render right now: the working buffer during a
    /// gesture, otherwise the canonical snapshot.
    #[must_use]
    pub fn display_layouts(&self) -> Option<&ResponsiveLayouts> {
        self.controller
            .display_buffer()
            .or_else(|| self.state.layouts().map(Arc::as_ref))
    }

    /// Current canonical snapshot (stable reference).
    #[must_use]
    pub fn layouts(&self) -> Option<&Arc<ResponsiveLayouts>> {
        self.state.layouts()
    }

    #[must_use]
    pub fn controller_state(&self) -> ControllerState {
        self.controller.state()
    }

    #[must_use]
    pub fn layout_hash(&self) -> Option<u64> {
        self.state.get_layout_hash()
    }

    #[must_use]
    pub fn compare_with_current(&self, other: &ResponsiveLayouts) -> bool {
        self.state.compare_with_current(other)
    }

    /// The shared commit tracker.
    #[must_use]
    pub fn tracker(&self) -> &Arc<CommitTracker> {
        &self.tracker
    }

    /// Route persistence failures and internal inconsistencies here.
    pub fn set_on_error(&mut self, f: impl FnMut(crate::error::SyncError) + 'static) {
        self.state.set_on_error(f);
    }

    /// Safe setter for the awaiting-commit flag (may register late).
    pub fn register_awaiting_setter(&mut self, f: impl FnMut(bool) + 'static) {
        self.commit_queue.register_awaiting_setter(f);
    }

    pub fn unregister_awaiting_setter(&mut self) {
        self.commit_queue.unregister_awaiting_setter();
    }

    /// Safe setter for the just-committed highlight id (may register late).
    pub fn register_highlight_setter(&mut self, f: impl FnMut(Option<String>) + 'static) {
        self.commit_queue.register_highlight_setter(f);
    }

    pub fn unregister_highlight_setter(&mut self) {
        self.commit_queue.unregister_highlight_setter();
    }

    /// Debug display surface.
    #[cfg(feature = "debug-surface")]
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            controller_state: self.controller.state(),
            committed_version: self.state.committed_version(),
            layout_hash: self.state.get_layout_hash(),
            has_pending_commit: self.commit_queue.has_scheduled_commit()
                || self.commit_queue.is_commit_in_flight(),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn now_ms(&self, now: Instant) -> u64 {
        u64::try_from(now.saturating_duration_since(self.epoch).as_millis()).unwrap_or(u64::MAX)
    }

    fn begin_gesture(&mut self, kind: GestureKind, now: Instant) -> Option<String> {
        if !self.controller.begin_gesture(kind) {
            return None;
        }
        self.operation_counter += 1;
        let id = format!("op-{}", self.operation_counter);
        self.state.start_operation(id.clone(), now);
        self.current_operation = Some(id.clone());
        Some(id)
    }

    fn end_gesture(
        &mut self,
        raw_active: Option<Vec<RawLayoutItem>>,
        raw_all: Option<BTreeMap<String, Vec<RawLayoutItem>>>,
        active_breakpoint: Option<String>,
        active_item: Option<String>,
        now: Instant,
    ) {
        if !self.controller.transition(ControllerState::Grace, "gesture_stop") {
            return;
        }
        self.commit_queue.schedule_commit(
            self.config.grace,
            raw_active,
            raw_all,
            active_breakpoint,
            active_item,
            now,
        );
    }

    fn close_operation(&mut self, now: Instant) {
        if let Some(id) = self.current_operation.take() {
            self.state.stop_operation(&id, now);
        }
    }

    /// When a new canonical snapshot is adopted (external sync settling, a
    /// commit landing), keep the controller's buffers in step. The controller
    /// defers the application while a gesture is active.
    fn forward_canonical_changes(&mut self) {
        let current = self.state.layouts();
        let changed = match (&self.seen_canonical, current) {
            (Some(seen), Some(cur)) => !Arc::ptr_eq(seen, cur),
            (None, Some(_)) => true,
            _ => false,
        };
        if changed {
            let cur = self.state.layouts().cloned();
            if let Some(cur) = cur {
                self.controller.sync_external((*cur).clone());
                self.seen_canonical = Some(cur);
            }
        }
    }
}
