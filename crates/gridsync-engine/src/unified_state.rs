#![forbid(unsafe_code)]

//! Canonical layout state built on the change queue.
//!
//! [`UnifiedLayoutState`] owns the single authoritative
//! [`ResponsiveLayouts`] snapshot. Proposed changes flow through
//! [`update_layouts`](UnifiedLayoutState::update_layouts), which rejects
//! semantic no-ops up front, then through per-key debouncing, then through
//! the event processing path that guards against stale versions, adopts the
//! new snapshot, and forwards user-originated changes to the persistence
//! sink at most once per distinct content hash.
//!
//! # Invariants
//!
//! 1. The exposed snapshot is a stable `Arc`: it is reassigned only when
//!    content actually changes, so consumers can use pointer equality to
//!    skip work.
//! 2. A change event carrying a version lower than the last committed
//!    version never alters canonical state and never reaches the sink.
//! 3. The sink is invoked at most once per distinct content hash for
//!    user-initiated sources, and never for two semantically identical
//!    snapshots back to back.
//!
//! # Failure Modes
//!
//! - Sink failures (immediate or via a settled ticket) are routed to the
//!   error callback and recorded for the commit path; the already-adopted
//!   canonical snapshot is *not* rolled back. The in-memory view stays the
//!   source of truth even when durable persistence failed.

use std::sync::Arc;

use web_time::{Duration, Instant};

use gridsync_core::{Origin, ResponsiveLayouts, semantically_equal, snapshot_hash};

use crate::change_queue::{ChangeEvent, ChangeQueue};
use crate::config::EngineConfig;
use crate::error::SyncError;

/// Identifies one in-flight persistence request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PersistTicket(u64);

/// A persistence failure reported by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistError {
    pub message: String,
}

impl PersistError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PersistError {}

/// How the sink answered a persistence request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The write settled synchronously.
    Completed,
    /// The write is in flight; the sink will settle the ticket later via
    /// [`UnifiedLayoutState::complete_persist`].
    Pending,
    /// The write failed synchronously.
    Failed(PersistError),
}

/// The caller-supplied persistence boundary.
///
/// Invoked at most once per unique content hash for user-originated changes.
/// The implementation owns durable storage and user-visible error handling.
pub trait LayoutPersist {
    fn persist(
        &mut self,
        layouts: &ResponsiveLayouts,
        origin: &Origin,
        ticket: PersistTicket,
    ) -> PersistOutcome;
}

/// Plain callbacks persist synchronously.
impl<F: FnMut(&ResponsiveLayouts, &Origin)> LayoutPersist for F {
    fn persist(
        &mut self,
        layouts: &ResponsiveLayouts,
        origin: &Origin,
        _ticket: PersistTicket,
    ) -> PersistOutcome {
        self(layouts, origin);
        PersistOutcome::Completed
    }
}

/// Whether all debounced emissions and in-flight persists have settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Settled,
    Pending,
}

/// Per-call options for [`UnifiedLayoutState::update_layouts`].
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Override the default debounce window for this change.
    pub debounce: Option<Duration>,
}

/// Owner of the canonical snapshot.
pub struct UnifiedLayoutState {
    queue: ChangeQueue,
    canonical: Option<Arc<ResponsiveLayouts>>,
    committed_version: u64,
    forwarded_hash: Option<u64>,
    sink: Box<dyn LayoutPersist>,
    on_error: Option<Box<dyn FnMut(SyncError)>>,
    outstanding: Vec<PersistTicket>,
    persist_failure: Option<PersistError>,
    ticket_counter: u64,
}

impl std::fmt::Debug for UnifiedLayoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedLayoutState")
            .field("has_canonical", &self.canonical.is_some())
            .field("committed_version", &self.committed_version)
            .field("forwarded_hash", &self.forwarded_hash)
            .field("outstanding", &self.outstanding.len())
            .finish()
    }
}

impl UnifiedLayoutState {
    #[must_use]
    pub fn new(config: &EngineConfig, sink: Box<dyn LayoutPersist>) -> Self {
        Self {
            queue: ChangeQueue::new(config.debounce, config.operation_linger),
            canonical: None,
            committed_version: 0,
            forwarded_hash: None,
            sink,
            on_error: None,
            outstanding: Vec::new(),
            persist_failure: None,
            ticket_counter: 0,
        }
    }

    /// Route persistence failures and internal inconsistencies here.
    pub fn set_on_error(&mut self, f: impl FnMut(SyncError) + 'static) {
        self.on_error = Some(Box::new(f));
    }

    /// Current canonical snapshot. The `Arc` is reassigned only when content
    /// actually changes.
    #[must_use]
    pub fn layouts(&self) -> Option<&Arc<ResponsiveLayouts>> {
        self.canonical.as_ref()
    }

    /// Version of the last adopted versioned change.
    #[must_use]
    pub fn committed_version(&self) -> u64 {
        self.committed_version
    }

    /// Content hash of the canonical snapshot, if one exists.
    #[must_use]
    pub fn get_layout_hash(&self) -> Option<u64> {
        self.canonical.as_deref().map(snapshot_hash)
    }

    /// Semantic comparison against the canonical snapshot.
    #[must_use]
    pub fn compare_with_current(&self, other: &ResponsiveLayouts) -> bool {
        self.canonical
            .as_deref()
            .is_some_and(|c| semantically_equal(c, other))
    }

    /// Propose a change. Semantic no-ops return immediately without
    /// enqueueing; everything else debounces per `origin.debounce_key()`.
    pub fn update_layouts(
        &mut self,
        next: ResponsiveLayouts,
        origin: Origin,
        opts: UpdateOptions,
        now: Instant,
    ) {
        if self.compare_with_current(&next) {
            tracing::debug!(source = %origin.source, "update identical to canonical, skipped");
            return;
        }
        self.queue.enqueue(next, origin, None, opts.debounce, now);
    }

    /// Unconditionally replace the canonical snapshot (page navigation).
    ///
    /// Pending debounced work is flushed first, then the snapshot is replaced
    /// wholesale and the forwarded-hash cache is cleared so the next user
    /// change is guaranteed to reach the sink.
    pub fn reset_layouts(&mut self, next: Option<ResponsiveLayouts>) {
        for ev in self.queue.flush() {
            self.process_event(ev);
        }
        self.canonical = next.map(Arc::new);
        self.forwarded_hash = None;
        tracing::debug!(has_layouts = self.canonical.is_some(), "canonical layouts reset");
    }

    /// Process debounced emissions whose window has elapsed.
    pub fn poll(&mut self, now: Instant) {
        for ev in self.queue.poll(now) {
            self.process_event(ev);
        }
    }

    /// Force all pending debounced emissions to run now.
    pub fn flush(&mut self) {
        for ev in self.queue.flush() {
            self.process_event(ev);
        }
    }

    /// Settled iff no debounced emission is pending and no persist ticket is
    /// outstanding.
    #[must_use]
    pub fn flush_state(&self) -> FlushState {
        if self.queue.has_pending(None) || !self.outstanding.is_empty() {
            FlushState::Pending
        } else {
            FlushState::Settled
        }
    }

    /// Take the most recent persistence failure, if any.
    #[must_use]
    pub fn take_persist_failure(&mut self) -> Option<PersistError> {
        self.persist_failure.take()
    }

    /// Settle an in-flight persistence ticket.
    pub fn complete_persist(&mut self, ticket: PersistTicket, result: Result<(), PersistError>) {
        let Some(idx) = self.outstanding.iter().position(|t| *t == ticket) else {
            tracing::debug!(?ticket, "persist completion for unknown ticket ignored");
            return;
        };
        self.outstanding.swap_remove(idx);
        if let Err(e) = result {
            tracing::error!(error = %e, "deferred persistence failed");
            self.persist_failure = Some(e.clone());
            self.report_error(SyncError::Persist(e));
        }
    }

    pub fn start_operation(&mut self, id: impl Into<String>, now: Instant) {
        self.queue.start_operation(id, now);
    }

    pub fn stop_operation(&mut self, id: &str, now: Instant) {
        self.queue.stop_operation(id, now);
    }

    #[must_use]
    pub fn is_operation_active(&self, id: &str, now: Instant) -> bool {
        self.queue.is_operation_active(id, now)
    }

    /// Earliest pending debounce deadline, for host sleep sizing.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    /// Cancel all pending work on teardown.
    pub fn destroy(&mut self) {
        self.queue.destroy();
        self.outstanding.clear();
    }

    pub(crate) fn report_error(&mut self, error: SyncError) {
        if let Some(f) = &mut self.on_error {
            f(error);
        }
    }

    fn process_event(&mut self, ev: ChangeEvent) {
        // Stale-update guard: honored versions only increase.
        if let Some(v) = ev.origin.version
            && v < self.committed_version
        {
            tracing::debug!(
                version = v,
                committed = self.committed_version,
                "stale change event dropped"
            );
            return;
        }

        if self.compare_with_current(&ev.layouts) {
            tracing::trace!(source = %ev.origin.source, "change event identical to canonical");
            return;
        }

        let adopted = Arc::new(ev.layouts);
        self.canonical = Some(Arc::clone(&adopted));
        if let Some(v) = ev.origin.version {
            self.committed_version = self.committed_version.max(v);
        }

        if !ev.origin.source.is_user_initiated() {
            return;
        }
        if self.forwarded_hash == Some(ev.hash) {
            tracing::debug!(hash = ev.hash, "hash already forwarded, persistence skipped");
            return;
        }
        // Idempotence boundary: record before invoking so a failing sink is
        // not retried with identical content.
        self.forwarded_hash = Some(ev.hash);
        self.ticket_counter += 1;
        let ticket = PersistTicket(self.ticket_counter);
        match self.sink.persist(&adopted, &ev.origin, ticket) {
            PersistOutcome::Completed => {}
            PersistOutcome::Pending => self.outstanding.push(ticket),
            PersistOutcome::Failed(e) => {
                tracing::error!(error = %e, "persistence sink failed");
                self.persist_failure = Some(e.clone());
                self.report_error(SyncError::Persist(e));
            }
        }
    }
}
