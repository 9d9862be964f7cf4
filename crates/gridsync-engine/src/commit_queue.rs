#![forbid(unsafe_code)]

//! Guarded, debounced commit of the working buffer into canonical state.
//!
//! [`GuardedCommitQueue`] owns a single commit timer (each
//! [`schedule_commit`](GuardedCommitQueue::schedule_commit) cancels and
//! restarts it), the commit version counter, and the two pieces of UI-facing
//! state that asynchronous continuations may need to set after their owning
//! view has unmounted: the awaiting-commit flag and the just-committed
//! highlight. Both go through a [`Mailbox`] so a late-registering setter
//! still receives the latest value instead of the write being dropped or
//! landing on a stale instance.
//!
//! The commit procedure normalizes raw grid-library input, stamps the result
//! with a monotonic version, pushes it through the unified state with a
//! tightly clamped debounce, and then waits — bounded — for the flush to
//! settle. Whichever comes first wins: settlement (`commit_complete`), the
//! safety deadline (`flush_timeout`, a warning — the write may still land),
//! or a persistence failure (`flush_error`). In every case the UI returns to
//! idle and the tracker records the commit so pending waiters resolve.
//!
//! # Invariants
//!
//! 1. At most one scheduled commit and at most one in-flight commit exist;
//!    the controller state machine forbids opening a second gesture cycle
//!    before the first resolves.
//! 2. The awaiting flag always returns to `false` within the flush window.
//! 3. A failed commit (no usable input) leaves canonical state untouched.

use std::collections::BTreeMap;

use web_time::{Duration, Instant};

use gridsync_core::{
    ChangeSource, Origin, RawLayoutItem, ResponsiveLayouts, normalize_raw, snapshot_hash,
};

use crate::config::EngineConfig;
use crate::controller::{Controller, ControllerState, GestureKind};
use crate::error::SyncError;
use crate::mailbox::Mailbox;
use crate::tracker::{CommitMetadata, CommitTracker};
use crate::unified_state::{FlushState, UnifiedLayoutState, UpdateOptions};

/// How an in-flight commit settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResolution {
    CommitComplete,
    FlushTimeout,
    FlushError,
}

impl CommitResolution {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CommitResolution::CommitComplete => "commit_complete",
            CommitResolution::FlushTimeout => "flush_timeout",
            CommitResolution::FlushError => "flush_error",
        }
    }
}

#[derive(Debug)]
struct PendingCommit {
    fire_at: Instant,
    raw_active: Option<Vec<RawLayoutItem>>,
    raw_all: Option<BTreeMap<String, Vec<RawLayoutItem>>>,
    active_breakpoint: Option<String>,
    active_item: Option<String>,
}

#[derive(Debug)]
struct InFlightCommit {
    deadline: Instant,
    version: u64,
    hash: u64,
}

/// Debounced commit scheduler with bounded flush wait. See module docs.
pub struct GuardedCommitQueue {
    config: EngineConfig,
    version_counter: u64,
    pending: Option<PendingCommit>,
    inflight: Option<InFlightCommit>,
    awaiting: Mailbox<bool>,
    highlight: Mailbox<Option<String>>,
    highlight_clear_at: Option<Instant>,
}

impl std::fmt::Debug for GuardedCommitQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedCommitQueue")
            .field("version_counter", &self.version_counter)
            .field("pending", &self.pending.is_some())
            .field("inflight", &self.inflight.is_some())
            .finish()
    }
}

impl GuardedCommitQueue {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
            version_counter: 0,
            pending: None,
            inflight: None,
            awaiting: Mailbox::new(),
            highlight: Mailbox::new(),
            highlight_clear_at: None,
        }
    }

    /// Schedule a debounced commit. A later call before the timer fires
    /// replaces the earlier one entirely (single-timer debounce).
    pub fn schedule_commit(
        &mut self,
        delay: Duration,
        raw_active: Option<Vec<RawLayoutItem>>,
        raw_all: Option<BTreeMap<String, Vec<RawLayoutItem>>>,
        active_breakpoint: Option<String>,
        active_item: Option<String>,
        now: Instant,
    ) {
        if self.pending.is_some() {
            tracing::debug!("pending commit replaced by newer schedule");
        }
        self.pending = Some(PendingCommit {
            fire_at: now + delay,
            raw_active,
            raw_all,
            active_breakpoint,
            active_item,
        });
    }

    /// Safe setter registration for the awaiting-commit flag. A value set
    /// before registration is delivered immediately.
    pub fn register_awaiting_setter(&mut self, f: impl FnMut(bool) + 'static) {
        self.awaiting.subscribe(f);
    }

    pub fn unregister_awaiting_setter(&mut self) {
        self.awaiting.unsubscribe();
    }

    /// Safe setter registration for the just-committed highlight id.
    pub fn register_highlight_setter(&mut self, f: impl FnMut(Option<String>) + 'static) {
        self.highlight.subscribe(f);
    }

    pub fn unregister_highlight_setter(&mut self) {
        self.highlight.unsubscribe();
    }

    #[must_use]
    pub fn has_scheduled_commit(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn is_commit_in_flight(&self) -> bool {
        self.inflight.is_some()
    }

    /// Earliest deadline this queue is waiting on, for host sleep sizing.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.pending.as_ref().map(|p| p.fire_at),
            self.inflight.as_ref().map(|i| i.deadline),
            self.highlight_clear_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Cancel scheduled and in-flight bookkeeping on teardown.
    pub fn destroy(&mut self) {
        self.pending = None;
        self.inflight = None;
        self.highlight_clear_at = None;
    }

    /// Run due work: fire the commit timer, clear the highlight, and check
    /// the in-flight commit against settlement and its safety deadline.
    pub fn poll(
        &mut self,
        now: Instant,
        now_ms: u64,
        controller: &mut Controller,
        state: &mut UnifiedLayoutState,
        tracker: &CommitTracker,
    ) -> Option<CommitResolution> {
        if let Some(clear_at) = self.highlight_clear_at
            && clear_at <= now
        {
            self.highlight_clear_at = None;
            self.highlight.set(None);
        }

        if let Some(pending) = self.pending.take_if(|p| p.fire_at <= now) {
            self.fire(pending, now, now_ms, controller, state);
        }

        let inflight = self.inflight.as_ref()?;
        let failure = state.take_persist_failure();
        let resolution = if failure.is_some() {
            Some(CommitResolution::FlushError)
        } else if state.flush_state() == FlushState::Settled {
            Some(CommitResolution::CommitComplete)
        } else if inflight.deadline <= now {
            Some(CommitResolution::FlushTimeout)
        } else {
            None
        };

        let resolution = resolution?;
        let inflight = self.inflight.take()?;
        match resolution {
            CommitResolution::CommitComplete => {
                tracing::debug!(version = inflight.version, "commit flush settled");
            }
            CommitResolution::FlushTimeout => {
                // The write may still complete in the background.
                tracing::warn!(version = inflight.version, "commit flush timed out");
            }
            CommitResolution::FlushError => {
                tracing::error!(version = inflight.version, "commit flush failed");
            }
        }
        self.awaiting.set(false);
        controller.transition(ControllerState::Idle, resolution.as_str());
        tracker.record_commit(CommitMetadata {
            version: inflight.version,
            hash: inflight.hash,
            timestamp_ms: now_ms,
        });
        Some(resolution)
    }

    fn fire(
        &mut self,
        pending: PendingCommit,
        now: Instant,
        now_ms: u64,
        controller: &mut Controller,
        state: &mut UnifiedLayoutState,
    ) {
        // Normalize: explicit active-breakpoint array wins over the maybe-stale
        // full-breakpoints object; buffered working snapshot is the fallback.
        let snapshot = match self.assemble_snapshot(&pending, controller, state) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(error = %e, "commit aborted");
                state.report_error(e);
                controller.transition(ControllerState::Idle, "commit_input_missing");
                return;
            }
        };

        let hash = snapshot_hash(&snapshot);
        self.version_counter += 1;
        let version = self.version_counter;

        if let Some(item) = pending.active_item {
            self.highlight.set(Some(item));
            self.highlight_clear_at = Some(now + self.config.highlight);
        }

        if !controller.begin_commit(version) {
            // Gesture cycle was torn down before the timer fired.
            self.version_counter -= 1;
            return;
        }

        let source = match controller.last_gesture() {
            Some(GestureKind::Resize) => ChangeSource::UserResize,
            _ => ChangeSource::UserDrag,
        };
        let origin = Origin::new(source, now_ms).with_version(version);
        // Clamped so user-sourced persistence is not perceptibly delayed.
        let debounce = self.config.debounce.min(self.config.user_commit_debounce_cap);
        state.update_layouts(
            snapshot.clone(),
            origin,
            UpdateOptions {
                debounce: Some(debounce),
            },
            now,
        );
        // Optimistic: the mirror reflects the commit before the flush settles.
        controller.set_mirror(snapshot);

        self.awaiting.set(true);
        self.inflight = Some(InFlightCommit {
            deadline: now + self.config.flush_window(),
            version,
            hash,
        });
        tracing::debug!(version, hash, "commit started");
    }

    fn assemble_snapshot(
        &self,
        pending: &PendingCommit,
        controller: &Controller,
        state: &UnifiedLayoutState,
    ) -> Result<ResponsiveLayouts, SyncError> {
        let mut raw = pending.raw_all.clone().unwrap_or_default();
        if let (Some(active), Some(bp_name)) = (&pending.raw_active, &pending.active_breakpoint) {
            raw.insert(bp_name.clone(), active.clone());
        }
        if raw.is_empty() {
            return match controller.working() {
                Some(working) => Ok(working.clone()),
                None => Err(SyncError::CommitInputUnavailable),
            };
        }
        let existing = state.layouts().cloned();
        let normalized = normalize_raw(
            &raw,
            existing.as_deref(),
            &self.config.normalize_options(),
        )?;
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use gridsync_core::{Breakpoint, LayoutItem};

    struct Fixture {
        queue: GuardedCommitQueue,
        controller: Controller,
        state: UnifiedLayoutState,
        tracker: CommitTracker,
        persisted: Rc<RefCell<Vec<Origin>>>,
        t0: Instant,
    }

    fn fixture() -> Fixture {
        let config = EngineConfig::default();
        let persisted = Rc::new(RefCell::new(Vec::new()));
        let sink_log = Rc::clone(&persisted);
        let sink = move |_l: &ResponsiveLayouts, o: &Origin| {
            sink_log.borrow_mut().push(o.clone());
        };
        Fixture {
            queue: GuardedCommitQueue::new(&config),
            controller: Controller::new(),
            state: UnifiedLayoutState::new(&config, Box::new(sink)),
            tracker: CommitTracker::new(config.pending_commit_guard),
            persisted,
            t0: Instant::now(),
        }
    }

    fn ms(t0: Instant, offset: u64) -> Instant {
        t0 + Duration::from_millis(offset)
    }

    fn raw_desktop(x: i64) -> Vec<RawLayoutItem> {
        vec![RawLayoutItem::new("clock_1", x, 0, 2, 2)]
    }

    fn start_grace(f: &mut Fixture, kind: GestureKind) {
        assert!(f.controller.begin_gesture(kind));
        assert!(f.controller.transition(ControllerState::Grace, "gesture_stop"));
    }

    fn pump(f: &mut Fixture, at: u64) -> Option<CommitResolution> {
        let now = ms(f.t0, at);
        f.state.poll(now);
        f.queue
            .poll(now, at, &mut f.controller, &mut f.state, &f.tracker)
    }

    #[test]
    fn commit_persists_and_returns_to_idle() {
        let mut f = fixture();
        start_grace(&mut f, GestureKind::Drag);
        f.queue.schedule_commit(
            Duration::from_millis(150),
            Some(raw_desktop(3)),
            None,
            Some("desktop".to_owned()),
            None,
            ms(f.t0, 0),
        );

        assert!(pump(&mut f, 100).is_none());
        // Timer fires at 150ms; the clamped 20ms debounce settles by 170ms.
        assert!(pump(&mut f, 150).is_none());
        assert_eq!(pump(&mut f, 171), Some(CommitResolution::CommitComplete));

        assert_eq!(f.controller.state(), ControllerState::Idle);
        let persisted = f.persisted.borrow();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].source, ChangeSource::UserDrag);
        assert_eq!(persisted[0].version, Some(1));
        assert_eq!(f.tracker.last_commit().unwrap().version, 1);
    }

    #[test]
    fn resize_gesture_stamps_user_resize() {
        let mut f = fixture();
        start_grace(&mut f, GestureKind::Resize);
        f.queue.schedule_commit(
            Duration::ZERO,
            Some(raw_desktop(1)),
            None,
            Some("desktop".to_owned()),
            None,
            ms(f.t0, 0),
        );
        pump(&mut f, 0);
        pump(&mut f, 25);
        assert_eq!(f.persisted.borrow()[0].source, ChangeSource::UserResize);
    }

    #[test]
    fn reschedule_replaces_pending_commit() {
        let mut f = fixture();
        start_grace(&mut f, GestureKind::Drag);
        f.queue.schedule_commit(
            Duration::from_millis(150),
            Some(raw_desktop(1)),
            None,
            Some("desktop".to_owned()),
            None,
            ms(f.t0, 0),
        );
        f.queue.schedule_commit(
            Duration::from_millis(150),
            Some(raw_desktop(9)),
            None,
            Some("desktop".to_owned()),
            None,
            ms(f.t0, 100),
        );
        pump(&mut f, 250);
        pump(&mut f, 275);
        assert_eq!(f.persisted.borrow().len(), 1);
        let canonical = f.state.layouts().unwrap();
        assert_eq!(canonical.get(Breakpoint::Desktop)[0].x, 9);
    }

    #[test]
    fn commit_without_input_aborts_cleanly() {
        let mut f = fixture();
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&errors);
        f.state.set_on_error(move |e| sink.borrow_mut().push(e));

        start_grace(&mut f, GestureKind::Drag);
        f.queue
            .schedule_commit(Duration::ZERO, None, None, None, None, ms(f.t0, 0));
        pump(&mut f, 0);

        assert_eq!(f.controller.state(), ControllerState::Idle);
        assert!(f.persisted.borrow().is_empty());
        assert!(f.state.layouts().is_none());
        assert_eq!(errors.borrow()[0], SyncError::CommitInputUnavailable);
    }

    #[test]
    fn buffered_working_snapshot_is_the_fallback() {
        let mut f = fixture();
        f.controller.begin_gesture(GestureKind::Drag);
        let working: ResponsiveLayouts =
            [(Breakpoint::Desktop, vec![LayoutItem::new("a_1", "a", 4, 0, 2, 2)])]
                .into_iter()
                .collect();
        f.controller.buffer_working(working);
        f.controller.transition(ControllerState::Grace, "gesture_stop");

        f.queue
            .schedule_commit(Duration::ZERO, None, None, None, None, ms(f.t0, 0));
        pump(&mut f, 0);
        pump(&mut f, 25);
        assert_eq!(f.state.layouts().unwrap().get(Breakpoint::Desktop)[0].x, 4);
    }

    #[test]
    fn highlight_sets_then_auto_clears() {
        let mut f = fixture();
        let seen: Rc<RefCell<Vec<Option<String>>>> = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        f.queue
            .register_highlight_setter(move |v| log.borrow_mut().push(v));

        start_grace(&mut f, GestureKind::Drag);
        f.queue.schedule_commit(
            Duration::ZERO,
            Some(raw_desktop(1)),
            None,
            Some("desktop".to_owned()),
            Some("clock_1".to_owned()),
            ms(f.t0, 0),
        );
        pump(&mut f, 0);
        assert_eq!(seen.borrow().last().unwrap().as_deref(), Some("clock_1"));

        pump(&mut f, 25);
        pump(&mut f, 401);
        assert_eq!(seen.borrow().last().unwrap(), &None);
    }

    #[test]
    fn late_highlight_setter_receives_held_value() {
        let mut f = fixture();
        start_grace(&mut f, GestureKind::Drag);
        f.queue.schedule_commit(
            Duration::ZERO,
            Some(raw_desktop(1)),
            None,
            Some("desktop".to_owned()),
            Some("clock_1".to_owned()),
            ms(f.t0, 0),
        );
        pump(&mut f, 0);

        // Setter registers only after the commit started.
        let seen: Rc<RefCell<Vec<Option<String>>>> = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        f.queue
            .register_highlight_setter(move |v| log.borrow_mut().push(v));
        assert_eq!(seen.borrow()[0].as_deref(), Some("clock_1"));
    }

    #[test]
    fn flush_timeout_bounds_the_wait() {
        struct NeverSettles;
        impl crate::unified_state::LayoutPersist for NeverSettles {
            fn persist(
                &mut self,
                _l: &ResponsiveLayouts,
                _o: &Origin,
                _t: crate::unified_state::PersistTicket,
            ) -> crate::unified_state::PersistOutcome {
                crate::unified_state::PersistOutcome::Pending
            }
        }
        let config = EngineConfig::default();
        let mut f = fixture();
        f.state = UnifiedLayoutState::new(&config, Box::new(NeverSettles));

        let awaiting = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&awaiting);
        f.queue
            .register_awaiting_setter(move |v| *flag.borrow_mut() = v);

        start_grace(&mut f, GestureKind::Drag);
        f.queue.schedule_commit(
            Duration::ZERO,
            Some(raw_desktop(1)),
            None,
            Some("desktop".to_owned()),
            None,
            ms(f.t0, 0),
        );
        pump(&mut f, 0);
        pump(&mut f, 25);
        assert!(*awaiting.borrow());

        // flush_window = max(2 × 150ms, 600ms) = 600ms from commit start.
        assert!(pump(&mut f, 599).is_none());
        assert_eq!(pump(&mut f, 601), Some(CommitResolution::FlushTimeout));
        assert!(!*awaiting.borrow());
        assert_eq!(f.controller.state(), ControllerState::Idle);
        // The tracker still records the commit so waiters resolve.
        assert_eq!(f.tracker.last_commit().unwrap().version, 1);
    }

    #[test]
    fn persist_failure_resolves_as_flush_error() {
        struct FailingSink;
        impl crate::unified_state::LayoutPersist for FailingSink {
            fn persist(
                &mut self,
                _l: &ResponsiveLayouts,
                _o: &Origin,
                _t: crate::unified_state::PersistTicket,
            ) -> crate::unified_state::PersistOutcome {
                crate::unified_state::PersistOutcome::Failed(
                    crate::unified_state::PersistError::new("backend down"),
                )
            }
        }
        let config = EngineConfig::default();
        let mut f = fixture();
        f.state = UnifiedLayoutState::new(&config, Box::new(FailingSink));

        start_grace(&mut f, GestureKind::Drag);
        f.queue.schedule_commit(
            Duration::ZERO,
            Some(raw_desktop(1)),
            None,
            Some("desktop".to_owned()),
            None,
            ms(f.t0, 0),
        );
        pump(&mut f, 0);
        assert_eq!(pump(&mut f, 25), Some(CommitResolution::FlushError));
        assert_eq!(f.controller.state(), ControllerState::Idle);
        // Editor stays usable: canonical snapshot was still adopted.
        assert!(f.state.layouts().is_some());
    }

    #[test]
    fn commit_fires_only_from_grace() {
        let mut f = fixture();
        // Gesture aborted straight to idle before the timer fired.
        f.controller.begin_gesture(GestureKind::Drag);
        f.controller.transition(ControllerState::Idle, "gesture_abort");
        f.queue.schedule_commit(
            Duration::ZERO,
            Some(raw_desktop(1)),
            None,
            Some("desktop".to_owned()),
            None,
            ms(f.t0, 0),
        );
        assert!(pump(&mut f, 0).is_none());
        assert!(f.persisted.borrow().is_empty());
        assert!(!f.queue.is_commit_in_flight());
    }
}
