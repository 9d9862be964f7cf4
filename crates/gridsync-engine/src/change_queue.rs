#![forbid(unsafe_code)]

//! Per-key debounced deduplication of proposed layout changes.
//!
//! Rapid bursts of changes are coalesced per debounce key: a newly enqueued
//! change for the same key replaces the pending one and restarts its timer,
//! while changes for different keys debounce independently (so an external
//! sync and an in-progress user drag never starve each other). After a key's
//! debounce window elapses with no further enqueue, exactly one
//! [`ChangeEvent`] is emitted for that key, carrying the payload of the
//! *last* enqueue.
//!
//! The queue is host-pumped: [`poll`](ChangeQueue::poll) drains entries whose
//! deadline has passed, [`flush`](ChangeQueue::flush) drains everything
//! regardless of deadline. The consumer drains; there is no callback to fire
//! into a torn-down listener, but [`destroy`](ChangeQueue::destroy) still
//! cancels all pending work for parity on teardown.
//!
//! # Invariants
//!
//! 1. At most one pending entry per key; replacement preserves the key's
//!    original queue position.
//! 2. Within one key, only the last enqueued change in a burst is ever
//!    emitted; earlier ones are superseded, never reordered after it.
//! 3. A destroyed queue drops all pending entries and ignores further
//!    enqueues (logged at warn).

use web_time::{Duration, Instant};

use gridsync_core::{Origin, ResponsiveLayouts, snapshot_hash};

/// One settled burst: the coalesced payload for a debounce key.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub layouts: ResponsiveLayouts,
    pub origin: Origin,
    /// Structural content hash of `layouts`, computed at enqueue time.
    pub hash: u64,
}

#[derive(Debug)]
struct PendingChange {
    key: String,
    layouts: ResponsiveLayouts,
    origin: Origin,
    hash: u64,
    deadline: Instant,
}

#[derive(Debug)]
struct OperationRecord {
    opened_at: Instant,
    closed_at: Option<Instant>,
}

/// Debounced, per-key change coalescer.
#[derive(Debug)]
pub struct ChangeQueue {
    debounce: Duration,
    operation_linger: Duration,
    pending: Vec<PendingChange>,
    operations: Vec<(String, OperationRecord)>,
    destroyed: bool,
}

impl ChangeQueue {
    #[must_use]
    pub fn new(debounce: Duration, operation_linger: Duration) -> Self {
        Self {
            debounce,
            operation_linger,
            pending: Vec::new(),
            operations: Vec::new(),
            destroyed: false,
        }
    }

    /// Enqueue a proposed change.
    ///
    /// `key` defaults to `origin.debounce_key()`; `debounce` overrides the
    /// queue's default window for this entry. Replaces any pending entry for
    /// the same key, keeping its queue position and restarting its timer.
    pub fn enqueue(
        &mut self,
        layouts: ResponsiveLayouts,
        origin: Origin,
        key: Option<String>,
        debounce: Option<Duration>,
        now: Instant,
    ) {
        if self.destroyed {
            tracing::warn!(source = %origin.source, "enqueue on destroyed change queue ignored");
            return;
        }
        let key = key.unwrap_or_else(|| origin.debounce_key());
        let hash = snapshot_hash(&layouts);
        let deadline = now + debounce.unwrap_or(self.debounce);
        if let Some(entry) = self.pending.iter_mut().find(|p| p.key == key) {
            entry.layouts = layouts;
            entry.origin = origin;
            entry.hash = hash;
            entry.deadline = deadline;
        } else {
            self.pending.push(PendingChange {
                key,
                layouts,
                origin,
                hash,
                deadline,
            });
        }
    }

    /// Drain entries whose debounce window has elapsed, in enqueue order.
    /// Also sweeps expired operation records.
    #[must_use]
    pub fn poll(&mut self, now: Instant) -> Vec<ChangeEvent> {
        self.sweep_operations(now);
        let mut due = Vec::new();
        self.pending.retain_mut(|p| {
            if p.deadline <= now {
                due.push(ChangeEvent {
                    layouts: std::mem::take(&mut p.layouts),
                    origin: p.origin.clone(),
                    hash: p.hash,
                });
                false
            } else {
                true
            }
        });
        due
    }

    /// Drain every pending entry regardless of deadline, in enqueue order.
    #[must_use]
    pub fn flush(&mut self) -> Vec<ChangeEvent> {
        self.pending
            .drain(..)
            .map(|p| ChangeEvent {
                layouts: p.layouts,
                origin: p.origin,
                hash: p.hash,
            })
            .collect()
    }

    /// Earliest pending deadline, if any. Lets the host size its next sleep.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.deadline).min()
    }

    /// Whether any entry is pending (optionally for a specific key).
    #[must_use]
    pub fn has_pending(&self, key: Option<&str>) -> bool {
        match key {
            Some(k) => self.pending.iter().any(|p| p.key == k),
            None => !self.pending.is_empty(),
        }
    }

    /// Open an operation. Bookkeeping only; emission is not gated on it.
    pub fn start_operation(&mut self, id: impl Into<String>, now: Instant) {
        let id = id.into();
        if let Some((_, rec)) = self.operations.iter_mut().find(|(i, _)| *i == id) {
            rec.opened_at = now;
            rec.closed_at = None;
        } else {
            self.operations.push((
                id,
                OperationRecord {
                    opened_at: now,
                    closed_at: None,
                },
            ));
        }
    }

    /// Close an operation. It lingers for the configured window so trailing
    /// events can still be attributed to it, then is forgotten.
    pub fn stop_operation(&mut self, id: &str, now: Instant) {
        if let Some((_, rec)) = self.operations.iter_mut().find(|(i, _)| i == id) {
            rec.closed_at = Some(now);
        }
    }

    /// Whether an operation is open or still within its linger window.
    #[must_use]
    pub fn is_operation_active(&self, id: &str, now: Instant) -> bool {
        self.operations.iter().any(|(i, rec)| {
            i == id
                && match rec.closed_at {
                    None => true,
                    Some(closed) => now.saturating_duration_since(closed) <= self.operation_linger,
                }
        })
    }

    fn sweep_operations(&mut self, now: Instant) {
        let linger = self.operation_linger;
        self.operations.retain(|(id, rec)| {
            let keep = match rec.closed_at {
                None => true,
                Some(closed) => now.saturating_duration_since(closed) <= linger,
            };
            if !keep {
                tracing::trace!(operation = %id, "operation expired");
            }
            keep
        });
    }

    /// Cancel all pending work. Further enqueues are ignored.
    pub fn destroy(&mut self) {
        self.pending.clear();
        self.operations.clear();
        self.destroyed = true;
    }

    /// Whether `destroy` has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsync_core::{Breakpoint, ChangeSource, LayoutItem};
    use proptest::prelude::*;

    fn snapshot(x: u32) -> ResponsiveLayouts {
        [(Breakpoint::Desktop, vec![LayoutItem::new("a_1", "a", x, 0, 2, 2)])]
            .into_iter()
            .collect()
    }

    fn origin(source: ChangeSource) -> Origin {
        Origin::new(source, 0)
    }

    fn queue() -> ChangeQueue {
        ChangeQueue::new(Duration::from_millis(100), Duration::from_millis(300))
    }

    #[test]
    fn burst_on_one_key_emits_last_payload_once() {
        let mut q = queue();
        let t0 = Instant::now();
        for i in 0..5 {
            q.enqueue(
                snapshot(i),
                origin(ChangeSource::UserDrag),
                None,
                None,
                t0 + Duration::from_millis(u64::from(i) * 10),
            );
        }
        // Nothing due before the last enqueue's window closes.
        assert!(q.poll(t0 + Duration::from_millis(120)).is_empty());
        let events = q.poll(t0 + Duration::from_millis(141));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].layouts.get(Breakpoint::Desktop)[0].x, 4);
        assert!(!q.has_pending(None));
    }

    #[test]
    fn distinct_keys_debounce_independently() {
        let mut q = queue();
        let t0 = Instant::now();
        q.enqueue(snapshot(1), origin(ChangeSource::UserDrag), None, None, t0);
        q.enqueue(
            snapshot(2),
            origin(ChangeSource::ExternalSync),
            None,
            None,
            t0 + Duration::from_millis(50),
        );
        let first = q.poll(t0 + Duration::from_millis(100));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].origin.source, ChangeSource::UserDrag);
        let second = q.poll(t0 + Duration::from_millis(150));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].origin.source, ChangeSource::ExternalSync);
    }

    #[test]
    fn operation_id_groups_across_sources() {
        let mut q = queue();
        let t0 = Instant::now();
        q.enqueue(
            snapshot(1),
            origin(ChangeSource::UserDrag).with_operation("op-1"),
            None,
            None,
            t0,
        );
        q.enqueue(
            snapshot(2),
            origin(ChangeSource::UserResize).with_operation("op-1"),
            None,
            None,
            t0 + Duration::from_millis(10),
        );
        let events = q.poll(t0 + Duration::from_millis(200));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].origin.source, ChangeSource::UserResize);
    }

    #[test]
    fn flush_emits_everything_immediately() {
        let mut q = queue();
        let t0 = Instant::now();
        q.enqueue(snapshot(1), origin(ChangeSource::UserDrag), None, None, t0);
        q.enqueue(snapshot(2), origin(ChangeSource::ExternalSync), None, None, t0);
        let events = q.flush();
        assert_eq!(events.len(), 2);
        // Enqueue order preserved.
        assert_eq!(events[0].origin.source, ChangeSource::UserDrag);
        assert!(!q.has_pending(None));
    }

    #[test]
    fn debounce_override_applies_per_entry() {
        let mut q = queue();
        let t0 = Instant::now();
        q.enqueue(
            snapshot(1),
            origin(ChangeSource::UserDrag),
            None,
            Some(Duration::from_millis(10)),
            t0,
        );
        assert_eq!(q.poll(t0 + Duration::from_millis(11)).len(), 1);
    }

    #[test]
    fn event_hash_matches_payload() {
        let mut q = queue();
        let t0 = Instant::now();
        let snap = snapshot(7);
        q.enqueue(snap.clone(), origin(ChangeSource::UserDrag), None, None, t0);
        let events = q.flush();
        assert_eq!(events[0].hash, snapshot_hash(&snap));
    }

    #[test]
    fn destroy_cancels_and_rejects() {
        let mut q = queue();
        let t0 = Instant::now();
        q.enqueue(snapshot(1), origin(ChangeSource::UserDrag), None, None, t0);
        q.destroy();
        assert!(q.flush().is_empty());
        q.enqueue(snapshot(2), origin(ChangeSource::UserDrag), None, None, t0);
        assert!(!q.has_pending(None));
    }

    #[test]
    fn operation_lingers_after_stop() {
        let mut q = queue();
        let t0 = Instant::now();
        q.start_operation("op-1", t0);
        q.stop_operation("op-1", t0 + Duration::from_millis(100));
        assert!(q.is_operation_active("op-1", t0 + Duration::from_millis(350)));
        assert!(!q.is_operation_active("op-1", t0 + Duration::from_millis(500)));
        let _ = q.poll(t0 + Duration::from_millis(500));
        assert!(!q.is_operation_active("op-1", t0 + Duration::from_millis(350)));
    }

    #[test]
    fn next_deadline_is_earliest() {
        let mut q = queue();
        let t0 = Instant::now();
        q.enqueue(snapshot(1), origin(ChangeSource::UserDrag), None, None, t0);
        q.enqueue(
            snapshot(2),
            origin(ChangeSource::ExternalSync),
            None,
            Some(Duration::from_millis(10)),
            t0,
        );
        assert_eq!(q.next_deadline(), Some(t0 + Duration::from_millis(10)));
    }

    proptest! {
        /// N rapid enqueues on one key always coalesce to exactly one event
        /// carrying the last payload.
        #[test]
        fn coalescing_always_keeps_last(xs in proptest::collection::vec(0u32..100, 1..20)) {
            let mut q = queue();
            let t0 = Instant::now();
            for (i, &x) in xs.iter().enumerate() {
                q.enqueue(
                    snapshot(x),
                    origin(ChangeSource::UserDrag),
                    None,
                    None,
                    t0 + Duration::from_millis(i as u64),
                );
            }
            let events = q.flush();
            prop_assert_eq!(events.len(), 1);
            prop_assert_eq!(
                events[0].layouts.get(Breakpoint::Desktop)[0].x,
                *xs.last().unwrap()
            );
        }
    }
}
