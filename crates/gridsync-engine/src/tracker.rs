#![forbid(unsafe_code)]

//! Commit tracking: last committed version/hash and pending-commit waiters.
//!
//! The tracker records the most recent commit accepted by the engine and
//! lets callers obtain a [`CommitWaiter`] that resolves once a specific
//! pending commit reports — or after a safety timeout, so no caller can
//! wait on a commit that never lands. A newer commit supersedes older
//! still-pending waiters (any waiter with `version <= committed` resolves)
//! rather than leaving them to time out.
//!
//! Constructed explicitly and shared via `Arc` — several independent engine
//! instances may report into one tracker, which is why entries are keyed by
//! hash, not by instance, and the interior is `Mutex`-guarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use web_time::{Duration, Instant};

/// `{version, hash, timestamp}` of the most recent accepted commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitMetadata {
    pub version: u64,
    pub hash: u64,
    pub timestamp_ms: u64,
}

/// Handle resolving when a tracked commit completes (or times out).
#[derive(Debug, Clone)]
pub struct CommitWaiter {
    resolved: Arc<AtomicBool>,
}

impl CommitWaiter {
    fn resolved_now() -> Self {
        Self {
            resolved: Arc::new(AtomicBool::new(true)),
        }
    }

    fn unresolved() -> Self {
        Self {
            resolved: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the tracked commit has reported (or the safety timeout fired).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }
}

/// Read-only tracker state for debug display.
#[cfg(feature = "debug-surface")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSnapshot {
    pub version: u64,
    pub hash: u64,
    pub timestamp_ms: u64,
    pub has_pending: bool,
}

struct PendingEntry {
    hash: u64,
    version: u64,
    flag: Arc<AtomicBool>,
    expires: Instant,
}

struct TrackerInner {
    last: Option<CommitMetadata>,
    pending: Vec<PendingEntry>,
}

/// Records commits and resolves waiters. See module docs.
pub struct CommitTracker {
    guard: Duration,
    inner: Mutex<TrackerInner>,
}

impl std::fmt::Debug for CommitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("CommitTracker")
            .field("last", &inner.last)
            .field("pending", &inner.pending.len())
            .finish()
    }
}

impl CommitTracker {
    /// `guard` is the safety timeout after which unmatched waiters resolve.
    #[must_use]
    pub fn new(guard: Duration) -> Self {
        Self {
            guard,
            inner: Mutex::new(TrackerInner {
                last: None,
                pending: Vec::new(),
            }),
        }
    }

    /// Record an accepted commit and resolve superseded waiters.
    pub fn record_commit(&self, meta: CommitMetadata) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.last = Some(meta);
        inner.pending.retain(|entry| {
            if entry.version <= meta.version || entry.hash == meta.hash {
                entry.flag.store(true, Ordering::Release);
                false
            } else {
                true
            }
        });
    }

    /// Await completion of a specific pending commit.
    ///
    /// Resolves immediately when the last recorded commit already matches
    /// the hash; otherwise returns the existing waiter for that hash or
    /// registers a new one with the safety timeout armed.
    #[must_use]
    pub fn track_pending(&self, version: u64, hash: u64, now: Instant) -> CommitWaiter {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.last.is_some_and(|last| last.hash == hash) {
            return CommitWaiter::resolved_now();
        }
        if let Some(entry) = inner.pending.iter().find(|e| e.hash == hash) {
            return CommitWaiter {
                resolved: Arc::clone(&entry.flag),
            };
        }
        let waiter = CommitWaiter::unresolved();
        inner.pending.push(PendingEntry {
            hash,
            version,
            flag: Arc::clone(&waiter.resolved),
            expires: now + self.guard,
        });
        waiter
    }

    /// Resolve and drop waiters whose safety timeout has elapsed.
    pub fn sweep(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pending.retain(|entry| {
            if entry.expires <= now {
                tracing::warn!(
                    hash = entry.hash,
                    version = entry.version,
                    "pending commit waiter timed out"
                );
                entry.flag.store(true, Ordering::Release);
                false
            } else {
                true
            }
        });
    }

    /// Drop all waiters (resolving them) on teardown.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for entry in inner.pending.drain(..) {
            entry.flag.store(true, Ordering::Release);
        }
    }

    #[must_use]
    pub fn last_commit(&self) -> Option<CommitMetadata> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).last
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .is_empty()
    }

    /// Debug display surface.
    #[cfg(feature = "debug-surface")]
    #[must_use]
    pub fn snapshot(&self) -> Option<TrackerSnapshot> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.last.map(|last| TrackerSnapshot {
            version: last.version,
            hash: last.hash,
            timestamp_ms: last.timestamp_ms,
            has_pending: !inner.pending.is_empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> CommitTracker {
        CommitTracker::new(Duration::from_secs(5))
    }

    fn meta(version: u64, hash: u64) -> CommitMetadata {
        CommitMetadata {
            version,
            hash,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn matching_hash_resolves_immediately() {
        let t = tracker();
        t.record_commit(meta(1, 0xAB));
        let w = t.track_pending(1, 0xAB, Instant::now());
        assert!(w.is_complete());
        assert!(!t.has_pending());
    }

    #[test]
    fn waiter_resolves_on_exact_hash() {
        let t = tracker();
        let w = t.track_pending(2, 0xCD, Instant::now());
        assert!(!w.is_complete());
        t.record_commit(meta(2, 0xCD));
        assert!(w.is_complete());
    }

    #[test]
    fn newer_commit_supersedes_older_waiters() {
        let t = tracker();
        let old = t.track_pending(1, 0x01, Instant::now());
        let new = t.track_pending(5, 0x05, Instant::now());
        t.record_commit(meta(3, 0x03));
        assert!(old.is_complete());
        assert!(!new.is_complete());
    }

    #[test]
    fn same_hash_shares_one_waiter() {
        let t = tracker();
        let now = Instant::now();
        let a = t.track_pending(1, 0x01, now);
        let b = t.track_pending(1, 0x01, now);
        t.record_commit(meta(1, 0x01));
        assert!(a.is_complete());
        assert!(b.is_complete());
    }

    #[test]
    fn sweep_times_out_stale_waiters() {
        let t = tracker();
        let now = Instant::now();
        let w = t.track_pending(1, 0x01, now);
        t.sweep(now + Duration::from_secs(4));
        assert!(!w.is_complete());
        t.sweep(now + Duration::from_secs(5));
        assert!(w.is_complete());
        assert!(!t.has_pending());
    }

    #[test]
    fn cleanup_resolves_everything() {
        let t = tracker();
        let w = t.track_pending(1, 0x01, Instant::now());
        t.cleanup();
        assert!(w.is_complete());
        assert!(!t.has_pending());
    }

    #[test]
    fn shared_across_instances_by_hash() {
        let t = Arc::new(tracker());
        let w = t.track_pending(7, 0x77, Instant::now());
        // A different engine instance reports the commit.
        let t2 = Arc::clone(&t);
        t2.record_commit(meta(7, 0x77));
        assert!(w.is_complete());
    }

    #[cfg(feature = "debug-surface")]
    #[test]
    fn snapshot_reflects_state() {
        let t = tracker();
        assert!(t.snapshot().is_none());
        t.record_commit(meta(2, 0x22));
        let snap = t.snapshot().unwrap();
        assert_eq!(snap.version, 2);
        assert!(!snap.has_pending);
    }
}
