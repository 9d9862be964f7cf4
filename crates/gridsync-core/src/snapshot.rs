#![forbid(unsafe_code)]

//! Snapshot codec: structural content hash and semantic equality.
//!
//! Both functions look only at structural fields (id, x, y, w, h), so config
//! blob churn or flag flips never produce spurious diffs, and both treat an
//! absent breakpoint entry and an empty one as the same thing.
//!
//! The hash is a deterministic, seed-free fingerprint (FxHasher), cheap
//! enough to run on every proposed update. It is order-sensitive within each
//! breakpoint's sequence: reordering items is a real change.
//!
//! # Invariants
//!
//! 1. `semantically_equal(a, b)` implies `snapshot_hash(a) == snapshot_hash(b)`.
//! 2. Hashes are stable across processes and runs (no random seeding).

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::item::{LayoutItem, ResponsiveLayouts};

/// Deterministic content hash over structural fields only.
#[must_use]
pub fn snapshot_hash(layouts: &ResponsiveLayouts) -> u64 {
    let mut hasher = FxHasher::default();
    for (bp, items) in layouts.breakpoints() {
        if items.is_empty() {
            // Absent and empty tiers must hash identically.
            continue;
        }
        (bp as u8).hash(&mut hasher);
        items.len().hash(&mut hasher);
        for item in items {
            item.id.hash(&mut hasher);
            item.x.hash(&mut hasher);
            item.y.hash(&mut hasher);
            item.w.hash(&mut hasher);
            item.h.hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// True iff every breakpoint's sequence is pairwise equal on (id, x, y, w, h).
///
/// Absent and empty sequences compare equal.
#[must_use]
pub fn semantically_equal(a: &ResponsiveLayouts, b: &ResponsiveLayouts) -> bool {
    use crate::breakpoint::Breakpoint;
    Breakpoint::ALL.iter().all(|&bp| {
        let (la, lb) = (a.get(bp), b.get(bp));
        la.len() == lb.len()
            && la
                .iter()
                .zip(lb)
                .all(|(ia, ib): (&LayoutItem, &LayoutItem)| ia.same_placement(ib))
    })
}
