#![forbid(unsafe_code)]

//! Layout items, responsive layout maps, and raw-input normalization.
//!
//! A [`LayoutItem`] is one positioned module instance in the grid. A
//! [`ResponsiveLayouts`] maps each [`Breakpoint`] to an ordered item
//! sequence. [`normalize_raw`] converts the heterogeneous per-breakpoint
//! arrays produced by an external grid library into canonical items, carrying
//! plugin references, config blobs, and flags over from an existing snapshot
//! where the raw input does not supply them.
//!
//! # Invariants
//!
//! 1. Item identifiers are unique within one breakpoint's sequence.
//! 2. Coordinates and sizes are non-negative grid units; normalization clamps
//!    out-of-range raw values rather than rejecting them.
//! 3. The same identifier appearing under several breakpoints denotes the
//!    same logical module instance (geometry may differ per tier).
//!
//! # Failure Modes
//!
//! - A raw breakpoint name that the [`BreakpointMap`] cannot resolve is
//!   skipped with a warning; the rest of the input still normalizes.
//! - A raw item with no explicit plugin reference and an identifier whose
//!   first delimiter segment is empty fails normalization with
//!   [`NormalizeError::UnattributablePlugin`] — guessing would silently
//!   misattribute the item to the wrong owner.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::breakpoint::{Breakpoint, BreakpointMap};

/// One positioned module instance in the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutItem {
    /// Stable identifier, unique within a breakpoint's sequence.
    pub id: String,
    /// Grid column of the top-left corner.
    pub x: u32,
    /// Grid row of the top-left corner.
    pub y: u32,
    /// Width in grid units.
    pub w: u32,
    /// Height in grid units.
    pub h: u32,
    /// Optional minimum size bounds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_h: Option<u32>,
    /// Optional maximum size bounds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_h: Option<u32>,
    /// Reference to the module/plugin this item renders.
    pub plugin: String,
    /// Opaque per-item configuration blob.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
    /// Whether the item may be dragged.
    #[serde(default = "default_true")]
    pub draggable: bool,
    /// Whether the item may be resized.
    #[serde(default = "default_true")]
    pub resizable: bool,
    /// Whether the item is pinned (ignores drag/resize entirely).
    #[serde(default)]
    pub pinned: bool,
}

fn default_true() -> bool {
    true
}

impl LayoutItem {
    /// Create an item with the given geometry and plugin reference.
    #[must_use]
    pub fn new(id: impl Into<String>, plugin: impl Into<String>, x: u32, y: u32, w: u32, h: u32) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            w,
            h,
            min_w: None,
            min_h: None,
            max_w: None,
            max_h: None,
            plugin: plugin.into(),
            config: Value::Null,
            draggable: true,
            resizable: true,
            pinned: false,
        }
    }

    /// True iff `other` matches on the structural fields (id, x, y, w, h).
    #[must_use]
    pub fn same_placement(&self, other: &LayoutItem) -> bool {
        self.id == other.id
            && self.x == other.x
            && self.y == other.y
            && self.w == other.w
            && self.h == other.h
    }
}

/// Breakpoint-keyed layout: one ordered item sequence per tier.
///
/// Backed by a `BTreeMap` so iteration order is the breakpoint order,
/// which keeps content hashing deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponsiveLayouts {
    layouts: BTreeMap<Breakpoint, Vec<LayoutItem>>,
}

impl ResponsiveLayouts {
    /// An empty layout map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Item sequence for a breakpoint; absent tiers read as empty.
    #[must_use]
    pub fn get(&self, bp: Breakpoint) -> &[LayoutItem] {
        self.layouts.get(&bp).map_or(&[], Vec::as_slice)
    }

    /// Replace a breakpoint's item sequence.
    pub fn set(&mut self, bp: Breakpoint, items: Vec<LayoutItem>) {
        self.layouts.insert(bp, items);
    }

    /// Remove an item from every breakpoint. Returns how many tiers held it.
    pub fn remove_item(&mut self, id: &str) -> usize {
        let mut hits = 0;
        for items in self.layouts.values_mut() {
            let before = items.len();
            items.retain(|i| i.id != id);
            hits += usize::from(items.len() < before);
        }
        hits
    }

    /// Find an item by id, searching breakpoints smallest to largest.
    #[must_use]
    pub fn find_item(&self, id: &str) -> Option<(&LayoutItem, Breakpoint)> {
        for (&bp, items) in &self.layouts {
            if let Some(item) = items.iter().find(|i| i.id == id) {
                return Some((item, bp));
            }
        }
        None
    }

    /// Breakpoints with a (possibly empty) explicit entry.
    pub fn breakpoints(&self) -> impl Iterator<Item = (Breakpoint, &[LayoutItem])> {
        self.layouts.iter().map(|(&bp, v)| (bp, v.as_slice()))
    }

    /// True iff every breakpoint's sequence is empty or absent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layouts.values().all(Vec::is_empty)
    }

    /// Total item count across all breakpoints.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.layouts.values().map(Vec::len).sum()
    }
}

impl FromIterator<(Breakpoint, Vec<LayoutItem>)> for ResponsiveLayouts {
    fn from_iter<I: IntoIterator<Item = (Breakpoint, Vec<LayoutItem>)>>(iter: I) -> Self {
        Self {
            layouts: iter.into_iter().collect(),
        }
    }
}

/// A raw per-item record as produced by the external grid library.
///
/// Values are signed because grid libraries can briefly report negative
/// coordinates mid-gesture; normalization clamps them into grid units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLayoutItem {
    pub id: String,
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_w: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_h: Option<i64>,
    /// Explicit plugin reference, when the producer supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
}

impl RawLayoutItem {
    #[must_use]
    pub fn new(id: impl Into<String>, x: i64, y: i64, w: i64, h: i64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            w,
            h,
            min_w: None,
            min_h: None,
            plugin: None,
        }
    }
}

/// Options controlling [`normalize_raw`].
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Grid-library breakpoint name translation.
    pub breakpoint_map: BreakpointMap,
    /// Delimiter for the legacy id-prefix plugin fallback.
    pub plugin_delimiter: String,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            breakpoint_map: BreakpointMap::default(),
            plugin_delimiter: "_".to_owned(),
        }
    }
}

/// Errors from raw-input normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// An item carries no plugin reference and its identifier does not start
    /// with a non-empty `<plugin><delimiter>` prefix.
    UnattributablePlugin { id: String },
    /// An identifier appears twice within one raw breakpoint array.
    DuplicateId { id: String, breakpoint: Breakpoint },
}

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnattributablePlugin { id } => {
                write!(f, "cannot derive plugin reference from item id {id:?}")
            }
            Self::DuplicateId { id, breakpoint } => {
                write!(f, "duplicate item id {id:?} in breakpoint {breakpoint}")
            }
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Convert raw per-breakpoint arrays into a canonical [`ResponsiveLayouts`].
///
/// Breakpoint keys are resolved through the options' [`BreakpointMap`];
/// unresolvable keys are skipped with a warning. Plugin references, config
/// blobs, bounds, and flags are carried over from `existing` for known ids.
/// For unknown ids without an explicit plugin, the reference is derived from
/// the id's first delimiter segment (legacy compatibility fallback).
pub fn normalize_raw(
    raw: &BTreeMap<String, Vec<RawLayoutItem>>,
    existing: Option<&ResponsiveLayouts>,
    opts: &NormalizeOptions,
) -> Result<ResponsiveLayouts, NormalizeError> {
    let mut out = ResponsiveLayouts::new();
    for (name, items) in raw {
        let Some(bp) = opts.breakpoint_map.resolve(name) else {
            tracing::warn!(breakpoint = %name, "skipping unknown raw breakpoint");
            continue;
        };
        let mut normalized = Vec::with_capacity(items.len());
        for item in items {
            if normalized.iter().any(|i: &LayoutItem| i.id == item.id) {
                return Err(NormalizeError::DuplicateId {
                    id: item.id.clone(),
                    breakpoint: bp,
                });
            }
            normalized.push(normalize_item(item, existing, opts)?);
        }
        out.set(bp, normalized);
    }
    Ok(out)
}

fn normalize_item(
    raw: &RawLayoutItem,
    existing: Option<&ResponsiveLayouts>,
    opts: &NormalizeOptions,
) -> Result<LayoutItem, NormalizeError> {
    let known = existing.and_then(|l| l.find_item(&raw.id)).map(|(i, _)| i);

    let plugin = match (&raw.plugin, known) {
        (Some(p), _) => p.clone(),
        (None, Some(prev)) => prev.plugin.clone(),
        (None, None) => derive_plugin(&raw.id, &opts.plugin_delimiter)?,
    };

    let mut item = LayoutItem {
        id: raw.id.clone(),
        x: clamp_unit(raw.x, &raw.id, "x"),
        y: clamp_unit(raw.y, &raw.id, "y"),
        w: clamp_unit(raw.w, &raw.id, "w"),
        h: clamp_unit(raw.h, &raw.id, "h"),
        min_w: raw.min_w.map(|v| clamp_unit(v, &raw.id, "min_w")),
        min_h: raw.min_h.map(|v| clamp_unit(v, &raw.id, "min_h")),
        max_w: None,
        max_h: None,
        plugin,
        config: Value::Null,
        draggable: true,
        resizable: true,
        pinned: false,
    };
    if let Some(prev) = known {
        item.config = prev.config.clone();
        item.max_w = prev.max_w;
        item.max_h = prev.max_h;
        item.min_w = item.min_w.or(prev.min_w);
        item.min_h = item.min_h.or(prev.min_h);
        item.draggable = prev.draggable;
        item.resizable = prev.resizable;
        item.pinned = prev.pinned;
    }
    Ok(item)
}

/// Legacy fallback: the plugin reference is the id's first delimiter segment.
fn derive_plugin(id: &str, delimiter: &str) -> Result<String, NormalizeError> {
    let prefix = id.split(delimiter).next().unwrap_or("");
    if prefix.is_empty() {
        return Err(NormalizeError::UnattributablePlugin { id: id.to_owned() });
    }
    Ok(prefix.to_owned())
}

fn clamp_unit(value: i64, id: &str, field: &str) -> u32 {
    if value < 0 {
        tracing::warn!(id, field, value, "clamping negative grid unit to 0");
        return 0;
    }
    u32::try_from(value).unwrap_or_else(|_| {
        tracing::warn!(id, field, value, "clamping oversized grid unit");
        u32::MAX
    })
}
