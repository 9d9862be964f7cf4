#![forbid(unsafe_code)]

//! Responsive breakpoint vocabulary.
//!
//! Layouts are kept per width tier. The tier set is fixed (five names,
//! smallest to largest); external grid libraries usually speak their own
//! names (`xxs`/`xs`/`sm`/`md`/`lg` style), so [`BreakpointMap`] translates
//! those into this vocabulary.
//!
//! # Invariants
//!
//! 1. `Breakpoint::ALL` is ordered smallest to largest; `as usize` gives a
//!    stable ordinal into that order.
//! 2. Canonical names (`"mobile"` .. `"ultrawide"`) always resolve, even
//!    through a custom [`BreakpointMap`].

use serde::{Deserialize, Serialize};

/// A named responsive width tier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Breakpoint {
    Mobile,
    Tablet,
    #[default]
    Desktop,
    Wide,
    Ultrawide,
}

impl Breakpoint {
    /// All breakpoints, smallest to largest.
    pub const ALL: [Breakpoint; 5] = [
        Breakpoint::Mobile,
        Breakpoint::Tablet,
        Breakpoint::Desktop,
        Breakpoint::Wide,
        Breakpoint::Ultrawide,
    ];

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Breakpoint::Mobile => "mobile",
            Breakpoint::Tablet => "tablet",
            Breakpoint::Desktop => "desktop",
            Breakpoint::Wide => "wide",
            Breakpoint::Ultrawide => "ultrawide",
        }
    }

    /// Parse a canonical name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "mobile" => Some(Breakpoint::Mobile),
            "tablet" => Some(Breakpoint::Tablet),
            "desktop" => Some(Breakpoint::Desktop),
            "wide" => Some(Breakpoint::Wide),
            "ultrawide" => Some(Breakpoint::Ultrawide),
            _ => None,
        }
    }
}

impl std::fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Translation table from grid-library breakpoint names to [`Breakpoint`]s.
///
/// The default table covers the common five-tier grid-library naming
/// (`xxs` smallest through `lg` largest). Canonical names pass through
/// regardless of the table contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointMap {
    entries: Vec<(String, Breakpoint)>,
}

impl Default for BreakpointMap {
    fn default() -> Self {
        Self {
            entries: vec![
                ("xxs".to_owned(), Breakpoint::Mobile),
                ("xs".to_owned(), Breakpoint::Tablet),
                ("sm".to_owned(), Breakpoint::Desktop),
                ("md".to_owned(), Breakpoint::Wide),
                ("lg".to_owned(), Breakpoint::Ultrawide),
            ],
        }
    }
}

impl BreakpointMap {
    /// An empty map (only canonical names resolve).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add or replace a mapping entry.
    pub fn insert(&mut self, library_name: impl Into<String>, bp: Breakpoint) {
        let name = library_name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = bp;
        } else {
            self.entries.push((name, bp));
        }
    }

    /// Resolve a grid-library or canonical breakpoint name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Breakpoint> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bp)| *bp)
            .or_else(|| Breakpoint::from_name(name))
    }
}
