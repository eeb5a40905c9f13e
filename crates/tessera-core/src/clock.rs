//! Revision clock: two monotonic counters over the interactive project.
//!
//! - The **structural** revision advances once per accepted command batch,
//!   undo or redo. It also advances the live-value revision.
//! - The **live-value** revision additionally advances on preview-only
//!   edits (e.g. a numeric drag before commit) that bypass history.
//!
//! Caches stamp their entries with the [`Revision`] they were computed at;
//! an entry is valid only while its stamp equals [`RevisionClock::current`].
//! Counters start at 1, so [`Revision::INVALID`] (`0, 0`) can never match.
//! On overflow both counters restart at 1 and the bump reports
//! [`Bump::Wrapped`]; the owner must then invalidate every cache stamp.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(structural, live_value)` stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision {
    pub structural: u64,
    pub live_value: u64,
}

impl Revision {
    /// Sentinel that no clock ever reports.
    pub const INVALID: Self = Self {
        structural: 0,
        live_value: 0,
    };

    #[must_use]
    pub const fn new(structural: u64, live_value: u64) -> Self {
        Self {
            structural,
            live_value,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.structural, self.live_value)
    }
}

/// Outcome of a bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Bump {
    Advanced,
    /// A counter overflowed and both restarted at 1. Every cached stamp
    /// must be invalidated.
    Wrapped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionClock {
    structural: u64,
    live_value: u64,
}

impl Default for RevisionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RevisionClock {
    pub const START: u64 = 1;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            structural: Self::START,
            live_value: Self::START,
        }
    }

    /// Clock positioned at explicit counters (clamped to at least 1).
    #[must_use]
    pub fn with_counters(structural: u64, live_value: u64) -> Self {
        Self {
            structural: structural.max(Self::START),
            live_value: live_value.max(Self::START),
        }
    }

    #[must_use]
    pub const fn current(&self) -> Revision {
        Revision::new(self.structural, self.live_value)
    }

    #[must_use]
    pub const fn structural(&self) -> u64 {
        self.structural
    }

    /// Advance both counters.
    pub fn bump_structural(&mut self) -> Bump {
        match (
            self.structural.checked_add(1),
            self.live_value.checked_add(1),
        ) {
            (Some(s), Some(l)) => {
                self.structural = s;
                self.live_value = l;
                Bump::Advanced
            }
            _ => self.wrap(),
        }
    }

    /// Advance only the live-value counter.
    pub fn bump_live_value(&mut self) -> Bump {
        match self.live_value.checked_add(1) {
            Some(l) => {
                self.live_value = l;
                Bump::Advanced
            }
            None => self.wrap(),
        }
    }

    /// Restart at `(1, 1)`. Used on project load/reload.
    pub const fn reset(&mut self) {
        self.structural = Self::START;
        self.live_value = Self::START;
    }

    fn wrap(&mut self) -> Bump {
        tracing::warn!(
            structural = self.structural,
            live_value = self.live_value,
            "revision counter overflow, restarting clock"
        );
        self.reset();
        Bump::Wrapped
    }
}
