//! Debounced schedulers: auto-save, derived export, deferred refresh.
//!
//! Each scheduler is a pending flag plus a due instant compared with `>=`
//! against a caller-supplied monotonic `now`. Cancelling clears the flag;
//! re-arming overwrites the due time. Nothing here spawns timers: the
//! workspace polls them from its tick.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::model::TableId;

/// A single pending/due pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Debounce {
    due: Option<Instant>,
}

impl Debounce {
    /// Set pending, due `window` after `now`.
    pub fn arm(&mut self, now: Instant, window: Duration) {
        self.due = Some(now + window);
    }

    pub fn cancel(&mut self) {
        self.due = None;
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.due.is_some()
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.due.is_some_and(|due| now >= due)
    }

    #[must_use]
    pub const fn due(&self) -> Option<Instant> {
        self.due
    }
}

// ---------------------------------------------------------------------------
// Auto-save
// ---------------------------------------------------------------------------

/// Coalesces bursts of committing edits into one save.
#[derive(Debug, Clone)]
pub struct AutoSaveScheduler {
    timer: Debounce,
    window: Duration,
    enabled: bool,
    in_flight: bool,
}

impl AutoSaveScheduler {
    #[must_use]
    pub fn new(enabled: bool, window: Duration) -> Self {
        Self {
            timer: Debounce::default(),
            window,
            enabled,
            in_flight: false,
        }
    }

    /// A committing edit happened. Arms only when enabled and the project
    /// has somewhere to be saved.
    pub fn note_edit(&mut self, now: Instant, has_path: bool) {
        if self.enabled && has_path {
            self.timer.arm(now, self.window);
        }
    }

    /// Due and no save currently in flight.
    #[must_use]
    pub fn should_fire(&self, now: Instant) -> bool {
        !self.in_flight && self.timer.is_due(now)
    }

    /// A save was issued.
    pub fn begin(&mut self) {
        self.timer.cancel();
        self.in_flight = true;
    }

    /// The in-flight save answered. A failure re-arms so a later cycle retries.
    pub fn finish(&mut self, ok: bool, now: Instant) {
        self.in_flight = false;
        if !ok && self.enabled {
            self.timer.arm(now, self.window);
        }
    }

    /// Forget any pending save (explicit save, project reset).
    pub fn cancel(&mut self) {
        self.timer.cancel();
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }

    #[must_use]
    pub const fn in_flight(&self) -> bool {
        self.in_flight
    }
}

// ---------------------------------------------------------------------------
// Derived export
// ---------------------------------------------------------------------------

/// Derived export with retry backoff.
///
/// After a failure the export stays pending, re-armed with the longer retry
/// window, until an export at a revision at or above the failed one
/// succeeds.
#[derive(Debug, Clone)]
pub struct ExportScheduler {
    timer: Debounce,
    window: Duration,
    retry: Duration,
    enabled: bool,
    in_flight: bool,
    failed_revision: Option<u64>,
}

impl ExportScheduler {
    #[must_use]
    pub fn new(enabled: bool, window: Duration, retry: Duration) -> Self {
        Self {
            timer: Debounce::default(),
            window,
            retry,
            enabled,
            in_flight: false,
            failed_revision: None,
        }
    }

    /// An edit affecting exported state happened.
    pub fn note_edit(&mut self, now: Instant) {
        if self.enabled {
            self.timer.arm(now, self.window);
        }
    }

    /// Export as soon as possible (after save or load).
    pub fn request_immediate(&mut self, now: Instant) {
        if self.enabled {
            self.timer.arm(now, Duration::ZERO);
        }
    }

    #[must_use]
    pub fn should_fire(&self, now: Instant) -> bool {
        !self.in_flight && self.timer.is_due(now)
    }

    pub fn begin(&mut self) {
        self.timer.cancel();
        self.in_flight = true;
    }

    /// The in-flight export for `revision` answered.
    pub fn finish(&mut self, revision: u64, ok: bool, now: Instant) {
        self.in_flight = false;
        if ok {
            if self.failed_revision.is_some_and(|failed| revision >= failed) {
                self.failed_revision = None;
            }
            return;
        }
        self.failed_revision = Some(self.failed_revision.map_or(revision, |f| f.max(revision)));
        self.timer.arm(now, self.retry);
        tracing::warn!(revision, retry_ms = self.retry.as_millis(), "export failed, retrying");
    }

    pub fn cancel(&mut self) {
        self.timer.cancel();
        self.failed_revision = None;
    }

    /// Export still owed: armed, in flight, or a failure not yet superseded.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.timer.is_pending() || self.in_flight || self.failed_revision.is_some()
    }

    #[must_use]
    pub const fn failed_revision(&self) -> Option<u64> {
        self.failed_revision
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// ---------------------------------------------------------------------------
// Deferred refresh
// ---------------------------------------------------------------------------

/// Batches non-interactive formula refreshes behind a short delay so a drag
/// gesture recomputes them once instead of every frame.
#[derive(Debug, Clone)]
pub struct DeferredRefreshScheduler {
    timer: Debounce,
    delay: Duration,
    tables: BTreeSet<TableId>,
}

impl DeferredRefreshScheduler {
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            timer: Debounce { due: None },
            delay,
            tables: BTreeSet::new(),
        }
    }

    /// Add `tables` to the batch and push the due time out.
    pub fn schedule(&mut self, tables: impl IntoIterator<Item = TableId>, now: Instant) {
        self.tables.extend(tables);
        if !self.tables.is_empty() {
            self.timer.arm(now, self.delay);
        }
    }

    /// The batched tables, if the delay has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<BTreeSet<TableId>> {
        if !self.timer.is_due(now) {
            return None;
        }
        self.timer.cancel();
        Some(std::mem::take(&mut self.tables))
    }

    pub fn cancel(&mut self) {
        self.timer.cancel();
        self.tables.clear();
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }
}
