//! The interactive workspace: one project, its clock, caches and workers.
//!
//! [`Workspace`] is the explicit context object a host drives. Every
//! committing edit flows through the same pipeline:
//!
//! ```text
//! execute_batch ─▶ apply + record ─▶ plan ─▶ bump clock ─▶ evaluate
//!                                                  │
//!                  mirror (Execute/Undo/Redo) ◀────┘ ─▶ arm autosave/export
//! ```
//!
//! Preview edits (a numeric drag before release) bypass history and the
//! mirror. They bump only the live-value revision and evaluate the
//! interactive formula scope; non-interactive formulas are refreshed by the
//! deferred scheduler once the gesture settles. Previews are folded into
//! one history entry by [`Workspace::commit_previews`], which also runs
//! automatically before the next committing edit.
//!
//! Nothing here blocks on I/O except [`Workspace::save_now`] and
//! [`Workspace::export_now`]. Background results are picked up by
//! [`Workspace::tick`], which the host calls from its event loop.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::cache::{
    BindingKey, BindingResult, CacheSet, ResolvedView, VariantSnapshot, ViewKey, resolve_view,
    row_order,
};
use crate::clock::{Bump, Revision, RevisionClock};
use crate::command::{ApplyError, Command, ImpactFlags};
use crate::config::{ConfigLoadFailed, WorkspaceConfig, load_workspace_config};
use crate::error::ErrorCode;
use crate::eval::{EvaluationService, NullEvaluator};
use crate::history::History;
use crate::metrics::Metrics;
use crate::model::{Cell, CellValue, ColumnId, Project, RowId, Table, TableId, VariantId};
use crate::persist::{
    ExportOptions, ExportPipeline, ExportRequest, ExportResult, JsonExportPipeline,
    JsonProjectSerializer, Pending, PersistenceActor, Poll, ProjectSerializer, SaveRequest,
    SaveResult, SerializeError,
};
use crate::plan::{RefreshPlan, plan_batch};
use crate::schedule::{AutoSaveScheduler, DeferredRefreshScheduler, ExportScheduler};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error("project has no save path")]
    NoPath,

    #[error("persistence worker stopped without answering")]
    WorkerLost,

    #[error("failed to start persistence worker: {0}")]
    Spawn(#[from] io::Error),
}

impl WorkspaceError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Apply(err) => err.code(),
            Self::Serialize(err) => err.code(),
            Self::NoPath => ErrorCode::ProjectSaveFailed,
            Self::WorkerLost => ErrorCode::WorkerClosed,
            Self::Spawn(_) => ErrorCode::InternalUnexpected,
        }
    }
}

/// What one [`Workspace::tick`] observed and started.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub saved: Option<SaveResult>,
    pub exported: Option<ExportResult>,
    /// Deferred refresh that ran this tick.
    pub refreshed: Option<RefreshPlan>,
    pub save_issued: bool,
    pub export_issued: bool,
}

/// How the mirror replays a committed batch.
#[derive(Clone, Copy)]
enum Replay {
    Execute,
    Undo,
    Redo,
}

type PreviewKey = (TableId, RowId, ColumnId);

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct WorkspaceBuilder {
    project: Project,
    path: Option<PathBuf>,
    root: Option<PathBuf>,
    config: WorkspaceConfig,
    evaluator: Box<dyn EvaluationService>,
    loader: Box<dyn ProjectSerializer>,
    saver: Box<dyn ProjectSerializer>,
    exporter: Box<dyn ExportPipeline>,
}

impl WorkspaceBuilder {
    /// Where the project is saved. Also the default config root.
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Directory that relative export paths resolve against.
    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    #[must_use]
    pub fn config(mut self, config: WorkspaceConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn evaluator(mut self, evaluator: impl EvaluationService + 'static) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    /// Serializer used both for loading and (on the worker) for saving.
    #[must_use]
    pub fn serializer<S>(mut self, serializer: S) -> Self
    where
        S: ProjectSerializer + Clone + 'static,
    {
        self.saver = Box::new(serializer.clone());
        self.loader = Box::new(serializer);
        self
    }

    #[must_use]
    pub fn exporter(mut self, exporter: impl ExportPipeline + 'static) -> Self {
        self.exporter = Box::new(exporter);
        self
    }

    /// Spawn the persistence worker and run the initial full evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Spawn`] if the worker thread cannot start.
    pub fn build(self) -> Result<Workspace, WorkspaceError> {
        let root = self
            .root
            .unwrap_or_else(|| project_root(self.path.as_deref()));
        let actor = PersistenceActor::spawn(self.project.deep_copy(), self.saver, self.exporter)?;
        let config = self.config;

        let mut workspace = Workspace {
            project: self.project,
            path: self.path,
            root,
            history: History::new(),
            clock: RevisionClock::new(),
            caches: CacheSet::new(),
            evaluator: self.evaluator,
            loader: self.loader,
            actor,
            autosave: AutoSaveScheduler::new(config.autosave.enabled, config.autosave.debounce()),
            export: ExportScheduler::new(
                config.export.enabled,
                config.export.debounce(),
                config.export.retry(),
            ),
            deferred: DeferredRefreshScheduler::new(config.refresh.deferred_delay()),
            config,
            pending_save: None,
            pending_export: None,
            previews: BTreeMap::new(),
            dirty: false,
            last_compute_error: None,
            last_plan: RefreshPlan::none(),
            metrics: Metrics::new(),
        };
        workspace.refresh(RefreshPlan::full());
        workspace.export.request_immediate(Instant::now());
        info!(
            tables = workspace.project.tables.len(),
            documents = workspace.project.documents.len(),
            path = ?workspace.path,
            "workspace opened"
        );
        Ok(workspace)
    }
}

fn project_root(path: Option<&Path>) -> PathBuf {
    path.and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

pub struct Workspace {
    project: Project,
    path: Option<PathBuf>,
    root: PathBuf,
    config: WorkspaceConfig,
    history: History,
    clock: RevisionClock,
    caches: CacheSet,
    evaluator: Box<dyn EvaluationService>,
    loader: Box<dyn ProjectSerializer>,
    actor: PersistenceActor,
    autosave: AutoSaveScheduler,
    export: ExportScheduler,
    deferred: DeferredRefreshScheduler,
    pending_save: Option<Pending<SaveResult>>,
    pending_export: Option<Pending<ExportResult>>,
    /// Cells edited by preview, with their value before the first preview.
    previews: BTreeMap<PreviewKey, Cell>,
    dirty: bool,
    last_compute_error: Option<String>,
    last_plan: RefreshPlan,
    metrics: Metrics,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("path", &self.path)
            .field("revision", &self.clock.current())
            .field("dirty", &self.dirty)
            .field("history", &self.history.position())
            .field("previews", &self.previews.len())
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Builder with the JSON serializer, JSON exporter, no formula engine
    /// and default config.
    #[must_use]
    pub fn builder(project: Project) -> WorkspaceBuilder {
        WorkspaceBuilder {
            project,
            path: None,
            root: None,
            config: WorkspaceConfig::default(),
            evaluator: Box::new(NullEvaluator),
            loader: Box::new(JsonProjectSerializer::default()),
            saver: Box::new(JsonProjectSerializer::default()),
            exporter: Box::new(JsonExportPipeline),
        }
    }

    /// Unsaved workspace around `project`.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence worker cannot start.
    pub fn new(project: Project) -> Result<Self, WorkspaceError> {
        Self::builder(project).build()
    }

    /// Load the project file at `path` together with its workspace config.
    ///
    /// # Errors
    ///
    /// Returns an error if the config or project file cannot be read, or the
    /// persistence worker cannot start.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let root = project_root(Some(path));
        let config = load_workspace_config(&root).with_context(|| ConfigLoadFailed {
            project: path.to_path_buf(),
        })?;
        let project = JsonProjectSerializer::default().load(path)?;
        Ok(Self::builder(project)
            .path(path)
            .root(root)
            .config(config)
            .build()?)
    }

    // -----------------------------------------------------------------------
    // Committing edits
    // -----------------------------------------------------------------------

    /// Execute one command as its own history entry.
    ///
    /// # Errors
    ///
    /// See [`execute_batch`](Self::execute_batch).
    pub fn execute(&mut self, command: Command) -> Result<RefreshPlan, ApplyError> {
        self.execute_batch(vec![command])
    }

    /// Apply `commands` atomically as one history entry, plan and run the
    /// refresh, and forward the batch to the mirror.
    ///
    /// Pending previews are committed first, as their own entry.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if any command fails to apply. Nothing changes
    /// in that case: no history entry, no revision bump, no mirror message.
    /// A failing evaluation is not an error here; it is recorded in
    /// [`last_compute_error`](Self::last_compute_error).
    pub fn execute_batch(&mut self, commands: Vec<Command>) -> Result<RefreshPlan, ApplyError> {
        self.commit_previews()?;
        if commands.is_empty() {
            return Ok(RefreshPlan::none());
        }
        self.history.execute(&mut self.project, commands.clone())?;
        Ok(self.commit(commands, Replay::Execute))
    }

    /// Undo the latest history entry. `Ok(None)` when there is nothing to undo.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the inverse no longer applies.
    pub fn undo(&mut self) -> Result<Option<RefreshPlan>, ApplyError> {
        self.commit_previews()?;
        let Some(applied) = self.history.undo(&mut self.project)? else {
            return Ok(None);
        };
        Ok(Some(self.commit(applied, Replay::Undo)))
    }

    /// Redo the latest undone entry. `Ok(None)` when there is nothing to redo.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the batch no longer applies.
    pub fn redo(&mut self) -> Result<Option<RefreshPlan>, ApplyError> {
        self.commit_previews()?;
        let Some(applied) = self.history.redo(&mut self.project)? else {
            return Ok(None);
        };
        Ok(Some(self.commit(applied, Replay::Redo)))
    }

    fn commit(&mut self, applied: Vec<Command>, replay: Replay) -> RefreshPlan {
        let started = Instant::now();
        let plan = plan_batch(&applied, &self.project);
        self.metrics.record("plan", started.elapsed());

        if applied
            .iter()
            .any(|c| matches!(c, Command::ReplaceProject { .. }))
        {
            self.caches.clear();
        }
        self.bump_structural();
        self.refresh(plan.clone());

        let affects_export = applied
            .iter()
            .any(|c| c.impact().contains(ImpactFlags::AFFECTS_EXPORT));
        debug!(
            commands = applied.len(),
            revision = %self.clock.current(),
            mode = %plan.mode,
            "committed batch"
        );
        match replay {
            Replay::Execute => self.actor.execute(applied),
            Replay::Undo => self.actor.undo(),
            Replay::Redo => self.actor.redo(),
        }

        self.dirty = true;
        let now = Instant::now();
        self.autosave.note_edit(now, self.path.is_some());
        if affects_export {
            self.export.note_edit(now);
        }
        plan
    }

    // -----------------------------------------------------------------------
    // Previews
    // -----------------------------------------------------------------------

    /// Show `value` in a cell without recording history.
    ///
    /// Only the live-value revision advances and only interactive formulas
    /// of the table are recomputed now. Other formulas of the table are
    /// batched behind the deferred refresh delay.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the table, row or column does not exist.
    pub fn preview_cell_value(
        &mut self,
        table: TableId,
        row: RowId,
        column: ColumnId,
        value: CellValue,
    ) -> Result<RefreshPlan, ApplyError> {
        let command = Command::set_cell_value(&self.project, table, row, column, value)?;
        command.apply(&mut self.project)?;
        if let Command::SetCell { before, .. } = command {
            self.previews.entry((table, row, column)).or_insert(before);
        }

        self.bump_live_value();
        let plan = RefreshPlan::incremental([table], true);
        self.refresh(plan.clone());
        if self
            .project
            .table(table)
            .is_some_and(Table::has_deferred_formulas)
        {
            self.deferred.schedule([table], Instant::now());
        }
        Ok(plan)
    }

    /// Record every previewed cell as one history entry and replay it on the
    /// mirror. No-op without previews.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the resulting batch fails to apply.
    pub fn commit_previews(&mut self) -> Result<RefreshPlan, ApplyError> {
        if self.previews.is_empty() {
            return Ok(RefreshPlan::none());
        }
        let mut batch = Vec::with_capacity(self.previews.len());
        for ((table, row, column), original) in std::mem::take(&mut self.previews) {
            // Put the original back so the batch applies from the state the
            // mirror and history know about.
            let restore = Command::set_cell(&self.project, table, row, column, original)?;
            restore.apply(&mut self.project)?;
            let edit = restore.inverse();
            if let Command::SetCell { before, after, .. } = &edit
                && before != after
            {
                batch.push(edit);
            }
        }
        debug!(cells = batch.len(), "committing previews");
        if batch.is_empty() {
            return Ok(RefreshPlan::none());
        }
        self.history.execute(&mut self.project, batch.clone())?;
        Ok(self.commit(batch, Replay::Execute))
    }

    /// Put every previewed cell back to its value before the preview.
    pub fn cancel_previews(&mut self) -> RefreshPlan {
        if self.previews.is_empty() {
            return RefreshPlan::none();
        }
        let previews = std::mem::take(&mut self.previews);
        let tables: Vec<TableId> = previews.keys().map(|(table, _, _)| *table).collect();
        for ((table, row, column), original) in previews {
            let restored = Command::set_cell(&self.project, table, row, column, original)
                .and_then(|restore| restore.apply(&mut self.project));
            if let Err(err) = restored {
                warn!(%table, %row, %column, error = %err, "preview cell vanished before cancel");
            }
        }
        self.bump_live_value();
        let plan = RefreshPlan::incremental(tables, false);
        self.refresh(plan.clone());
        plan
    }

    #[must_use]
    pub fn has_previews(&self) -> bool {
        !self.previews.is_empty()
    }

    // -----------------------------------------------------------------------
    // Background work
    // -----------------------------------------------------------------------

    /// Collect finished background results, run a due deferred refresh and
    /// fire due auto-save and export timers.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();

        if let Some(pending) = self.pending_save.take() {
            match pending.poll() {
                Poll::Waiting => self.pending_save = Some(pending),
                Poll::Ready(result) => {
                    self.finish_save(&result, now);
                    report.saved = Some(result);
                }
                Poll::Lost => self.lost_save(now),
            }
        }
        if let Some(pending) = self.pending_export.take() {
            match pending.poll() {
                Poll::Waiting => self.pending_export = Some(pending),
                Poll::Ready(result) => {
                    self.finish_export(&result, now);
                    report.exported = Some(result);
                }
                Poll::Lost => self.lost_export(now),
            }
        }

        if let Some(tables) = self.deferred.take_due(now) {
            self.bump_live_value();
            let plan = RefreshPlan::incremental(tables, false);
            self.refresh(plan.clone());
            report.refreshed = Some(plan);
        }

        if self.pending_save.is_none() && self.autosave.should_fire(now) {
            report.save_issued = self.issue_save();
        }
        if self.pending_export.is_none() && self.export.should_fire(now) {
            self.issue_export(self.export_options());
            report.export_issued = true;
        }
        report
    }

    /// Save immediately and wait for the result.
    ///
    /// Any in-flight save or export is awaited first. A failed save is
    /// returned as `Ok` with `ok == false`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::NoPath`] if the project has no save path,
    /// or [`WorkspaceError::WorkerLost`] if the worker died.
    pub fn save_now(&mut self) -> Result<SaveResult, WorkspaceError> {
        if self.path.is_none() {
            return Err(WorkspaceError::NoPath);
        }
        self.flush();
        self.issue_save();
        let Some(result) = self.pending_save.take().and_then(Pending::wait) else {
            self.lost_save(Instant::now());
            return Err(WorkspaceError::WorkerLost);
        };
        self.finish_save(&result, Instant::now());
        Ok(result)
    }

    /// Export immediately and wait for the result. `options` default to
    /// the configured outputs.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::WorkerLost`] if the worker died.
    pub fn export_now(
        &mut self,
        options: Option<ExportOptions>,
    ) -> Result<ExportResult, WorkspaceError> {
        self.flush();
        self.issue_export(options.unwrap_or_else(|| self.export_options()));
        let Some(result) = self.pending_export.take().and_then(Pending::wait) else {
            self.lost_export(Instant::now());
            return Err(WorkspaceError::WorkerLost);
        };
        self.finish_export(&result, Instant::now());
        Ok(result)
    }

    /// Ask for an export on the next tick (when export is enabled).
    pub fn request_export(&mut self) {
        self.export.request_immediate(Instant::now());
    }

    /// Wait for whatever save and export are in flight.
    pub fn flush(&mut self) {
        if let Some(pending) = self.pending_save.take() {
            let now = Instant::now();
            match pending.wait() {
                Some(result) => self.finish_save(&result, now),
                None => self.lost_save(now),
            }
        }
        if let Some(pending) = self.pending_export.take() {
            let now = Instant::now();
            match pending.wait() {
                Some(result) => self.finish_export(&result, now),
                None => self.lost_export(now),
            }
        }
    }

    fn issue_save(&mut self) -> bool {
        let Some(path) = self.path.clone() else {
            self.autosave.cancel();
            return false;
        };
        self.autosave.begin();
        self.pending_save = Some(self.actor.save(SaveRequest {
            path,
            revision: self.clock.structural(),
        }));
        true
    }

    fn issue_export(&mut self, options: ExportOptions) {
        self.export.begin();
        self.pending_export = Some(self.actor.export(ExportRequest {
            options,
            revision: self.clock.structural(),
        }));
    }

    fn finish_save(&mut self, result: &SaveResult, now: Instant) {
        self.metrics.record("save", result.elapsed);
        self.autosave.finish(result.ok, now);
        if result.ok {
            self.metrics.counters.saves_ok += 1;
            if result.revision == self.clock.structural() {
                self.dirty = false;
            }
            self.export.request_immediate(now);
            return;
        }
        self.metrics.counters.saves_failed += 1;
        self.dirty = true;
        warn!(error = ?result.error, revision = result.revision, "save failed");
        if result.mirror_diverged {
            self.reset_mirror();
        }
    }

    /// Replace the mirror with the committed state of the primary project.
    fn reset_mirror(&self) {
        warn!("resetting persistence mirror from the interactive project");
        let mut committed = self.project.deep_copy();
        for (&(table, row, column), original) in &self.previews {
            let restored = Command::set_cell(&committed, table, row, column, original.clone())
                .and_then(|restore| restore.apply(&mut committed));
            if let Err(err) = restored {
                warn!(%table, %row, %column, error = %err, "preview cell vanished before reset");
            }
        }
        self.actor
            .reset(committed, self.history.clone(), self.dirty);
    }

    fn lost_save(&mut self, now: Instant) {
        error!("persistence worker dropped a save request");
        self.metrics.counters.saves_failed += 1;
        self.autosave.finish(false, now);
        self.dirty = true;
    }

    fn finish_export(&mut self, result: &ExportResult, now: Instant) {
        self.metrics.record("export", result.elapsed);
        let ok = result.ok && !result.has_errors;
        if ok {
            self.metrics.counters.exports_ok += 1;
        } else {
            self.metrics.counters.exports_failed += 1;
        }
        self.export.finish(result.revision, ok, now);
        if result.mirror_diverged {
            warn!(revision = result.revision, "export refused by a diverged mirror");
            self.reset_mirror();
        }
    }

    fn lost_export(&mut self, now: Instant) {
        error!("persistence worker dropped an export request");
        self.metrics.counters.exports_failed += 1;
        self.export.finish(self.clock.structural(), false, now);
    }

    fn export_options(&self) -> ExportOptions {
        self.config.export.options(&self.root)
    }

    // -----------------------------------------------------------------------
    // Load / reload
    // -----------------------------------------------------------------------

    /// Replace the project wholesale (external change on disk, revert).
    ///
    /// Not undoable: history is cleared, the clock restarts at `(1, 1)`,
    /// every cache is dropped and the mirror is reset.
    pub fn reload(&mut self, project: Project) {
        self.flush();
        self.project = project;
        self.history.clear();
        self.clock.reset();
        self.caches.clear();
        self.previews.clear();
        self.deferred.cancel();
        self.autosave.cancel();
        self.export.cancel();
        self.actor
            .reset(self.project.deep_copy(), History::new(), false);
        self.dirty = false;
        self.refresh(RefreshPlan::full());
        self.export.request_immediate(Instant::now());
        info!(tables = self.project.tables.len(), "project reloaded");
    }

    /// Load the project at `path` and make it the save path.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Serialize`] if the file cannot be loaded;
    /// the current project is kept in that case.
    pub fn load(&mut self, path: impl Into<PathBuf>) -> Result<(), WorkspaceError> {
        let path = path.into();
        let project = self.loader.load(&path)?;
        self.path = Some(path);
        self.reload(project);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cached reads
    // -----------------------------------------------------------------------

    /// Columns, sort and filter of a view (or the default view when the
    /// selector is `None`). `None` if the table or view does not exist.
    pub fn resolved_view(&mut self, key: ViewKey) -> Option<Arc<ResolvedView>> {
        let table = self.project.table(key.table)?;
        let view = match key.selector {
            Some(id) => Some(table.view(id)?),
            None => None,
        };
        let current = self.clock.current();
        Some(
            self.caches
                .resolved_view
                .get_or_compute(key, current, || resolve_view(table, view)),
        )
    }

    /// Visible row ids of a view, in display order.
    pub fn row_order(&mut self, key: ViewKey) -> Option<Arc<Vec<RowId>>> {
        let resolved = self.resolved_view(key)?;
        let table = self.project.table(key.table)?;
        let current = self.clock.current();
        Some(
            self.caches
                .row_order
                .get_or_compute(key, current, || row_order(table, &resolved)),
        )
    }

    /// Result of a bound expression. Failures are cached like values.
    pub fn binding(&mut self, key: BindingKey, expression: &str) -> Arc<BindingResult> {
        let current = self.clock.current();
        let Self {
            caches,
            evaluator,
            project,
            ..
        } = self;
        caches.binding.get_or_compute(key, current, || {
            evaluator.evaluate_expression(project, key.table, expression)
        })
    }

    /// Materialized rows of a table variant. Rebuilt only when the
    /// structural revision moves.
    pub fn variant_snapshot(
        &mut self,
        table: TableId,
        variant: VariantId,
    ) -> Option<Arc<VariantSnapshot>> {
        let current = self.clock.current();
        let table = self.project.table(table)?;
        self.caches
            .variants
            .get_or_materialize(table, variant, current)
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    #[must_use]
    pub const fn project(&self) -> &Project {
        &self.project
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Set the save path (save-as). The next committing edit or
    /// [`save_now`](Self::save_now) writes there.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    #[must_use]
    pub const fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    #[must_use]
    pub const fn revision(&self) -> Revision {
        self.clock.current()
    }

    #[must_use]
    pub const fn history(&self) -> &History {
        &self.history
    }

    /// Committed edits not yet confirmed saved.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Message of the last failed evaluation, cleared by the next success.
    #[must_use]
    pub fn last_compute_error(&self) -> Option<&str> {
        self.last_compute_error.as_deref()
    }

    #[must_use]
    pub const fn last_plan(&self) -> &RefreshPlan {
        &self.last_plan
    }

    /// Whether a save or export is in flight, armed, or owed after a failure.
    #[must_use]
    pub const fn has_pending_work(&self) -> bool {
        self.pending_save.is_some()
            || self.pending_export.is_some()
            || self.autosave.is_pending()
            || self.export.is_pending()
            || self.deferred.is_pending()
    }

    /// Timings and counters, with cache statistics brought up to date.
    pub fn metrics(&mut self) -> &Metrics {
        let (hits, misses) = self.caches.stats();
        self.metrics.counters.cache_hits = hits;
        self.metrics.counters.cache_misses = misses;
        &self.metrics
    }

    /// Stop the persistence worker after it has drained every queued
    /// message. Dropping the workspace does the same.
    pub fn shutdown(mut self) {
        self.actor.shutdown();
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn bump_structural(&mut self) {
        if self.clock.bump_structural() == Bump::Wrapped {
            self.caches.invalidate_all();
        }
    }

    fn bump_live_value(&mut self) {
        if self.clock.bump_live_value() == Bump::Wrapped {
            self.caches.invalidate_all();
        }
    }

    fn refresh(&mut self, plan: RefreshPlan) {
        self.metrics.count_plan(plan.mode);
        if !plan.is_none() {
            let started = Instant::now();
            match self.evaluator.evaluate(&mut self.project, &plan) {
                Ok(eval) => {
                    self.last_compute_error = None;
                    self.metrics.last_eval = Some(eval);
                }
                Err(err) => {
                    warn!(mode = %plan.mode, error = %err, "evaluation failed");
                    self.metrics.counters.eval_failures += 1;
                    self.last_compute_error = Some(err.to_string());
                }
            }
            self.metrics.record("evaluate", started.elapsed());
        }
        self.last_plan = plan;
    }
}

#[cfg(test)]
impl Workspace {
    /// Position the clock directly, e.g. one bump short of overflow.
    fn set_clock(&mut self, clock: RevisionClock) {
        self.clock = clock;
    }
}
