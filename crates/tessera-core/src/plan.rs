//! Recalculation planner: from a command batch to a [`RefreshPlan`].
//!
//! The planner decides how much formula recomputation a batch needs. It is
//! a pure function of the batch and a read-only snapshot of the project
//! *after* the batch was applied (so newly added formulas and names are
//! visible to it).
//!
//! # Modes
//!
//! Modes are totally ordered, `None < Incremental < StructuralIncremental
//! < Full`. A plan is built by folding every command through
//! [`RefreshPlan::promote`], so within a batch the mode only ever rises.
//!
//! | Command | Mode | Dirty set |
//! |---|---|---|
//! | value edit (cell, table variable value) | `Incremental` | owning table |
//! | cell's own formula changed | `StructuralIncremental` | owning table |
//! | row add/remove/move, variable add/remove/rename/retype | `Incremental` + index refresh | owning table |
//! | column formula, column kind, rename/remove/move column, table rename/remove, schema link, inheritance, derived config, relation retarget | `StructuralIncremental` | owning table + every formula table/document |
//! | added column/table whose name formulas already mention | `StructuralIncremental` | owning table + every formula table/document |
//! | variable block edit | `Incremental` (text) / `StructuralIncremental` (kind) | owning document |
//! | project replacement | `Full` (short-circuits) | - |
//! | anything else | `Full` if its impact requires recalculation, else `None` | - |
//!
//! A `StructuralIncremental` plan never has an empty dirty set: if nothing
//! was marked, every table and document with formula artifacts is added.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::command::{Command, ImpactFlags};
use crate::model::{ColumnKind, DocumentId, Project, TableId};

/// How much recomputation a plan requires.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    #[default]
    None,
    Incremental,
    StructuralIncremental,
    Full,
}

impl fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Incremental => "incremental",
            Self::StructuralIncremental => "structural_incremental",
            Self::Full => "full",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RefreshPlan {
    pub mode: RefreshMode,
    pub dirty_tables: BTreeSet<TableId>,
    pub dirty_documents: BTreeSet<DocumentId>,
    /// Row/variable indexes of dirty tables must be rebuilt.
    pub refresh_dirty_table_indexes: bool,
    /// Only interactive-scope formula columns should be recomputed.
    #[serde(default)]
    pub interactive_only: bool,
}

impl RefreshPlan {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn full() -> Self {
        Self {
            mode: RefreshMode::Full,
            ..Self::default()
        }
    }

    /// Incremental refresh of `tables`, used for preview and deferred refreshes.
    #[must_use]
    pub fn incremental(tables: impl IntoIterator<Item = TableId>, interactive_only: bool) -> Self {
        Self {
            mode: RefreshMode::Incremental,
            dirty_tables: tables.into_iter().collect(),
            interactive_only,
            ..Self::default()
        }
    }

    /// Raise the mode to at least `mode`. Never lowers it.
    pub fn promote(&mut self, mode: RefreshMode) {
        if mode > self.mode {
            self.mode = mode;
        }
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self.mode, RefreshMode::None)
    }

    #[must_use]
    pub fn has_dirty(&self) -> bool {
        !self.dirty_tables.is_empty() || !self.dirty_documents.is_empty()
    }

    /// Fold `other` into `self`, keeping the higher mode and both dirty sets.
    pub fn merge(&mut self, other: &Self) {
        self.promote(other.mode);
        self.dirty_tables.extend(other.dirty_tables.iter().copied());
        self.dirty_documents
            .extend(other.dirty_documents.iter().copied());
        self.refresh_dirty_table_indexes |= other.refresh_dirty_table_indexes;
        self.interactive_only &= other.interactive_only;
    }

    fn mark_table(&mut self, table: TableId) {
        self.dirty_tables.insert(table);
    }

    fn mark_document(&mut self, document: DocumentId) {
        self.dirty_documents.insert(document);
    }

    /// Mark every table/document that holds formula artifacts.
    fn widen(&mut self, project: &Project) {
        if !project.has_formula_artifacts() {
            return;
        }
        self.dirty_tables.extend(project.formula_tables());
        self.dirty_documents.extend(project.formula_documents());
    }
}

/// Whether analysis of the batch can stop early.
enum Flow {
    Continue,
    ShortCircuit,
}

/// Build the refresh plan for `commands` against the post-apply `project`.
#[must_use]
pub fn plan_batch(commands: &[Command], project: &Project) -> RefreshPlan {
    let mut plan = RefreshPlan::none();
    for command in commands {
        if let Flow::ShortCircuit = classify(command, project, &mut plan) {
            tracing::debug!(command = %command, "full refresh, skipping remaining analysis");
            return plan;
        }
    }

    // Removed tables have nothing left to refresh.
    plan.dirty_tables.retain(|id| project.table(*id).is_some());
    if plan.mode == RefreshMode::StructuralIncremental && !plan.has_dirty() {
        plan.widen(project);
    }

    tracing::debug!(
        mode = %plan.mode,
        tables = plan.dirty_tables.len(),
        documents = plan.dirty_documents.len(),
        indexes = plan.refresh_dirty_table_indexes,
        "planned refresh"
    );
    plan
}

#[allow(clippy::too_many_lines)]
fn classify(command: &Command, project: &Project, plan: &mut RefreshPlan) -> Flow {
    use RefreshMode::{Full, Incremental, StructuralIncremental};

    match command {
        Command::SetCell {
            table,
            before,
            after,
            ..
        } => {
            let own_formula_changed = before.formula != after.formula;
            plan.promote(if own_formula_changed {
                StructuralIncremental
            } else {
                Incremental
            });
            plan.mark_table(*table);
        }
        Command::SetVariableValue { table, .. } => {
            plan.promote(Incremental);
            plan.mark_table(*table);
        }
        Command::AddRow { table, .. }
        | Command::RemoveRow { table, .. }
        | Command::MoveRow { table, .. }
        | Command::AddVariable { table, .. }
        | Command::RemoveVariable { table, .. }
        | Command::RenameVariable { table, .. }
        | Command::RetypeVariable { table, .. } => {
            plan.promote(Incremental);
            plan.mark_table(*table);
            plan.refresh_dirty_table_indexes = true;
        }
        Command::SetColumnFormula {
            table,
            before,
            after,
            ..
        } => {
            if before != after {
                schema_change(plan, project, *table);
            }
        }
        Command::SetRelation {
            table,
            before,
            after,
            ..
        } => {
            if before.resolves_differently(after) {
                schema_change(plan, project, *table);
            }
        }
        Command::SetColumnKind { table, .. }
        | Command::RenameColumn { table, .. }
        | Command::RemoveColumn { table, .. }
        | Command::MoveColumn { table, .. }
        | Command::RenameTable { table, .. }
        | Command::SetSchemaLink { table, .. }
        | Command::SetInheritance { table, .. }
        | Command::SetDerivedConfig { table, .. } => schema_change(plan, project, *table),
        Command::RemoveTable { table, .. } => schema_change(plan, project, table.id),
        Command::AddColumn { table, column, .. } => {
            if name_binding_affected(project, &column.name, NameScope::Column(*table)) {
                schema_change(plan, project, *table);
            } else if matches!(column.kind, ColumnKind::Formula { .. }) {
                plan.promote(StructuralIncremental);
                plan.mark_table(*table);
            } else {
                plan.promote(Incremental);
                plan.mark_table(*table);
            }
        }
        Command::AddTable { table, .. } => {
            if name_binding_affected(project, &table.name, NameScope::Table) {
                schema_change(plan, project, table.id);
            } else if table.has_formula_artifacts() {
                plan.promote(StructuralIncremental);
                plan.mark_table(table.id);
            }
        }
        Command::EditBlock {
            document,
            before,
            after,
        } => {
            if before.is_variable() != after.is_variable() {
                plan.promote(StructuralIncremental);
                plan.mark_document(*document);
            } else if after.is_variable() && before.text != after.text {
                plan.promote(Incremental);
                plan.mark_document(*document);
            }
        }
        Command::AddBlock {
            document, block, ..
        }
        | Command::RemoveBlock {
            document, block, ..
        } => {
            if block.is_variable() {
                plan.promote(StructuralIncremental);
                plan.mark_document(*document);
            }
        }
        Command::ReplaceProject { .. } => {
            plan.promote(Full);
            return Flow::ShortCircuit;
        }
        Command::SetVariantCell { .. }
        | Command::AddVariantRow { .. }
        | Command::RemoveAddedVariantRow { .. }
        | Command::RemoveVariantRow { .. }
        | Command::RestoreVariantRow { .. }
        | Command::SetViewConfig { .. } => {
            if command.impact().contains(ImpactFlags::REQUIRES_RECALC) {
                plan.promote(Full);
                return Flow::ShortCircuit;
            }
        }
    }
    Flow::Continue
}

/// Schema-affecting change: structural, owning table plus every formula artifact.
fn schema_change(plan: &mut RefreshPlan, project: &Project, table: TableId) {
    plan.promote(RefreshMode::StructuralIncremental);
    plan.mark_table(table);
    plan.widen(project);
}

#[derive(Clone, Copy)]
enum NameScope {
    Column(TableId),
    Table,
}

/// Whether adding an item called `name` can change what a formula binds to.
///
/// Formulas bind names first-match in declaration order. If `name` already
/// belongs to another item that formulas address, the new item either
/// shadows it or sits behind it; either way resolution must be redone. A
/// name that formulas mention but nothing declared before is also affected,
/// since a previously dangling reference now resolves.
fn name_binding_affected(project: &Project, name: &str, scope: NameScope) -> bool {
    if !project.formulas_mention(name) {
        return false;
    }
    let same_named = match scope {
        NameScope::Column(table) => project
            .table(table)
            .map_or(0, |t| t.columns.iter().filter(|c| c.name == name).count()),
        NameScope::Table => project.tables.iter().filter(|t| t.name == name).count(),
    };
    if same_named > 1 {
        tracing::debug!(name, "added item collides with a first-bound name");
    }
    true
}
