//! Commands: the unit of mutation, undo and mirror replay.
//!
//! Every edit to a project is expressed as a [`Command`] carrying owned
//! before/after data. The same value is applied to the interactive project,
//! recorded in undo history, and sent (as an independent copy) to the
//! persistence worker, which replays it against its mirror.
//!
//! | Command | Inverse |
//! |---|---|
//! | `SetCell`, `Rename*`, `Set*` | same command with before/after swapped |
//! | `AddRow` / `AddColumn` / `AddTable` / ... | matching `Remove*` at the same index |
//! | `MoveRow` / `MoveColumn` | move back (`to` → `from`) |
//! | `RemoveVariantRow` / `RestoreVariantRow` | each other |
//! | `ReplaceProject` | replace with the previous snapshot |

mod apply;
mod build;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

use crate::model::{
    Block, Cell, CellValue, Column, ColumnId, ColumnKind, DerivedConfig, DocumentId, Project,
    RelationTarget, Row, RowId, Table, TableId, TableVariable, VariableKind, VariantId, View,
};

pub use apply::ApplyError;

// ---------------------------------------------------------------------------
// Impact metadata
// ---------------------------------------------------------------------------

/// Static impact flags for a command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImpactFlags(u8);

impl ImpactFlags {
    pub const NONE: Self = Self(0);
    /// Changes state that ends up in the derived export.
    pub const AFFECTS_EXPORT: Self = Self(1);
    /// Requires formula recalculation even when not classified precisely.
    pub const REQUIRES_RECALC: Self = Self(1 << 1);
    /// Changes what cached views display.
    pub const AFFECTS_VIEWS: Self = Self(1 << 2);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for ImpactFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// One undoable, replayable mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    SetCell {
        table: TableId,
        row: RowId,
        column: ColumnId,
        before: Cell,
        after: Cell,
    },
    AddRow {
        table: TableId,
        index: usize,
        row: Row,
    },
    RemoveRow {
        table: TableId,
        index: usize,
        row: Row,
    },
    MoveRow {
        table: TableId,
        from: usize,
        to: usize,
    },
    /// `cells` seeds the new column (used when undoing a removal).
    AddColumn {
        table: TableId,
        index: usize,
        column: Column,
        #[serde(default)]
        cells: Vec<(RowId, Cell)>,
    },
    /// `cells` holds the removed column's cells so undo can restore them.
    RemoveColumn {
        table: TableId,
        index: usize,
        column: Column,
        #[serde(default)]
        cells: Vec<(RowId, Cell)>,
    },
    RenameColumn {
        table: TableId,
        column: ColumnId,
        before: String,
        after: String,
    },
    MoveColumn {
        table: TableId,
        from: usize,
        to: usize,
    },
    SetColumnFormula {
        table: TableId,
        column: ColumnId,
        before: String,
        after: String,
    },
    SetColumnKind {
        table: TableId,
        column: ColumnId,
        before: ColumnKind,
        after: ColumnKind,
    },
    SetRelation {
        table: TableId,
        column: ColumnId,
        before: RelationTarget,
        after: RelationTarget,
    },
    AddTable {
        index: usize,
        table: Box<Table>,
    },
    RemoveTable {
        index: usize,
        table: Box<Table>,
    },
    RenameTable {
        table: TableId,
        before: String,
        after: String,
    },
    SetSchemaLink {
        table: TableId,
        before: Option<TableId>,
        after: Option<TableId>,
    },
    SetInheritance {
        table: TableId,
        before: Option<TableId>,
        after: Option<TableId>,
    },
    SetDerivedConfig {
        table: TableId,
        before: Option<DerivedConfig>,
        after: Option<DerivedConfig>,
    },
    AddVariable {
        table: TableId,
        index: usize,
        variable: TableVariable,
    },
    RemoveVariable {
        table: TableId,
        index: usize,
        variable: TableVariable,
    },
    RenameVariable {
        table: TableId,
        before: String,
        after: String,
    },
    RetypeVariable {
        table: TableId,
        name: String,
        before: VariableKind,
        after: VariableKind,
    },
    SetVariableValue {
        table: TableId,
        name: String,
        before: CellValue,
        after: CellValue,
    },
    EditBlock {
        document: DocumentId,
        before: Block,
        after: Block,
    },
    AddBlock {
        document: DocumentId,
        index: usize,
        block: Block,
    },
    RemoveBlock {
        document: DocumentId,
        index: usize,
        block: Block,
    },
    SetVariantCell {
        table: TableId,
        variant: VariantId,
        row: RowId,
        column: ColumnId,
        before: Option<CellValue>,
        after: Option<CellValue>,
    },
    AddVariantRow {
        table: TableId,
        variant: VariantId,
        index: usize,
        row: Row,
    },
    RemoveAddedVariantRow {
        table: TableId,
        variant: VariantId,
        index: usize,
        row: Row,
    },
    /// Hide a base row in a variant.
    RemoveVariantRow {
        table: TableId,
        variant: VariantId,
        row: RowId,
    },
    /// Un-hide a base row in a variant.
    RestoreVariantRow {
        table: TableId,
        variant: VariantId,
        row: RowId,
    },
    SetViewConfig {
        table: TableId,
        before: View,
        after: View,
    },
    /// Wholesale snapshot replacement (external reload, import).
    ReplaceProject {
        before: Box<Project>,
        after: Box<Project>,
    },
}

impl Command {
    /// Stable kind name for logging and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SetCell { .. } => "set_cell",
            Self::AddRow { .. } => "add_row",
            Self::RemoveRow { .. } => "remove_row",
            Self::MoveRow { .. } => "move_row",
            Self::AddColumn { .. } => "add_column",
            Self::RemoveColumn { .. } => "remove_column",
            Self::RenameColumn { .. } => "rename_column",
            Self::MoveColumn { .. } => "move_column",
            Self::SetColumnFormula { .. } => "set_column_formula",
            Self::SetColumnKind { .. } => "set_column_kind",
            Self::SetRelation { .. } => "set_relation",
            Self::AddTable { .. } => "add_table",
            Self::RemoveTable { .. } => "remove_table",
            Self::RenameTable { .. } => "rename_table",
            Self::SetSchemaLink { .. } => "set_schema_link",
            Self::SetInheritance { .. } => "set_inheritance",
            Self::SetDerivedConfig { .. } => "set_derived_config",
            Self::AddVariable { .. } => "add_variable",
            Self::RemoveVariable { .. } => "remove_variable",
            Self::RenameVariable { .. } => "rename_variable",
            Self::RetypeVariable { .. } => "retype_variable",
            Self::SetVariableValue { .. } => "set_variable_value",
            Self::EditBlock { .. } => "edit_block",
            Self::AddBlock { .. } => "add_block",
            Self::RemoveBlock { .. } => "remove_block",
            Self::SetVariantCell { .. } => "set_variant_cell",
            Self::AddVariantRow { .. } => "add_variant_row",
            Self::RemoveAddedVariantRow { .. } => "remove_added_variant_row",
            Self::RemoveVariantRow { .. } => "remove_variant_row",
            Self::RestoreVariantRow { .. } => "restore_variant_row",
            Self::SetViewConfig { .. } => "set_view_config",
            Self::ReplaceProject { .. } => "replace_project",
        }
    }

    /// Static impact metadata for this command kind.
    #[must_use]
    pub const fn impact(&self) -> ImpactFlags {
        const EXPORT: ImpactFlags = ImpactFlags::AFFECTS_EXPORT;
        const VIEWS: ImpactFlags = ImpactFlags::AFFECTS_VIEWS;
        const RECALC: ImpactFlags = ImpactFlags::REQUIRES_RECALC;

        match self {
            Self::SetViewConfig { .. } => VIEWS,
            Self::EditBlock { .. } | Self::AddBlock { .. } | Self::RemoveBlock { .. } => {
                ImpactFlags::NONE
            }
            Self::SetVariantCell { .. }
            | Self::AddVariantRow { .. }
            | Self::RemoveAddedVariantRow { .. }
            | Self::RemoveVariantRow { .. }
            | Self::RestoreVariantRow { .. } => EXPORT.union(VIEWS),
            _ => EXPORT.union(VIEWS).union(RECALC),
        }
    }

    /// Table touched by this command, if it targets exactly one table.
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        match self {
            Self::SetCell { table, .. }
            | Self::AddRow { table, .. }
            | Self::RemoveRow { table, .. }
            | Self::MoveRow { table, .. }
            | Self::AddColumn { table, .. }
            | Self::RemoveColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::MoveColumn { table, .. }
            | Self::SetColumnFormula { table, .. }
            | Self::SetColumnKind { table, .. }
            | Self::SetRelation { table, .. }
            | Self::RenameTable { table, .. }
            | Self::SetSchemaLink { table, .. }
            | Self::SetInheritance { table, .. }
            | Self::SetDerivedConfig { table, .. }
            | Self::AddVariable { table, .. }
            | Self::RemoveVariable { table, .. }
            | Self::RenameVariable { table, .. }
            | Self::RetypeVariable { table, .. }
            | Self::SetVariableValue { table, .. }
            | Self::SetVariantCell { table, .. }
            | Self::AddVariantRow { table, .. }
            | Self::RemoveAddedVariantRow { table, .. }
            | Self::RemoveVariantRow { table, .. }
            | Self::RestoreVariantRow { table, .. }
            | Self::SetViewConfig { table, .. } => Some(*table),
            Self::AddTable { table, .. } | Self::RemoveTable { table, .. } => Some(table.id),
            Self::EditBlock { .. }
            | Self::AddBlock { .. }
            | Self::RemoveBlock { .. }
            | Self::ReplaceProject { .. } => None,
        }
    }

    /// The command that undoes this one.
    #[must_use]
    pub fn inverse(&self) -> Self {
        match self.clone() {
            Self::SetCell {
                table,
                row,
                column,
                before,
                after,
            } => Self::SetCell {
                table,
                row,
                column,
                before: after,
                after: before,
            },
            Self::AddRow { table, index, row } => Self::RemoveRow { table, index, row },
            Self::RemoveRow { table, index, row } => Self::AddRow { table, index, row },
            Self::MoveRow { table, from, to } => Self::MoveRow {
                table,
                from: to,
                to: from,
            },
            Self::AddColumn {
                table,
                index,
                column,
                cells,
            } => Self::RemoveColumn {
                table,
                index,
                column,
                cells,
            },
            Self::RemoveColumn {
                table,
                index,
                column,
                cells,
            } => Self::AddColumn {
                table,
                index,
                column,
                cells,
            },
            Self::RenameColumn {
                table,
                column,
                before,
                after,
            } => Self::RenameColumn {
                table,
                column,
                before: after,
                after: before,
            },
            Self::MoveColumn { table, from, to } => Self::MoveColumn {
                table,
                from: to,
                to: from,
            },
            Self::SetColumnFormula {
                table,
                column,
                before,
                after,
            } => Self::SetColumnFormula {
                table,
                column,
                before: after,
                after: before,
            },
            Self::SetColumnKind {
                table,
                column,
                before,
                after,
            } => Self::SetColumnKind {
                table,
                column,
                before: after,
                after: before,
            },
            Self::SetRelation {
                table,
                column,
                before,
                after,
            } => Self::SetRelation {
                table,
                column,
                before: after,
                after: before,
            },
            Self::AddTable { index, table } => Self::RemoveTable { index, table },
            Self::RemoveTable { index, table } => Self::AddTable { index, table },
            Self::RenameTable {
                table,
                before,
                after,
            } => Self::RenameTable {
                table,
                before: after,
                after: before,
            },
            Self::SetSchemaLink {
                table,
                before,
                after,
            } => Self::SetSchemaLink {
                table,
                before: after,
                after: before,
            },
            Self::SetInheritance {
                table,
                before,
                after,
            } => Self::SetInheritance {
                table,
                before: after,
                after: before,
            },
            Self::SetDerivedConfig {
                table,
                before,
                after,
            } => Self::SetDerivedConfig {
                table,
                before: after,
                after: before,
            },
            Self::AddVariable {
                table,
                index,
                variable,
            } => Self::RemoveVariable {
                table,
                index,
                variable,
            },
            Self::RemoveVariable {
                table,
                index,
                variable,
            } => Self::AddVariable {
                table,
                index,
                variable,
            },
            Self::RenameVariable {
                table,
                before,
                after,
            } => Self::RenameVariable {
                table,
                before: after,
                after: before,
            },
            Self::RetypeVariable {
                table,
                name,
                before,
                after,
            } => Self::RetypeVariable {
                table,
                name,
                before: after,
                after: before,
            },
            Self::SetVariableValue {
                table,
                name,
                before,
                after,
            } => Self::SetVariableValue {
                table,
                name,
                before: after,
                after: before,
            },
            Self::EditBlock {
                document,
                before,
                after,
            } => Self::EditBlock {
                document,
                before: after,
                after: before,
            },
            Self::AddBlock {
                document,
                index,
                block,
            } => Self::RemoveBlock {
                document,
                index,
                block,
            },
            Self::RemoveBlock {
                document,
                index,
                block,
            } => Self::AddBlock {
                document,
                index,
                block,
            },
            Self::SetVariantCell {
                table,
                variant,
                row,
                column,
                before,
                after,
            } => Self::SetVariantCell {
                table,
                variant,
                row,
                column,
                before: after,
                after: before,
            },
            Self::AddVariantRow {
                table,
                variant,
                index,
                row,
            } => Self::RemoveAddedVariantRow {
                table,
                variant,
                index,
                row,
            },
            Self::RemoveAddedVariantRow {
                table,
                variant,
                index,
                row,
            } => Self::AddVariantRow {
                table,
                variant,
                index,
                row,
            },
            Self::RemoveVariantRow {
                table,
                variant,
                row,
            } => Self::RestoreVariantRow {
                table,
                variant,
                row,
            },
            Self::RestoreVariantRow {
                table,
                variant,
                row,
            } => Self::RemoveVariantRow {
                table,
                variant,
                row,
            },
            Self::SetViewConfig {
                table,
                before,
                after,
            } => Self::SetViewConfig {
                table,
                before: after,
                after: before,
            },
            Self::ReplaceProject { before, after } => Self::ReplaceProject {
                before: after,
                after: before,
            },
        }
    }
}

/// Apply `commands` in order, all or nothing.
///
/// If any command fails, the already-applied prefix is rolled back with
/// inverses (in reverse order) and the error is returned.
///
/// # Errors
///
/// Returns the first [`ApplyError`] encountered.
pub fn apply_batch(project: &mut Project, commands: &[Command]) -> Result<(), ApplyError> {
    for (applied, command) in commands.iter().enumerate() {
        if let Err(err) = command.apply(project) {
            for done in commands[..applied].iter().rev() {
                if let Err(rollback) = done.inverse().apply(project) {
                    tracing::error!(command = %done, "batch rollback failed: {rollback}");
                }
            }
            return Err(err);
        }
    }
    Ok(())
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.table_id() {
            Some(table) => write!(f, "{}({table})", self.kind()),
            None => f.write_str(self.kind()),
        }
    }
}
