//! Applying commands to a project.
//!
//! Each command validates everything it needs before mutating, so a failed
//! apply leaves the project untouched. A command whose recorded before-state
//! no longer matches the project is rejected. Batch-level atomicity is
//! layered on top by the executor, which rolls back an applied prefix with
//! inverses.

use crate::error::ErrorCode;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{
    BlockId, Cell, Column, ColumnId, ColumnKind, Document, DocumentId, Project, Row, RowId, Table,
    TableId, VariantId, VariantDelta,
};

use super::Command;

/// Reason a command could not be applied to a project.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("table {0} not found")]
    TableNotFound(TableId),

    #[error("row {row} not found in table {table}")]
    RowNotFound { table: TableId, row: RowId },

    #[error("column {column} not found in table {table}")]
    ColumnNotFound { table: TableId, column: ColumnId },

    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    #[error("block {block} not found in document {document}")]
    BlockNotFound {
        document: DocumentId,
        block: BlockId,
    },

    #[error("variant {variant} not found in table {table}")]
    VariantNotFound { table: TableId, variant: VariantId },

    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// The command's before-state does not match the project.
    #[error("{kind}: {reason}")]
    Mismatch { kind: &'static str, reason: String },
}

impl ApplyError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::TableNotFound(_) => ErrorCode::TableNotFound,
            Self::RowNotFound { .. } => ErrorCode::RowNotFound,
            Self::ColumnNotFound { .. } => ErrorCode::ColumnNotFound,
            Self::DocumentNotFound(_) => ErrorCode::DocumentNotFound,
            Self::BlockNotFound { .. } => ErrorCode::BlockNotFound,
            Self::VariantNotFound { .. } => ErrorCode::VariantNotFound,
            Self::IndexOutOfRange { .. } => ErrorCode::IndexOutOfRange,
            Self::Mismatch { .. } => ErrorCode::InvalidCommand,
        }
    }
}

fn mismatch(kind: &'static str, reason: impl Into<String>) -> ApplyError {
    ApplyError::Mismatch {
        kind,
        reason: reason.into(),
    }
}

const fn check_insert(index: usize, len: usize) -> Result<(), ApplyError> {
    if index > len {
        return Err(ApplyError::IndexOutOfRange { index, len });
    }
    Ok(())
}

const fn check_existing(index: usize, len: usize) -> Result<(), ApplyError> {
    if index >= len {
        return Err(ApplyError::IndexOutOfRange { index, len });
    }
    Ok(())
}

fn table_mut(project: &mut Project, id: TableId) -> Result<&mut Table, ApplyError> {
    project
        .table_mut(id)
        .ok_or(ApplyError::TableNotFound(id))
}

fn document_mut(project: &mut Project, id: DocumentId) -> Result<&mut Document, ApplyError> {
    project
        .document_mut(id)
        .ok_or(ApplyError::DocumentNotFound(id))
}

fn variant_mut(table: &mut Table, id: VariantId) -> Result<&mut VariantDelta, ApplyError> {
    let table_id = table.id;
    table.variant_mut(id).ok_or(ApplyError::VariantNotFound {
        table: table_id,
        variant: id,
    })
}

fn require_column(table: &Table, column: ColumnId) -> Result<usize, ApplyError> {
    table.column_index(column).ok_or(ApplyError::ColumnNotFound {
        table: table.id,
        column,
    })
}

fn require_row(table: &Table, row: RowId) -> Result<usize, ApplyError> {
    table.row_index(row).ok_or(ApplyError::RowNotFound {
        table: table.id,
        row,
    })
}

const fn is_blank(cell: &Cell) -> bool {
    cell.value.is_empty() && cell.formula.is_none()
}

/// Columns whose cell values belong to the evaluator.
fn formula_columns(table: &Table) -> BTreeSet<ColumnId> {
    table
        .columns
        .iter()
        .filter(|c| matches!(c.kind, ColumnKind::Formula { .. }))
        .map(|c| c.id)
        .collect()
}

/// Evaluation owns the value of a formula cell and of any cell in a formula
/// column, so only the formula is compared there. The mirror is never
/// evaluated and must accept the same commands as the primary.
fn same_cell(live: &Cell, expected: &Cell, derived: bool) -> bool {
    if derived || live.formula.is_some() || expected.formula.is_some() {
        return live.formula == expected.formula;
    }
    live.value == expected.value
}

/// A stored blank cell and a missing one read the same.
fn same_row(live: &Row, expected: &Row, derived: &BTreeSet<ColumnId>) -> bool {
    live.id == expected.id
        && live
            .cells
            .keys()
            .chain(expected.cells.keys())
            .all(|c| same_cell(live.cell(*c), expected.cell(*c), derived.contains(c)))
}

fn same_rows(live: &[Row], expected: &[Row], derived: &BTreeSet<ColumnId>) -> bool {
    live.len() == expected.len()
        && live
            .iter()
            .zip(expected)
            .all(|(a, b)| same_row(a, b, derived))
}

fn same_variant(
    live: &VariantDelta,
    expected: &VariantDelta,
    derived: &BTreeSet<ColumnId>,
) -> bool {
    live.id == expected.id
        && live.name == expected.name
        && live.deleted_rows == expected.deleted_rows
        && live.overrides == expected.overrides
        && same_rows(&live.added_rows, &expected.added_rows, derived)
}

/// Rows of a derived table are evaluation output and are not compared.
fn same_table(live: &Table, expected: &Table) -> bool {
    let derived = formula_columns(live);
    live.id == expected.id
        && live.name == expected.name
        && live.columns == expected.columns
        && (live.is_derived() || same_rows(&live.rows, &expected.rows, &derived))
        && live.variables == expected.variables
        && live.views == expected.views
        && live.variants.len() == expected.variants.len()
        && live
            .variants
            .iter()
            .zip(&expected.variants)
            .all(|(a, b)| same_variant(a, b, &derived))
        && live.schema_link == expected.schema_link
        && live.inherits == expected.inherits
        && live.derived == expected.derived
}

fn same_project(live: &Project, expected: &Project) -> bool {
    live.documents == expected.documents
        && live.tables.len() == expected.tables.len()
        && live
            .tables
            .iter()
            .zip(&expected.tables)
            .all(|(a, b)| same_table(a, b))
}

/// Whether `cells` still describes every row's cell in `column`, in any
/// order.
fn same_column_cells(table: &Table, column: &Column, cells: &[(RowId, Cell)]) -> bool {
    let derived = matches!(column.kind, ColumnKind::Formula { .. });
    let blank = Cell::default();
    let captured = cells
        .iter()
        .map(|(row, cell)| (*row, cell))
        .collect::<BTreeMap<_, _>>();
    let rows_match = table.rows.iter().all(|row| {
        let expected = captured.get(&row.id).copied().unwrap_or(&blank);
        same_cell(row.cell(column.id), expected, derived)
    });
    rows_match
        && captured
            .iter()
            .all(|(row, cell)| table.row(*row).is_some() || same_cell(&blank, cell, derived))
}

fn check_before<T: PartialEq + std::fmt::Debug>(
    kind: &'static str,
    live: &T,
    before: &T,
) -> Result<(), ApplyError> {
    if live != before {
        return Err(mismatch(kind, format!("expected {before:?}, found {live:?}")));
    }
    Ok(())
}

fn move_item<T>(items: &mut Vec<T>, from: usize, to: usize) -> Result<(), ApplyError> {
    let len = items.len();
    check_existing(from, len)?;
    check_existing(to, len)?;
    let item = items.remove(from);
    items.insert(to, item);
    Ok(())
}

impl Command {
    /// Apply this command's after-state to `project`.
    ///
    /// # Errors
    ///
    /// Returns an [`ApplyError`] when a referenced entity is missing, an
    /// index is out of range, or the command's before-state does not match.
    /// The project is not modified on error.
    #[allow(clippy::too_many_lines)]
    pub fn apply(&self, project: &mut Project) -> Result<(), ApplyError> {
        let kind = self.kind();
        match self {
            Self::SetCell {
                table,
                row,
                column,
                before,
                after,
            } => {
                let t = table_mut(project, *table)?;
                require_column(t, *column)?;
                let idx = require_row(t, *row)?;
                let derived = formula_columns(t).contains(column);
                let live = t.rows[idx].cell(*column);
                if !same_cell(live, before, derived) {
                    return Err(mismatch(kind, format!("expected {before:?}, found {live:?}")));
                }
                let cells = &mut t.rows[idx].cells;
                if is_blank(after) {
                    cells.remove(column);
                } else {
                    cells.insert(*column, after.clone());
                }
            }
            Self::AddRow { table, index, row } => {
                let t = table_mut(project, *table)?;
                check_insert(*index, t.rows.len())?;
                if t.row(row.id).is_some() {
                    return Err(mismatch(kind, format!("row {} already exists", row.id)));
                }
                t.rows.insert(*index, row.clone());
            }
            Self::RemoveRow { table, index, row } => {
                let t = table_mut(project, *table)?;
                check_existing(*index, t.rows.len())?;
                if t.rows[*index].id != row.id {
                    return Err(mismatch(kind, format!("row {} is not at {index}", row.id)));
                }
                if !same_row(&t.rows[*index], row, &formula_columns(t)) {
                    return Err(mismatch(kind, format!("row {} contents changed", row.id)));
                }
                t.rows.remove(*index);
            }
            Self::MoveRow { table, from, to } => {
                move_item(&mut table_mut(project, *table)?.rows, *from, *to)?;
            }
            Self::AddColumn {
                table,
                index,
                column,
                cells,
            } => {
                let t = table_mut(project, *table)?;
                check_insert(*index, t.columns.len())?;
                if t.column(column.id).is_some() {
                    return Err(mismatch(kind, format!("column {} already exists", column.id)));
                }
                for (row, _) in cells {
                    require_row(t, *row)?;
                }
                t.columns.insert(*index, column.clone());
                for (row, cell) in cells {
                    if let Some(r) = t.row_mut(*row) {
                        r.cells.insert(column.id, cell.clone());
                    }
                }
            }
            Self::RemoveColumn {
                table,
                index,
                column,
                cells,
            } => {
                let t = table_mut(project, *table)?;
                check_existing(*index, t.columns.len())?;
                if t.columns[*index].id != column.id {
                    return Err(mismatch(
                        kind,
                        format!("column {} is not at {index}", column.id),
                    ));
                }
                check_before(kind, &t.columns[*index], column)?;
                if !same_column_cells(t, column, cells) {
                    return Err(mismatch(kind, format!("cells of column {} changed", column.id)));
                }
                t.columns.remove(*index);
                for row in &mut t.rows {
                    row.cells.remove(&column.id);
                }
            }
            Self::RenameColumn {
                table,
                column,
                before,
                after,
            } => {
                let t = table_mut(project, *table)?;
                let idx = require_column(t, *column)?;
                check_before(kind, &t.columns[idx].name, before)?;
                t.columns[idx].name.clone_from(after);
            }
            Self::MoveColumn { table, from, to } => {
                move_item(&mut table_mut(project, *table)?.columns, *from, *to)?;
            }
            Self::SetColumnFormula {
                table,
                column,
                before,
                after,
            } => {
                let t = table_mut(project, *table)?;
                let idx = require_column(t, *column)?;
                match &mut t.columns[idx].kind {
                    ColumnKind::Formula { expression, .. } => {
                        check_before(kind, &*expression, before)?;
                        expression.clone_from(after);
                    }
                    _ => return Err(mismatch(kind, format!("column {column} is not a formula"))),
                }
            }
            Self::SetColumnKind {
                table,
                column,
                before,
                after,
            } => {
                let t = table_mut(project, *table)?;
                let idx = require_column(t, *column)?;
                check_before(kind, &t.columns[idx].kind, before)?;
                t.columns[idx].kind = after.clone();
            }
            Self::SetRelation {
                table,
                column,
                before,
                after,
            } => {
                let t = table_mut(project, *table)?;
                let idx = require_column(t, *column)?;
                match &mut t.columns[idx].kind {
                    ColumnKind::Relation(target) => {
                        check_before(kind, &*target, before)?;
                        *target = after.clone();
                    }
                    _ => return Err(mismatch(kind, format!("column {column} is not a relation"))),
                }
            }
            Self::AddTable { index, table } => {
                check_insert(*index, project.tables.len())?;
                if project.table(table.id).is_some() {
                    return Err(mismatch(kind, format!("table {} already exists", table.id)));
                }
                project.tables.insert(*index, table.as_ref().clone());
            }
            Self::RemoveTable { index, table } => {
                check_existing(*index, project.tables.len())?;
                if project.tables[*index].id != table.id {
                    return Err(mismatch(kind, format!("table {} is not at {index}", table.id)));
                }
                if !same_table(&project.tables[*index], table) {
                    return Err(mismatch(kind, format!("table {} contents changed", table.id)));
                }
                project.tables.remove(*index);
            }
            Self::RenameTable {
                table,
                before,
                after,
            } => {
                let t = table_mut(project, *table)?;
                check_before(kind, &t.name, before)?;
                t.name.clone_from(after);
            }
            Self::SetSchemaLink {
                table,
                before,
                after,
            } => {
                let t = table_mut(project, *table)?;
                check_before(kind, &t.schema_link, before)?;
                t.schema_link = *after;
            }
            Self::SetInheritance {
                table,
                before,
                after,
            } => {
                let t = table_mut(project, *table)?;
                check_before(kind, &t.inherits, before)?;
                t.inherits = *after;
            }
            Self::SetDerivedConfig {
                table,
                before,
                after,
            } => {
                let t = table_mut(project, *table)?;
                check_before(kind, &t.derived, before)?;
                t.derived.clone_from(after);
            }
            Self::AddVariable {
                table,
                index,
                variable,
            } => {
                let t = table_mut(project, *table)?;
                check_insert(*index, t.variables.len())?;
                if t.variable_index(&variable.name).is_some() {
                    return Err(mismatch(
                        kind,
                        format!("variable '{}' already exists", variable.name),
                    ));
                }
                t.variables.insert(*index, variable.clone());
            }
            Self::RemoveVariable {
                table,
                index,
                variable,
            } => {
                let t = table_mut(project, *table)?;
                check_existing(*index, t.variables.len())?;
                if t.variables[*index].name != variable.name {
                    return Err(mismatch(
                        kind,
                        format!("variable '{}' is not at {index}", variable.name),
                    ));
                }
                check_before(kind, &t.variables[*index], variable)?;
                t.variables.remove(*index);
            }
            Self::RenameVariable {
                table,
                before,
                after,
            } => {
                let t = table_mut(project, *table)?;
                let idx = variable_index(t, before, kind)?;
                t.variables[idx].name.clone_from(after);
            }
            Self::RetypeVariable {
                table,
                name,
                before,
                after,
            } => {
                let t = table_mut(project, *table)?;
                let idx = variable_index(t, name, kind)?;
                check_before(kind, &t.variables[idx].kind, before)?;
                t.variables[idx].kind = *after;
            }
            Self::SetVariableValue {
                table,
                name,
                before,
                after,
            } => {
                let t = table_mut(project, *table)?;
                let idx = variable_index(t, name, kind)?;
                check_before(kind, &t.variables[idx].value, before)?;
                t.variables[idx].value = after.clone();
            }
            Self::EditBlock {
                document,
                before,
                after,
            } => {
                if before.id != after.id {
                    return Err(mismatch(kind, "block id changed"));
                }
                let d = document_mut(project, *document)?;
                let idx = d.block_index(before.id).ok_or(ApplyError::BlockNotFound {
                    document: *document,
                    block: before.id,
                })?;
                check_before(kind, &d.blocks[idx], before)?;
                d.blocks[idx] = after.clone();
            }
            Self::AddBlock {
                document,
                index,
                block,
            } => {
                let d = document_mut(project, *document)?;
                check_insert(*index, d.blocks.len())?;
                if d.block(block.id).is_some() {
                    return Err(mismatch(kind, format!("block {} already exists", block.id)));
                }
                d.blocks.insert(*index, block.clone());
            }
            Self::RemoveBlock {
                document,
                index,
                block,
            } => {
                let d = document_mut(project, *document)?;
                check_existing(*index, d.blocks.len())?;
                if d.blocks[*index].id != block.id {
                    return Err(mismatch(kind, format!("block {} is not at {index}", block.id)));
                }
                check_before(kind, &d.blocks[*index], block)?;
                d.blocks.remove(*index);
            }
            Self::SetVariantCell {
                table,
                variant,
                row,
                column,
                before,
                after,
            } => {
                let v = variant_mut(table_mut(project, *table)?, *variant)?;
                check_before(kind, &v.override_for(*row, *column), &before.as_ref())?;
                v.set_override(*row, *column, after.clone());
            }
            Self::AddVariantRow {
                table,
                variant,
                index,
                row,
            } => {
                let v = variant_mut(table_mut(project, *table)?, *variant)?;
                check_insert(*index, v.added_rows.len())?;
                v.added_rows.insert(*index, row.clone());
            }
            Self::RemoveAddedVariantRow {
                table,
                variant,
                index,
                row,
            } => {
                let t = table_mut(project, *table)?;
                let derived = formula_columns(t);
                let v = variant_mut(t, *variant)?;
                check_existing(*index, v.added_rows.len())?;
                if v.added_rows[*index].id != row.id {
                    return Err(mismatch(kind, format!("row {} is not at {index}", row.id)));
                }
                if !same_row(&v.added_rows[*index], row, &derived) {
                    return Err(mismatch(kind, format!("row {} contents changed", row.id)));
                }
                v.added_rows.remove(*index);
            }
            Self::RemoveVariantRow {
                table,
                variant,
                row,
            } => {
                let v = variant_mut(table_mut(project, *table)?, *variant)?;
                if !v.deleted_rows.insert(*row) {
                    return Err(mismatch(kind, format!("row {row} already removed")));
                }
            }
            Self::RestoreVariantRow {
                table,
                variant,
                row,
            } => {
                let v = variant_mut(table_mut(project, *table)?, *variant)?;
                if !v.deleted_rows.remove(row) {
                    return Err(mismatch(kind, format!("row {row} is not removed")));
                }
            }
            Self::SetViewConfig {
                table,
                before,
                after,
            } => {
                if before.id != after.id {
                    return Err(mismatch(kind, "view id changed"));
                }
                let t = table_mut(project, *table)?;
                let view = t
                    .views
                    .iter_mut()
                    .find(|v| v.id == after.id)
                    .ok_or_else(|| mismatch(kind, format!("view {} not found", after.id)))?;
                check_before(kind, &*view, before)?;
                *view = after.clone();
            }
            Self::ReplaceProject { before, after } => {
                if !same_project(project, before) {
                    return Err(mismatch(kind, "project changed since the snapshot"));
                }
                *project = after.as_ref().clone();
            }
        }
        Ok(())
    }
}

fn variable_index(table: &Table, name: &str, kind: &'static str) -> Result<usize, ApplyError> {
    table
        .variable_index(name)
        .ok_or_else(|| mismatch(kind, format!("variable '{name}' not found")))
}
