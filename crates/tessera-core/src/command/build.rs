//! Constructors that capture the before-state from a live project.
//!
//! Hosts usually know only the after-state of an edit ("set this cell to
//! 4"). These helpers read the current state so the resulting command is
//! undoable and replays identically on the mirror.

use crate::model::{Cell, CellValue, ColumnId, ColumnKind, Project, RowId, Table, TableId};

use super::{ApplyError, Command};

fn table(project: &Project, id: TableId) -> Result<&Table, ApplyError> {
    project.table(id).ok_or(ApplyError::TableNotFound(id))
}

impl Command {
    /// Set a plain value, clearing any cell-level formula.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the table, row or column does not exist.
    pub fn set_cell_value(
        project: &Project,
        table_id: TableId,
        row: RowId,
        column: ColumnId,
        value: CellValue,
    ) -> Result<Self, ApplyError> {
        Self::set_cell(project, table_id, row, column, Cell::value(value))
    }

    /// Replace a cell wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the table, row or column does not exist.
    pub fn set_cell(
        project: &Project,
        table_id: TableId,
        row: RowId,
        column: ColumnId,
        after: Cell,
    ) -> Result<Self, ApplyError> {
        let t = table(project, table_id)?;
        if t.column(column).is_none() {
            return Err(ApplyError::ColumnNotFound {
                table: table_id,
                column,
            });
        }
        let r = t.row(row).ok_or(ApplyError::RowNotFound {
            table: table_id,
            row,
        })?;
        Ok(Self::SetCell {
            table: table_id,
            row,
            column,
            before: r.cell(column).clone(),
            after,
        })
    }

    /// Remove a row, capturing its contents and position.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the table or row does not exist.
    pub fn remove_row(
        project: &Project,
        table_id: TableId,
        row: RowId,
    ) -> Result<Self, ApplyError> {
        let t = table(project, table_id)?;
        let index = t.row_index(row).ok_or(ApplyError::RowNotFound {
            table: table_id,
            row,
        })?;
        Ok(Self::RemoveRow {
            table: table_id,
            index,
            row: t.rows[index].clone(),
        })
    }

    /// Remove a column, capturing its definition and every non-empty cell.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the table or column does not exist.
    pub fn remove_column(
        project: &Project,
        table_id: TableId,
        column: ColumnId,
    ) -> Result<Self, ApplyError> {
        let t = table(project, table_id)?;
        let index = t.column_index(column).ok_or(ApplyError::ColumnNotFound {
            table: table_id,
            column,
        })?;
        let cells = t
            .rows
            .iter()
            .filter_map(|row| row.cells.get(&column).map(|cell| (row.id, cell.clone())))
            .collect();
        Ok(Self::RemoveColumn {
            table: table_id,
            index,
            column: t.columns[index].clone(),
            cells,
        })
    }

    /// Change a formula column's expression.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the column is missing or not a formula column.
    pub fn set_column_formula(
        project: &Project,
        table_id: TableId,
        column: ColumnId,
        expression: impl Into<String>,
    ) -> Result<Self, ApplyError> {
        let t = table(project, table_id)?;
        let col = t.column(column).ok_or(ApplyError::ColumnNotFound {
            table: table_id,
            column,
        })?;
        let ColumnKind::Formula {
            expression: before, ..
        } = &col.kind
        else {
            return Err(ApplyError::Mismatch {
                kind: "set_column_formula",
                reason: format!("column {column} is not a formula"),
            });
        };
        Ok(Self::SetColumnFormula {
            table: table_id,
            column,
            before: before.clone(),
            after: expression.into(),
        })
    }

    /// Rename a column.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] if the table or column does not exist.
    pub fn rename_column(
        project: &Project,
        table_id: TableId,
        column: ColumnId,
        name: impl Into<String>,
    ) -> Result<Self, ApplyError> {
        let t = table(project, table_id)?;
        let col = t.column(column).ok_or(ApplyError::ColumnNotFound {
            table: table_id,
            column,
        })?;
        Ok(Self::RenameColumn {
            table: table_id,
            column,
            before: col.name.clone(),
            after: name.into(),
        })
    }

    /// Remove a table, capturing it for undo.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::TableNotFound`] if the table does not exist.
    pub fn remove_table(project: &Project, table_id: TableId) -> Result<Self, ApplyError> {
        let index = project
            .table_index(table_id)
            .ok_or(ApplyError::TableNotFound(table_id))?;
        Ok(Self::RemoveTable {
            index,
            table: Box::new(project.tables[index].clone()),
        })
    }

    /// Replace the whole project (external reload, import).
    #[must_use]
    pub fn replace_project(current: &Project, next: Project) -> Self {
        Self::ReplaceProject {
            before: Box::new(current.deep_copy()),
            after: Box::new(next),
        }
    }
}
