//! Undo/redo history of command batches.
//!
//! History never rewrites the project directly. Undo applies the *inverse*
//! of the most recent batch (in reverse order) and moves the batch to the
//! redo stack; redo re-applies the original batch. The interactive project
//! and the persistence mirror each own one `History` and drive it with the
//! same sequence of calls, so both stay in lockstep.

use crate::command::{ApplyError, Command, apply_batch};
use crate::model::Project;

/// A batch of commands recorded as one undo step.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub commands: Vec<Command>,
}

impl HistoryEntry {
    /// Commands that undo this entry, in application order.
    #[must_use]
    pub fn inverse(&self) -> Vec<Command> {
        self.commands.iter().rev().map(Command::inverse).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct History {
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
}

impl History {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an applied batch. Clears the redo stack.
    pub fn record(&mut self, commands: Vec<Command>) {
        if commands.is_empty() {
            return;
        }
        self.redo.clear();
        self.undo.push(HistoryEntry { commands });
    }

    /// Apply a batch to `project` and record it.
    ///
    /// # Errors
    ///
    /// Returns the [`ApplyError`] of the first failing command; the project
    /// and history are unchanged in that case.
    pub fn execute(
        &mut self,
        project: &mut Project,
        commands: Vec<Command>,
    ) -> Result<(), ApplyError> {
        apply_batch(project, &commands)?;
        self.record(commands);
        Ok(())
    }

    /// Undo the most recent batch.
    ///
    /// Returns the commands that were applied (the inverse batch), or `None`
    /// when there is nothing to undo.
    ///
    /// # Errors
    ///
    /// Returns an [`ApplyError`] if the inverse batch no longer applies; the
    /// entry stays on the undo stack.
    pub fn undo(&mut self, project: &mut Project) -> Result<Option<Vec<Command>>, ApplyError> {
        let Some(entry) = self.undo.pop() else {
            return Ok(None);
        };
        let inverse = entry.inverse();
        if let Err(err) = apply_batch(project, &inverse) {
            self.undo.push(entry);
            return Err(err);
        }
        self.redo.push(entry);
        Ok(Some(inverse))
    }

    /// Redo the most recently undone batch.
    ///
    /// # Errors
    ///
    /// Returns an [`ApplyError`] if the batch no longer applies; the entry
    /// stays on the redo stack.
    pub fn redo(&mut self, project: &mut Project) -> Result<Option<Vec<Command>>, ApplyError> {
        let Some(entry) = self.redo.pop() else {
            return Ok(None);
        };
        if let Err(err) = apply_batch(project, &entry.commands) {
            self.redo.push(entry);
            return Err(err);
        }
        let applied = entry.commands.clone();
        self.undo.push(entry);
        Ok(Some(applied))
    }

    /// Logical position: number of batches that can be undone.
    #[must_use]
    pub fn position(&self) -> usize {
        self.undo.len()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellValue, Column, ColumnId, Row, RowId, Table, TableId};

    fn project() -> Project {
        let mut t = Table::new(TableId(1), "T");
        t.columns.push(Column::value(ColumnId(1), "A"));
        t.rows.push(Row::new(RowId(1)).with(ColumnId(1), CellValue::Number(1.0)));
        let mut p = Project::new();
        p.tables.push(t);
        p
    }

    fn set(p: &Project, v: f64) -> Command {
        Command::set_cell_value(p, TableId(1), RowId(1), ColumnId(1), CellValue::Number(v))
            .expect("build")
    }

    #[test]
    fn undo_restores_and_redo_reapplies() {
        let original = project();
        let mut p = original.clone();
        let mut history = History::new();

        let cmd = set(&p, 2.0);
        history.execute(&mut p, vec![cmd]).expect("execute");
        let edited = p.clone();
        assert_eq!(history.position(), 1);

        history.undo(&mut p).expect("undo").expect("something to undo");
        assert_eq!(p, original);
        assert_eq!(history.position(), 0);
        assert!(history.can_redo());

        history.redo(&mut p).expect("redo").expect("something to redo");
        assert_eq!(p, edited);
        assert_eq!(history.position(), 1);
    }

    #[test]
    fn new_batch_clears_redo() {
        let mut p = project();
        let mut history = History::new();
        let first = set(&p, 2.0);
        history.execute(&mut p, vec![first]).expect("execute");
        history.undo(&mut p).expect("undo");
        assert!(history.can_redo());

        let second = set(&p, 3.0);
        history.execute(&mut p, vec![second]).expect("execute");
        assert!(!history.can_redo());
    }

    #[test]
    fn multi_command_batch_undoes_in_reverse() {
        let original = project();
        let mut p = original.clone();
        let mut history = History::new();
        let batch = vec![
            Command::AddRow {
                table: TableId(1),
                index: 1,
                row: Row::new(RowId(2)),
            },
            Command::MoveRow {
                table: TableId(1),
                from: 1,
                to: 0,
            },
        ];
        history.execute(&mut p, batch).expect("execute");
        assert_eq!(p.tables[0].rows[0].id, RowId(2));
        history.undo(&mut p).expect("undo");
        assert_eq!(p, original);
    }

    #[test]
    fn failed_execute_records_nothing() {
        let original = project();
        let mut p = original.clone();
        let mut history = History::new();
        let bad = Command::MoveRow {
            table: TableId(1),
            from: 0,
            to: 3,
        };
        assert!(history.execute(&mut p, vec![bad]).is_err());
        assert_eq!(history.position(), 0);
        assert_eq!(p, original);
    }

    #[test]
    fn undo_on_empty_history_is_none() {
        let mut p = project();
        let mut history = History::new();
        assert_eq!(history.undo(&mut p).expect("undo"), None);
        assert_eq!(history.redo(&mut p).expect("redo"), None);
    }
}
