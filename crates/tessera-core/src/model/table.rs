//! Tables: columns, rows, cells, table variables, views and variant deltas.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use super::ids::{ColumnId, RowId, TableId, VariantId, ViewId};

// ---------------------------------------------------------------------------
// Values and cells
// ---------------------------------------------------------------------------

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
}

impl CellValue {
    /// Total order used by view sorting: empty < bool < number < text.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        const fn rank(value: &CellValue) -> u8 {
            match value {
                CellValue::Empty => 0,
                CellValue::Bool(_) => 1,
                CellValue::Number(_) => 2,
                CellValue::Text(_) => 3,
            }
        }

        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }

    /// Returns `true` for [`CellValue::Empty`].
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// A cell: its current value plus an optional cell-level formula.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub value: CellValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

impl Cell {
    /// A plain value cell with no formula.
    #[must_use]
    pub const fn value(value: CellValue) -> Self {
        Self {
            value,
            formula: None,
        }
    }

    /// A cell driven by its own formula. The value is filled in by evaluation.
    #[must_use]
    pub fn formula(expression: impl Into<String>) -> Self {
        Self {
            value: CellValue::Empty,
            formula: Some(expression.into()),
        }
    }

    /// Returns `true` when the cell carries a non-empty formula.
    #[must_use]
    pub fn has_formula(&self) -> bool {
        self.formula.as_deref().is_some_and(|f| !f.trim().is_empty())
    }
}

static EMPTY_CELL: Cell = Cell {
    value: CellValue::Empty,
    formula: None,
};

/// One table row. Cells are sparse: a missing column reads as empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    #[serde(default)]
    pub cells: BTreeMap<ColumnId, Cell>,
}

impl Row {
    #[must_use]
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            cells: BTreeMap::new(),
        }
    }

    /// Builder-style helper used heavily by tests and importers.
    #[must_use]
    pub fn with(mut self, column: ColumnId, value: CellValue) -> Self {
        self.cells.insert(column, Cell::value(value));
        self
    }

    /// The cell at `column`, or an empty cell.
    #[must_use]
    pub fn cell(&self, column: ColumnId) -> &Cell {
        self.cells.get(&column).unwrap_or(&EMPTY_CELL)
    }

    /// Drop cells for columns not in `columns`.
    pub fn retain_columns(&mut self, columns: &BTreeSet<ColumnId>) {
        self.cells.retain(|id, _| columns.contains(id));
    }
}

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// How a relation column resolves rows of its target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationMode {
    Single,
    Many,
}

/// Target of a relation column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationTarget {
    pub table: TableId,
    pub mode: RelationMode,
    #[serde(default)]
    pub variant: VariantId,
    #[serde(default)]
    pub display_column: Option<ColumnId>,
    #[serde(default)]
    pub label: String,
}

impl RelationTarget {
    /// Whether `other` resolves differently from `self`.
    ///
    /// Only the target table, mode, variant and display column influence
    /// name resolution; the label is presentation only.
    #[must_use]
    pub fn resolves_differently(&self, other: &Self) -> bool {
        self.table != other.table
            || self.mode != other.mode
            || self.variant != other.variant
            || self.display_column != other.display_column
    }
}

/// What a column holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnKind {
    /// User-entered values.
    Value,
    /// Values computed from `expression`.
    ///
    /// `interactive` columns are recomputed on every preview edit; the rest
    /// are deferred until the gesture settles.
    Formula {
        expression: String,
        #[serde(default)]
        interactive: bool,
    },
    /// Links to rows of another table.
    Relation(RelationTarget),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    #[must_use]
    pub fn value(id: ColumnId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: ColumnKind::Value,
        }
    }

    #[must_use]
    pub fn formula(id: ColumnId, name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: ColumnKind::Formula {
                expression: expression.into(),
                interactive: false,
            },
        }
    }

    /// The formula expression, if this is a formula column.
    #[must_use]
    pub fn expression(&self) -> Option<&str> {
        match &self.kind {
            ColumnKind::Formula { expression, .. } => Some(expression),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_formula(&self) -> bool {
        matches!(self.kind, ColumnKind::Formula { .. })
    }

    #[must_use]
    pub const fn is_interactive_formula(&self) -> bool {
        matches!(
            self.kind,
            ColumnKind::Formula {
                interactive: true,
                ..
            }
        )
    }
}

// ---------------------------------------------------------------------------
// Table variables, views, derived configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Number,
    Text,
    Bool,
}

/// A named table-scoped value that formulas can reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableVariable {
    pub name: String,
    pub kind: VariableKind,
    #[serde(default)]
    pub value: CellValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: ColumnId,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewFilter {
    pub column: ColumnId,
    pub equals: CellValue,
}

/// A saved presentation of a table: sort, filter and hidden columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub id: ViewId,
    pub name: String,
    #[serde(default)]
    pub sort: Vec<SortKey>,
    #[serde(default)]
    pub hidden_columns: BTreeSet<ColumnId>,
    #[serde(default)]
    pub filter: Option<ViewFilter>,
}

impl View {
    #[must_use]
    pub fn new(id: ViewId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            sort: Vec::new(),
            hidden_columns: BTreeSet::new(),
            filter: None,
        }
    }
}

/// Configuration of a derived table whose rows are produced by evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedConfig {
    pub source: TableId,
    #[serde(default)]
    pub filter_column: Option<ColumnId>,
    #[serde(default)]
    pub group_by: Vec<ColumnId>,
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// Per-cell override stored in a variant delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellOverride {
    pub row: RowId,
    pub column: ColumnId,
    pub value: CellValue,
}

/// The difference between a non-default variant and the table's base rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDelta {
    pub id: VariantId,
    pub name: String,
    #[serde(default)]
    pub added_rows: Vec<Row>,
    #[serde(default)]
    pub deleted_rows: BTreeSet<RowId>,
    #[serde(default)]
    pub overrides: Vec<CellOverride>,
}

impl VariantDelta {
    #[must_use]
    pub fn new(id: VariantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            added_rows: Vec::new(),
            deleted_rows: BTreeSet::new(),
            overrides: Vec::new(),
        }
    }

    /// Current override for `(row, column)`, if any.
    #[must_use]
    pub fn override_for(&self, row: RowId, column: ColumnId) -> Option<&CellValue> {
        self.overrides
            .iter()
            .find(|o| o.row == row && o.column == column)
            .map(|o| &o.value)
    }

    /// Set or clear the override for `(row, column)`.
    pub fn set_override(&mut self, row: RowId, column: ColumnId, value: Option<CellValue>) {
        let existing = self
            .overrides
            .iter()
            .position(|o| o.row == row && o.column == column);
        match (existing, value) {
            (Some(idx), Some(value)) => self.overrides[idx].value = value,
            (Some(idx), None) => {
                self.overrides.remove(idx);
            }
            (None, Some(value)) => self.overrides.push(CellOverride { row, column, value }),
            (None, None) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default)]
    pub variables: Vec<TableVariable>,
    #[serde(default)]
    pub views: Vec<View>,
    #[serde(default)]
    pub variants: Vec<VariantDelta>,
    #[serde(default)]
    pub schema_link: Option<TableId>,
    #[serde(default)]
    pub inherits: Option<TableId>,
    #[serde(default)]
    pub derived: Option<DerivedConfig>,
}

impl Table {
    #[must_use]
    pub fn new(id: TableId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            variables: Vec::new(),
            views: Vec::new(),
            variants: Vec::new(),
            schema_link: None,
            inherits: None,
            derived: None,
        }
    }

    #[must_use]
    pub fn column(&self, id: ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    #[must_use]
    pub fn column_mut(&mut self, id: ColumnId) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.id == id)
    }

    #[must_use]
    pub fn column_index(&self, id: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    /// Set of column ids currently declared on the table.
    #[must_use]
    pub fn column_ids(&self) -> BTreeSet<ColumnId> {
        self.columns.iter().map(|c| c.id).collect()
    }

    #[must_use]
    pub fn row(&self, id: RowId) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == id)
    }

    #[must_use]
    pub fn row_mut(&mut self, id: RowId) -> Option<&mut Row> {
        self.rows.iter_mut().find(|r| r.id == id)
    }

    #[must_use]
    pub fn row_index(&self, id: RowId) -> Option<usize> {
        self.rows.iter().position(|r| r.id == id)
    }

    #[must_use]
    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.views.iter().find(|v| v.id == id)
    }

    #[must_use]
    pub fn variant(&self, id: VariantId) -> Option<&VariantDelta> {
        self.variants.iter().find(|v| v.id == id)
    }

    #[must_use]
    pub fn variant_mut(&mut self, id: VariantId) -> Option<&mut VariantDelta> {
        self.variants.iter_mut().find(|v| v.id == id)
    }

    #[must_use]
    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    #[must_use]
    pub const fn is_derived(&self) -> bool {
        self.derived.is_some()
    }

    /// Formula columns, cell formulas or table variables.
    #[must_use]
    pub fn has_formula_artifacts(&self) -> bool {
        !self.variables.is_empty()
            || self.columns.iter().any(Column::is_formula)
            || self
                .rows
                .iter()
                .any(|row| row.cells.values().any(Cell::has_formula))
    }

    /// Whether any formula column lives outside the interactive scope.
    #[must_use]
    pub fn has_deferred_formulas(&self) -> bool {
        self.columns
            .iter()
            .any(|c| c.is_formula() && !c.is_interactive_formula())
    }

    /// Every formula expression declared in this table.
    pub fn formula_texts(&self) -> impl Iterator<Item = &str> {
        let columns = self.columns.iter().filter_map(Column::expression);
        let cells = self
            .rows
            .iter()
            .flat_map(|row| row.cells.values().filter_map(|c| c.formula.as_deref()));
        columns.chain(cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut table = Table::new(TableId(1), "Parts");
        table.columns.push(Column::value(ColumnId(1), "Name"));
        table.columns.push(Column::value(ColumnId(2), "Qty"));
        table.rows.push(
            Row::new(RowId(1))
                .with(ColumnId(1), CellValue::Text("bolt".into()))
                .with(ColumnId(2), CellValue::Number(4.0)),
        );
        table
    }

    #[test]
    fn plain_table_has_no_formula_artifacts() {
        assert!(!sample().has_formula_artifacts());
    }

    #[test]
    fn formula_column_cell_formula_and_variable_are_artifacts() {
        let mut t = sample();
        t.columns
            .push(Column::formula(ColumnId(3), "Total", "thisRow.Qty * 2"));
        assert!(t.has_formula_artifacts());

        let mut t = sample();
        t.rows[0]
            .cells
            .insert(ColumnId(2), Cell::formula("1 + 1"));
        assert!(t.has_formula_artifacts());

        let mut t = sample();
        t.variables.push(TableVariable {
            name: "rate".into(),
            kind: VariableKind::Number,
            value: CellValue::Number(0.2),
        });
        assert!(t.has_formula_artifacts());
    }

    #[test]
    fn blank_cell_formula_is_not_an_artifact() {
        let mut t = sample();
        t.rows[0].cells.insert(ColumnId(2), Cell::formula("  "));
        assert!(!t.has_formula_artifacts());
    }

    #[test]
    fn missing_cell_reads_as_empty() {
        let t = sample();
        assert!(t.rows[0].cell(ColumnId(99)).value.is_empty());
    }

    #[test]
    fn sort_cmp_orders_by_kind_then_value() {
        let mut values = vec![
            CellValue::Text("b".into()),
            CellValue::Number(2.0),
            CellValue::Empty,
            CellValue::Number(-1.0),
            CellValue::Bool(true),
            CellValue::Text("a".into()),
        ];
        values.sort_by(CellValue::sort_cmp);
        assert_eq!(
            values,
            vec![
                CellValue::Empty,
                CellValue::Bool(true),
                CellValue::Number(-1.0),
                CellValue::Number(2.0),
                CellValue::Text("a".into()),
                CellValue::Text("b".into()),
            ]
        );
    }

    #[test]
    fn variant_override_set_replace_clear() {
        let mut delta = VariantDelta::new(VariantId(1), "what-if");
        delta.set_override(RowId(1), ColumnId(2), Some(CellValue::Number(9.0)));
        delta.set_override(RowId(1), ColumnId(2), Some(CellValue::Number(10.0)));
        assert_eq!(delta.overrides.len(), 1);
        assert_eq!(
            delta.override_for(RowId(1), ColumnId(2)),
            Some(&CellValue::Number(10.0))
        );
        delta.set_override(RowId(1), ColumnId(2), None);
        assert!(delta.overrides.is_empty());
    }

    #[test]
    fn relation_label_change_resolves_the_same() {
        let a = RelationTarget {
            table: TableId(2),
            mode: RelationMode::Single,
            variant: VariantId::DEFAULT,
            display_column: Some(ColumnId(1)),
            label: "Owner".into(),
        };
        let mut b = a.clone();
        b.label = "Assigned to".into();
        assert!(!a.resolves_differently(&b));
        b.mode = RelationMode::Many;
        assert!(a.resolves_differently(&b));
    }
}
