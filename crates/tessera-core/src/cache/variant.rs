//! Variant materialization.
//!
//! A non-default variant is stored as a [`VariantDelta`] against its table.
//! Materializing it produces a full [`Table`] with the delta applied on top
//! of a structural clone of the base:
//!
//! 1. base rows minus deleted ids;
//! 2. every row trimmed to the columns the table still declares;
//! 3. added rows appended (derived tables: merged into a same-id row);
//! 4. cell overrides applied by `(row, column)`. Unknown ids are dropped,
//!    except that on derived tables an override for a missing row
//!    synthesizes that row.
//!
//! Snapshots are cached per `(table, variant)` and stamped with the
//! structural revision only: preview edits never change variant output.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::StampedCache;
use crate::clock::Revision;
use crate::model::{Cell, ColumnId, Row, RowId, Table, TableId, VariantDelta, VariantId};

/// A fully materialized variant plus a row-by-id index.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantSnapshot {
    pub variant: VariantId,
    pub table: Table,
    row_index: BTreeMap<RowId, usize>,
}

impl VariantSnapshot {
    fn new(variant: VariantId, table: Table) -> Self {
        let row_index = table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.id, i))
            .collect();
        Self {
            variant,
            table,
            row_index,
        }
    }

    #[must_use]
    pub fn row(&self, id: RowId) -> Option<&Row> {
        self.row_index.get(&id).map(|&i| &self.table.rows[i])
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.table.rows.len()
    }
}

/// Materialize `variant` of `table`. The default variant is the table itself.
///
/// Returns `None` if the table declares no such variant.
#[must_use]
pub fn materialize(table: &Table, variant: VariantId) -> Option<VariantSnapshot> {
    if variant.is_default() {
        let mut base = table.clone();
        base.variants.clear();
        return Some(VariantSnapshot::new(variant, base));
    }
    let delta = table.variant(variant)?;
    let materialized = if table.is_derived() {
        materialize_derived(table, delta)
    } else {
        materialize_base(table, delta)
    };
    Some(VariantSnapshot::new(variant, materialized))
}

/// Materialize a variant of a plain (non-derived) table.
#[must_use]
pub fn materialize_base(table: &Table, delta: &VariantDelta) -> Table {
    let columns = table.column_ids();
    let mut out = skeleton(table);
    out.rows = surviving_rows(table, delta, &columns);
    out.rows
        .extend(delta.added_rows.iter().map(|row| trimmed(row, &columns)));

    for o in &delta.overrides {
        if !columns.contains(&o.column) {
            continue;
        }
        if let Some(row) = out.row_mut(o.row) {
            row.cells.insert(o.column, Cell::value(o.value.clone()));
        }
    }
    out
}

/// Materialize a variant of a derived table, whose base rows are evaluation
/// output and whose delta may refer to rows evaluation has not produced.
#[must_use]
pub fn materialize_derived(table: &Table, delta: &VariantDelta) -> Table {
    let columns = table.column_ids();
    let mut out = skeleton(table);
    out.rows = surviving_rows(table, delta, &columns);

    for added in &delta.added_rows {
        let added = trimmed(added, &columns);
        match out.row_mut(added.id) {
            Some(existing) => existing.cells.extend(added.cells),
            None => out.rows.push(added),
        }
    }

    for o in &delta.overrides {
        if !columns.contains(&o.column) {
            continue;
        }
        let cell = Cell::value(o.value.clone());
        match out.row_mut(o.row) {
            Some(row) => {
                row.cells.insert(o.column, cell);
            }
            None => {
                let mut row = Row::new(o.row);
                row.cells.insert(o.column, cell);
                out.rows.push(row);
            }
        }
    }
    out
}

/// The table without rows or variant deltas.
fn skeleton(table: &Table) -> Table {
    let mut out = Table::new(table.id, table.name.clone());
    out.columns.clone_from(&table.columns);
    out.variables.clone_from(&table.variables);
    out.views.clone_from(&table.views);
    out.schema_link = table.schema_link;
    out.inherits = table.inherits;
    out.derived.clone_from(&table.derived);
    out
}

fn surviving_rows(table: &Table, delta: &VariantDelta, columns: &BTreeSet<ColumnId>) -> Vec<Row> {
    table
        .rows
        .iter()
        .filter(|row| !delta.deleted_rows.contains(&row.id))
        .map(|row| trimmed(row, columns))
        .collect()
}

fn trimmed(row: &Row, columns: &BTreeSet<ColumnId>) -> Row {
    let mut row = row.clone();
    row.retain_columns(columns);
    row
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Snapshot cache keyed by `(table, variant)`.
#[derive(Debug, Default)]
pub struct VariantCache {
    inner: StampedCache<(TableId, VariantId), VariantSnapshot>,
}

/// Variant entries ignore the live-value counter.
const fn structural_stamp(current: Revision) -> Revision {
    Revision::new(current.structural, 0)
}

impl VariantCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached snapshot for `(table, variant)` at `current`, rebuilding it if
    /// the structural revision moved. `None` if the variant does not exist.
    pub fn get_or_materialize(
        &mut self,
        table: &Table,
        variant: VariantId,
        current: Revision,
    ) -> Option<Arc<VariantSnapshot>> {
        let key = (table.id, variant);
        let stamp = structural_stamp(current);
        if let Some(hit) = self.inner.get(&key, stamp) {
            return Some(hit);
        }
        let snapshot = materialize(table, variant)?;
        tracing::debug!(
            table = %table.id,
            variant = %variant,
            rows = snapshot.row_count(),
            "materialized variant"
        );
        Some(self.inner.get_or_create(key).store(snapshot, stamp))
    }

    pub fn invalidate_all(&mut self) {
        self.inner.invalidate_all();
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Bump, RevisionClock};
    use crate::model::{CellOverride, CellValue, Column, DerivedConfig};

    fn table() -> Table {
        let mut t = Table::new(TableId(1), "Parts");
        t.columns.push(Column::value(ColumnId(1), "Name"));
        t.columns.push(Column::value(ColumnId(2), "Qty"));
        t.rows.push(
            Row::new(RowId(1))
                .with(ColumnId(1), CellValue::Text("bolt".into()))
                .with(ColumnId(2), CellValue::Number(4.0)),
        );
        t.rows.push(
            Row::new(RowId(2))
                .with(ColumnId(1), CellValue::Text("nut".into()))
                .with(ColumnId(2), CellValue::Number(8.0)),
        );
        t
    }

    fn delta() -> VariantDelta {
        let mut d = VariantDelta::new(VariantId(1), "what-if");
        d.deleted_rows.insert(RowId(2));
        d.added_rows.push(
            Row::new(RowId(3))
                .with(ColumnId(1), CellValue::Text("washer".into()))
                .with(ColumnId(99), CellValue::Bool(true)),
        );
        d.overrides.push(CellOverride {
            row: RowId(1),
            column: ColumnId(2),
            value: CellValue::Number(5.0),
        });
        d.overrides.push(CellOverride {
            row: RowId(42),
            column: ColumnId(2),
            value: CellValue::Number(1.0),
        });
        d.overrides.push(CellOverride {
            row: RowId(1),
            column: ColumnId(77),
            value: CellValue::Number(1.0),
        });
        d
    }

    #[test]
    fn base_variant_applies_delete_add_override() {
        let out = materialize_base(&table(), &delta());
        let ids: Vec<_> = out.rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RowId(1), RowId(3)]);
        assert_eq!(
            out.rows[0].cell(ColumnId(2)).value,
            CellValue::Number(5.0)
        );
        // Unknown column on the added row is trimmed.
        assert!(!out.rows[1].cells.contains_key(&ColumnId(99)));
        // Overrides on unknown rows/columns are dropped.
        assert!(out.row(RowId(42)).is_none());
        assert!(!out.rows[0].cells.contains_key(&ColumnId(77)));
    }

    #[test]
    fn derived_variant_merges_and_synthesizes() {
        let mut t = table();
        t.derived = Some(DerivedConfig {
            source: TableId(9),
            filter_column: None,
            group_by: Vec::new(),
        });
        let mut d = delta();
        d.added_rows
            .push(Row::new(RowId(1)).with(ColumnId(1), CellValue::Text("big bolt".into())));

        let out = materialize_derived(&t, &d);
        let ids: Vec<_> = out.rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RowId(1), RowId(3), RowId(42)]);
        let merged = out.row(RowId(1)).expect("row 1");
        assert_eq!(
            merged.cell(ColumnId(1)).value,
            CellValue::Text("big bolt".into())
        );
        assert_eq!(merged.cell(ColumnId(2)).value, CellValue::Number(5.0));
        assert_eq!(
            out.row(RowId(42)).expect("synthesized").cell(ColumnId(2)).value,
            CellValue::Number(1.0)
        );
    }

    #[test]
    fn materialize_is_idempotent() {
        let mut t = table();
        t.variants.push(delta());
        let a = materialize(&t, VariantId(1)).expect("variant");
        let b = materialize(&t, VariantId(1)).expect("variant");
        assert_eq!(a, b);
        assert_eq!(a.row(RowId(3)).map(|r| r.id), Some(RowId(3)));
        assert!(a.table.variants.is_empty());
    }

    #[test]
    fn unknown_variant_is_none() {
        assert!(materialize(&table(), VariantId(5)).is_none());
        assert!(materialize(&table(), VariantId::DEFAULT).is_some());
    }

    #[test]
    fn cache_ignores_live_value_bumps_but_not_structural() {
        let mut t = table();
        t.variants.push(delta());
        let mut clock = RevisionClock::new();
        let mut cache = VariantCache::new();

        let first = cache
            .get_or_materialize(&t, VariantId(1), clock.current())
            .expect("snapshot");
        assert_eq!(clock.bump_live_value(), Bump::Advanced);
        let second = cache
            .get_or_materialize(&t, VariantId(1), clock.current())
            .expect("snapshot");
        assert!(Arc::ptr_eq(&first, &second));

        assert_eq!(clock.bump_structural(), Bump::Advanced);
        let third = cache
            .get_or_materialize(&t, VariantId(1), clock.current())
            .expect("snapshot");
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
        assert_eq!(cache.len(), 1);
    }
}
