//! Revision-stamped caches.
//!
//! Three caches share one discipline ([`StampedCache`]):
//!
//! - **row order**: the ordered, filtered row ids a view displays;
//! - **resolved view**: a view's effective columns, sort and filter;
//! - **binding**: the result of evaluating an expression in a table context.
//!
//! Each slot stores the [`Revision`] it was computed at and is valid only
//! while that stamp equals the clock's current revision. Lookup is a linear
//! scan: the number of simultaneously open views and expressions is small.
//! Slots are never evicted individually; [`CacheSet::clear`] drops them on
//! project reset and [`CacheSet::invalidate_all`] poisons every stamp when
//! the clock wraps.
//!
//! Values are handed out as `Arc<V>`, so two reads with no intervening bump
//! return the very same allocation.

pub mod variant;

use std::sync::Arc;

use crate::clock::Revision;
use crate::eval::EvalError;
use crate::model::{
    CellValue, ColumnId, ExprId, InstanceId, RowId, SortKey, Table, TableId, View, ViewFilter,
    ViewId,
};

pub use variant::{VariantCache, VariantSnapshot, materialize};

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// `(table, view-or-expression, instance)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey<S> {
    pub table: TableId,
    pub selector: S,
    pub instance: InstanceId,
}

impl<S> CacheKey<S> {
    pub const fn new(table: TableId, selector: S, instance: InstanceId) -> Self {
        Self {
            table,
            selector,
            instance,
        }
    }
}

/// Key for row-order and resolved-view entries. `None` is the table's
/// implicit default view.
pub type ViewKey = CacheKey<Option<ViewId>>;

/// Key for binding-result entries.
pub type BindingKey = CacheKey<ExprId>;

// ---------------------------------------------------------------------------
// StampedCache
// ---------------------------------------------------------------------------

/// One cache slot.
#[derive(Debug)]
pub struct Slot<K, V> {
    key: K,
    stamp: Revision,
    value: Option<Arc<V>>,
}

impl<K, V> Slot<K, V> {
    #[must_use]
    pub fn is_valid_at(&self, current: Revision) -> bool {
        self.stamp == current && self.value.is_some()
    }

    #[must_use]
    pub const fn stamp(&self) -> Revision {
        self.stamp
    }

    /// The cached value regardless of stamp.
    #[must_use]
    pub fn value(&self) -> Option<&Arc<V>> {
        self.value.as_ref()
    }

    /// Overwrite the slot with a freshly computed value.
    pub fn store(&mut self, value: V, stamp: Revision) -> Arc<V> {
        let value = Arc::new(value);
        self.value = Some(Arc::clone(&value));
        self.stamp = stamp;
        value
    }
}

#[derive(Debug)]
pub struct StampedCache<K, V> {
    slots: Vec<Slot<K, V>>,
    hits: u64,
    misses: u64,
}

impl<K, V> Default for StampedCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            hits: 0,
            misses: 0,
        }
    }
}

impl<K: PartialEq, V> StampedCache<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The value for `key` if its stamp equals `current`.
    #[must_use]
    pub fn get(&self, key: &K, current: Revision) -> Option<Arc<V>> {
        self.slots
            .iter()
            .find(|slot| slot.key == *key)
            .filter(|slot| slot.stamp == current)
            .and_then(|slot| slot.value.clone())
    }

    /// The slot for `key`, created empty (with an invalid stamp) if absent.
    pub fn get_or_create(&mut self, key: K) -> &mut Slot<K, V> {
        let index = match self.slots.iter().position(|slot| slot.key == key) {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    key,
                    stamp: Revision::INVALID,
                    value: None,
                });
                self.slots.len() - 1
            }
        };
        &mut self.slots[index]
    }

    /// Return the cached value if valid, otherwise compute, store and return it.
    pub fn get_or_compute(
        &mut self,
        key: K,
        current: Revision,
        compute: impl FnOnce() -> V,
    ) -> Arc<V> {
        let slot_valid = self
            .slots
            .iter()
            .any(|slot| slot.key == key && slot.is_valid_at(current));
        if slot_valid {
            self.hits += 1;
        } else {
            self.misses += 1;
            tracing::debug!(
                structural = current.structural,
                live_value = current.live_value,
                "cache miss, recomputing"
            );
        }
        let slot = self.get_or_create(key);
        if slot_valid && let Some(value) = slot.value() {
            return Arc::clone(value);
        }
        slot.store(compute(), current)
    }

    /// Poison every stamp so the next read of each slot recomputes.
    pub fn invalidate_all(&mut self) {
        for slot in &mut self.slots {
            slot.stamp = Revision::INVALID;
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// `(hits, misses)` since construction.
    #[must_use]
    pub const fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

// ---------------------------------------------------------------------------
// Cached computations
// ---------------------------------------------------------------------------

/// A view's effective configuration against the table's current schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedView {
    /// Visible columns, in table order.
    pub columns: Vec<ColumnId>,
    /// Sort keys whose columns still exist. Empty means declaration order.
    pub sort: Vec<SortKey>,
    pub filter: Option<ViewFilter>,
}

/// Resolve `view` (or the implicit default view) against `table`.
///
/// Sort keys and filters that name deleted columns are dropped.
#[must_use]
pub fn resolve_view(table: &Table, view: Option<&View>) -> ResolvedView {
    let Some(view) = view else {
        return ResolvedView {
            columns: table.columns.iter().map(|c| c.id).collect(),
            sort: Vec::new(),
            filter: None,
        };
    };
    let exists = |column: ColumnId| table.column(column).is_some();
    ResolvedView {
        columns: table
            .columns
            .iter()
            .map(|c| c.id)
            .filter(|id| !view.hidden_columns.contains(id))
            .collect(),
        sort: view
            .sort
            .iter()
            .copied()
            .filter(|key| exists(key.column))
            .collect(),
        filter: view.filter.clone().filter(|f| exists(f.column)),
    }
}

/// Row ids in display order for a resolved view.
///
/// Filtering keeps rows whose cell equals the filter value. Sorting is
/// stable, so ties keep declaration order.
#[must_use]
pub fn row_order(table: &Table, resolved: &ResolvedView) -> Vec<RowId> {
    let mut rows: Vec<_> = table
        .rows
        .iter()
        .filter(|row| {
            resolved
                .filter
                .as_ref()
                .is_none_or(|f| row.cell(f.column).value == f.equals)
        })
        .collect();
    if !resolved.sort.is_empty() {
        rows.sort_by(|a, b| {
            resolved
                .sort
                .iter()
                .map(|key| {
                    let ord = a
                        .cell(key.column)
                        .value
                        .sort_cmp(&b.cell(key.column).value);
                    if key.descending { ord.reverse() } else { ord }
                })
                .find(|ord| ord.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    rows.into_iter().map(|row| row.id).collect()
}

/// Outcome of evaluating a bound expression. Errors are cached too, so a
/// failing expression is not re-evaluated every frame.
pub type BindingResult = Result<CellValue, EvalError>;

// ---------------------------------------------------------------------------
// CacheSet
// ---------------------------------------------------------------------------

/// Every cache the interactive side owns.
#[derive(Debug, Default)]
pub struct CacheSet {
    pub row_order: StampedCache<ViewKey, Vec<RowId>>,
    pub resolved_view: StampedCache<ViewKey, ResolvedView>,
    pub binding: StampedCache<BindingKey, BindingResult>,
    pub variants: VariantCache,
}

impl CacheSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Poison every stamp. Used when the revision clock wraps.
    pub fn invalidate_all(&mut self) {
        self.row_order.invalidate_all();
        self.resolved_view.invalidate_all();
        self.binding.invalidate_all();
        self.variants.invalidate_all();
    }

    /// Drop every entry. Used on project load, reload and replacement.
    pub fn clear(&mut self) {
        self.row_order.clear();
        self.resolved_view.clear();
        self.binding.clear();
        self.variants.clear();
    }

    /// Total `(hits, misses)` across the three stamped caches.
    #[must_use]
    pub const fn stats(&self) -> (u64, u64) {
        let (a_hits, a_misses) = self.row_order.stats();
        let (b_hits, b_misses) = self.resolved_view.stats();
        let (c_hits, c_misses) = self.binding.stats();
        (a_hits + b_hits + c_hits, a_misses + b_misses + c_misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Bump, RevisionClock};
    use crate::model::{Column, Row};

    fn key() -> ViewKey {
        CacheKey::new(TableId(1), Some(ViewId(1)), InstanceId(0))
    }

    #[test]
    fn second_read_without_bump_returns_same_allocation() {
        let clock = RevisionClock::new();
        let mut cache: StampedCache<ViewKey, Vec<u32>> = StampedCache::new();
        let mut computed = 0;
        let first = cache.get_or_compute(key(), clock.current(), || {
            computed += 1;
            vec![1, 2, 3]
        });
        let second = cache.get_or_compute(key(), clock.current(), || {
            computed += 1;
            vec![9]
        });
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(computed, 1);
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn bump_forces_recompute() {
        let mut clock = RevisionClock::new();
        let mut cache: StampedCache<ViewKey, u32> = StampedCache::new();
        let first = cache.get_or_compute(key(), clock.current(), || 1);
        assert_eq!(clock.bump_structural(), Bump::Advanced);
        assert!(cache.get(&key(), clock.current()).is_none());
        let second = cache.get_or_compute(key(), clock.current(), || 2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 2);

        assert_eq!(clock.bump_live_value(), Bump::Advanced);
        assert!(cache.get(&key(), clock.current()).is_none());
    }

    #[test]
    fn invalidate_all_poisons_even_matching_clock() {
        let clock = RevisionClock::new();
        let mut cache: StampedCache<ViewKey, u32> = StampedCache::new();
        cache.get_or_compute(key(), clock.current(), || 1);
        cache.invalidate_all();
        assert!(cache.get(&key(), clock.current()).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_or_create_slot_starts_invalid() {
        let clock = RevisionClock::new();
        let mut cache: StampedCache<ViewKey, u32> = StampedCache::new();
        let slot = cache.get_or_create(key());
        assert!(!slot.is_valid_at(clock.current()));
        slot.store(7, clock.current());
        assert_eq!(cache.get(&key(), clock.current()).as_deref(), Some(&7));
    }

    #[test]
    fn distinct_instances_are_distinct_entries() {
        let clock = RevisionClock::new();
        let mut cache: StampedCache<ViewKey, u32> = StampedCache::new();
        cache.get_or_compute(key(), clock.current(), || 1);
        let other = CacheKey::new(TableId(1), Some(ViewId(1)), InstanceId(1));
        assert_eq!(*cache.get_or_compute(other, clock.current(), || 2), 2);
        assert_eq!(cache.len(), 2);
    }

    fn table() -> Table {
        let mut t = Table::new(TableId(1), "T");
        t.columns.push(Column::value(ColumnId(1), "Name"));
        t.columns.push(Column::value(ColumnId(2), "Qty"));
        for (id, name, qty) in [(1, "c", 2.0), (2, "a", 1.0), (3, "b", 2.0)] {
            t.rows.push(
                Row::new(RowId(id))
                    .with(ColumnId(1), CellValue::Text(name.into()))
                    .with(ColumnId(2), CellValue::Number(qty)),
            );
        }
        t
    }

    #[test]
    fn default_view_keeps_declaration_order() {
        let t = table();
        let resolved = resolve_view(&t, None);
        assert_eq!(resolved.columns, vec![ColumnId(1), ColumnId(2)]);
        assert_eq!(row_order(&t, &resolved), vec![RowId(1), RowId(2), RowId(3)]);
    }

    #[test]
    fn sort_is_stable_and_honours_direction() {
        let t = table();
        let mut view = View::new(ViewId(1), "by qty");
        view.sort.push(SortKey {
            column: ColumnId(2),
            descending: true,
        });
        let resolved = resolve_view(&t, Some(&view));
        assert_eq!(row_order(&t, &resolved), vec![RowId(1), RowId(3), RowId(2)]);
    }

    #[test]
    fn filter_and_hidden_columns() {
        let t = table();
        let mut view = View::new(ViewId(1), "twos");
        view.hidden_columns.insert(ColumnId(1));
        view.filter = Some(ViewFilter {
            column: ColumnId(2),
            equals: CellValue::Number(2.0),
        });
        let resolved = resolve_view(&t, Some(&view));
        assert_eq!(resolved.columns, vec![ColumnId(2)]);
        assert_eq!(row_order(&t, &resolved), vec![RowId(1), RowId(3)]);
    }

    #[test]
    fn keys_on_deleted_columns_are_dropped() {
        let t = table();
        let mut view = View::new(ViewId(1), "stale");
        view.sort.push(SortKey {
            column: ColumnId(9),
            descending: false,
        });
        view.filter = Some(ViewFilter {
            column: ColumnId(9),
            equals: CellValue::Empty,
        });
        let resolved = resolve_view(&t, Some(&view));
        assert!(resolved.sort.is_empty());
        assert!(resolved.filter.is_none());
    }
}
