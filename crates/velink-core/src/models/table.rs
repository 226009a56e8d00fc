use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::child::node_live;
use super::{Listeners, ModelEvent, ModelHandle, ModelState, Rebuild, Row};
use crate::bus::{Scope, SubscriptionGuard};
use crate::model::{ItemPath, PathPattern, Value};
use crate::tree::{Item, ItemId, ItemTree, TreeEvent};

// ── Sort keys and comparators ────────────────────────────────────────

/// Where a row's sort key (or a column value) comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    /// The row item's own name.
    Name,
    /// The row item's own value.
    Value,
    /// The value of a descendant, e.g. `name` for `devices/*`.
    Child(ItemPath),
}

impl SortKey {
    pub fn child(rel: &str) -> Self {
        Self::Child(ItemPath::parse(rel))
    }

    fn extract(&self, item: &Item, tree: &ItemTree) -> Value {
        match self {
            Self::Name => Value::String(item.name().to_owned()),
            Self::Value => item.value().clone(),
            Self::Child(rel) => tree.value(&item.path().join(rel)),
        }
    }
}

type KeyOrder = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;

/// Row ordering: a key, a direction and an optional custom key order.
/// Equal keys always fall back to ascending path order.
#[derive(Clone)]
pub struct Comparator {
    key: SortKey,
    descending: bool,
    custom: Option<KeyOrder>,
}

impl Comparator {
    pub fn ascending(key: SortKey) -> Self {
        Self {
            key,
            descending: false,
            custom: None,
        }
    }

    pub fn descending(key: SortKey) -> Self {
        Self {
            key,
            descending: true,
            custom: None,
        }
    }

    /// Replace the default key order ([`Value::sort_cmp`]).
    pub fn with_order<F>(mut self, order: F) -> Self
    where
        F: Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(order));
        self
    }

    pub fn key(&self) -> &SortKey {
        &self.key
    }

    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        self.compare_parts(&a.key, &a.path, &b.key, &b.path)
    }

    fn compare_parts(&self, a_key: &Value, a_path: &ItemPath, b_key: &Value, b_path: &ItemPath) -> Ordering {
        let ord = match &self.custom {
            Some(order) => order(a_key, b_key),
            None => a_key.sort_cmp(b_key),
        };
        let ord = if self.descending { ord.reverse() } else { ord };
        ord.then_with(|| a_path.cmp(b_path))
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comparator")
            .field("key", &self.key)
            .field("descending", &self.descending)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

type RowFilter = Arc<dyn Fn(&Row) -> bool + Send + Sync>;

/// What a table shows and how it is ordered.
#[derive(Clone)]
pub struct TableSpec {
    /// Items that become rows, e.g. `devices/*`.
    pub scope: PathPattern,
    pub comparator: Comparator,
    pub columns: Vec<SortKey>,
    pub filter: Option<RowFilter>,
}

impl TableSpec {
    pub fn new(scope: &str, comparator: Comparator) -> Self {
        Self {
            scope: PathPattern::parse(scope),
            comparator,
            columns: Vec::new(),
            filter: None,
        }
    }

    pub fn with_columns(mut self, columns: Vec<SortKey>) -> Self {
        self.columns = columns;
        self
    }

    /// Keep only rows for which `filter` returns true. Re-evaluated on
    /// every row change, so rows enter and leave the table as they change.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }
}

impl fmt::Debug for TableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSpec")
            .field("scope", &self.scope)
            .field("comparator", &self.comparator)
            .field("columns", &self.columns)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

// ── SortTableModel ───────────────────────────────────────────────────

/// Continuously sorted, optionally filtered table over the items matching
/// a pattern. Inserts use binary search; an update moves a row only when
/// its new key changes its position.
#[derive(Debug)]
pub struct SortTableModel {
    inner: Arc<Mutex<TableState>>,
    _subscription: SubscriptionGuard,
}

#[derive(Debug)]
struct TableState {
    spec: TableSpec,
    rows: Vec<Row>,
    /// Cached key per row path, for locating rows by binary search.
    keys: HashMap<ItemPath, Value>,
    state: ModelState,
    listeners: Listeners,
}

impl SortTableModel {
    pub fn attach(tree: &mut ItemTree, spec: TableSpec) -> Self {
        let anchor = tree.resolve(&spec.scope.fixed_prefix());
        let inner = Arc::new(Mutex::new(TableState {
            spec,
            rows: Vec::new(),
            keys: HashMap::new(),
            state: ModelState::Empty,
            listeners: Listeners::default(),
        }));
        inner.lock().populate(tree);

        let sink = Arc::clone(&inner);
        let id = tree
            .bus()
            .subscribe(anchor, Scope::Subtree, move |event, tree| {
                sink.lock().on_event(event, tree);
            });
        Self {
            inner,
            _subscription: tree.bus().guard(id),
        }
    }

    pub fn state(&self) -> ModelState {
        self.inner.lock().state
    }

    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rows(&self) -> Vec<Row> {
        self.inner.lock().rows.clone()
    }

    pub fn row(&self, index: usize) -> Option<Row> {
        self.inner.lock().rows.get(index).cloned()
    }

    /// Row paths in display order.
    pub fn paths(&self) -> Vec<ItemPath> {
        self.inner.lock().rows.iter().map(|r| r.path.clone()).collect()
    }

    pub fn index_of(&self, path: &ItemPath) -> Option<usize> {
        self.inner.lock().index_of(path)
    }

    pub fn events(&self) -> mpsc::UnboundedReceiver<ModelEvent> {
        self.inner.lock().listeners.subscribe()
    }

    /// Switch ordering. Rows are re-sorted and listeners get `Reset`.
    pub fn set_comparator(&self, tree: &ItemTree, comparator: Comparator) {
        let mut state = self.inner.lock();
        state.spec.comparator = comparator;
        state.rebuild(tree);
    }

    pub fn reset(&self, tree: &ItemTree) {
        self.inner.lock().rebuild(tree);
    }

    pub fn handle(&self) -> ModelHandle {
        let inner: Arc<dyn Rebuild> = self.inner.clone();
        ModelHandle(Arc::downgrade(&inner))
    }
}

impl Rebuild for Mutex<TableState> {
    fn rebuild(&self, tree: &ItemTree, comparator: Option<Comparator>) {
        let mut state = self.lock();
        if let Some(comparator) = comparator {
            state.spec.comparator = comparator;
        }
        state.rebuild(tree);
    }
}

impl TableState {
    fn rebuild(&mut self, tree: &ItemTree) {
        self.rows.clear();
        self.keys.clear();
        self.state = ModelState::Empty;
        self.listeners.emit(&ModelEvent::Reset);
        self.populate(tree);
    }

    fn populate(&mut self, tree: &ItemTree) {
        let mut rows: Vec<Row> = tree
            .find(&self.spec.scope)
            .into_iter()
            .filter_map(|id| tree.item(id).map(|item| self.build_row(id, item, tree)))
            .filter(|row| self.accepts(row))
            .collect();
        rows.sort_by(|a, b| self.spec.comparator.compare(a, b));
        self.keys = rows.iter().map(|r| (r.path.clone(), r.key.clone())).collect();
        self.rows = rows;
        if !self.rows.is_empty() {
            self.state = ModelState::Populated;
        }
    }

    fn build_row(&self, id: ItemId, item: &Item, tree: &ItemTree) -> Row {
        Row {
            item: id,
            path: item.path().clone(),
            value: item.value().clone(),
            live: node_live(item, tree),
            key: self.spec.comparator.key.extract(item, tree),
            cells: self
                .spec
                .columns
                .iter()
                .map(|c| c.extract(item, tree))
                .collect(),
        }
    }

    fn accepts(&self, row: &Row) -> bool {
        self.spec.filter.as_ref().is_none_or(|f| f(row))
    }

    fn on_event(&mut self, event: &TreeEvent, tree: &ItemTree) {
        let Some(row_path) = self.spec.scope.enclosing_match(event.path()) else {
            // An ancestor of whole rows went away.
            if let TreeEvent::ChildRemoved { path, .. } = event {
                self.remove_below(path);
            }
            return;
        };
        match event {
            TreeEvent::ChildRemoved { path, .. } if *path == row_path => {
                if let Some(index) = self.index_of(&row_path) {
                    self.remove_at(index);
                }
            }
            _ => self.refresh(&row_path, tree),
        }
    }

    fn refresh(&mut self, path: &ItemPath, tree: &ItemTree) {
        let candidate = tree
            .lookup(path)
            .and_then(|id| tree.item(id).map(|item| self.build_row(id, item, tree)))
            .filter(|row| self.accepts(row));
        match (self.index_of(path), candidate) {
            (None, None) => {}
            (None, Some(row)) => self.insert(row),
            (Some(index), None) => self.remove_at(index),
            (Some(index), Some(row)) => self.update(index, row),
        }
    }

    fn insertion_point(&self, row: &Row) -> usize {
        self.rows
            .partition_point(|r| self.spec.comparator.compare(r, row) == Ordering::Less)
    }

    fn index_of(&self, path: &ItemPath) -> Option<usize> {
        let key = self.keys.get(path)?;
        self.rows
            .binary_search_by(|r| {
                self.spec
                    .comparator
                    .compare_parts(&r.key, &r.path, key, path)
            })
            .ok()
            .or_else(|| self.rows.iter().position(|r| &r.path == path))
    }

    fn insert(&mut self, row: Row) {
        let index = self.insertion_point(&row);
        self.keys.insert(row.path.clone(), row.key.clone());
        self.rows.insert(index, row.clone());
        self.state = ModelState::Populated;
        trace!(index, path = %row.path, "table row inserted");
        self.listeners.emit(&ModelEvent::RowInserted { index, row });
    }

    fn remove_at(&mut self, index: usize) {
        if index >= self.rows.len() {
            return;
        }
        let row = self.rows.remove(index);
        self.keys.remove(&row.path);
        self.listeners.emit(&ModelEvent::RowRemoved {
            index,
            path: row.path,
        });
    }

    fn remove_below(&mut self, prefix: &ItemPath) {
        while let Some(index) = self.rows.iter().position(|r| r.path.starts_with(prefix)) {
            self.remove_at(index);
        }
    }

    fn update(&mut self, index: usize, row: Row) {
        let Some(current) = self.rows.get_mut(index) else {
            return;
        };
        if *current == row {
            return;
        }
        if current.key == row.key {
            *current = row.clone();
            self.listeners.emit(&ModelEvent::RowUpdated { index, row });
            return;
        }

        self.rows.remove(index);
        let to = self.insertion_point(&row);
        self.keys.insert(row.path.clone(), row.key.clone());
        self.rows.insert(to, row.clone());
        let event = if to == index {
            ModelEvent::RowUpdated { index, row }
        } else {
            trace!(from = index, to, path = %row.path, "table row moved");
            ModelEvent::RowMoved {
                from: index,
                to,
                row,
            }
        };
        self.listeners.emit(&event);
    }
}
