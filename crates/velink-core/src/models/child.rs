use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::{Comparator, Listeners, ModelEvent, ModelHandle, ModelState, Rebuild, Row};
use crate::bus::{Scope, SubscriptionGuard};
use crate::model::{ItemPath, Value};
use crate::tree::{Item, ItemId, ItemTree, TreeEvent};

/// Live list of the direct children of one item, in insertion order.
#[derive(Debug)]
pub struct ChildModel {
    path: ItemPath,
    inner: Arc<Mutex<ChildState>>,
    _subscription: SubscriptionGuard,
}

#[derive(Debug)]
struct ChildState {
    parent: ItemId,
    depth: usize,
    rows: IndexMap<ItemId, Row>,
    state: ModelState,
    listeners: Listeners,
}

impl ChildModel {
    /// Build the model over `path` (resolved if absent) and start tracking.
    pub fn attach(tree: &mut ItemTree, path: &ItemPath) -> Self {
        let parent = tree.resolve(path);
        let inner = Arc::new(Mutex::new(ChildState {
            parent,
            depth: path.len(),
            rows: IndexMap::new(),
            state: ModelState::Empty,
            listeners: Listeners::default(),
        }));
        inner.lock().populate(tree);

        let sink = Arc::clone(&inner);
        let id = tree
            .bus()
            .subscribe(parent, Scope::Subtree, move |event, tree| {
                sink.lock().on_event(event, tree);
            });
        Self {
            path: path.clone(),
            inner,
            _subscription: tree.bus().guard(id),
        }
    }

    pub fn path(&self) -> &ItemPath {
        &self.path
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
        self.inner.lock().rows.values().cloned().collect()
    }

    pub fn row(&self, index: usize) -> Option<Row> {
        self.inner
            .lock()
            .rows
            .get_index(index)
            .map(|(_, row)| row.clone())
    }

    pub fn index_of(&self, path: &ItemPath) -> Option<usize> {
        self.inner
            .lock()
            .rows
            .values()
            .position(|row| &row.path == path)
    }

    /// Receive row events from now on.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ModelEvent> {
        self.inner.lock().listeners.subscribe()
    }

    /// Drop all rows, emit `Reset` and rebuild from the tree.
    pub fn reset(&self, tree: &ItemTree) {
        self.inner.lock().rebuild(tree);
    }

    pub fn handle(&self) -> ModelHandle {
        let inner: Arc<dyn Rebuild> = self.inner.clone();
        ModelHandle(Arc::downgrade(&inner))
    }
}

/// Child models keep arrival order; a comparator does not apply.
impl Rebuild for Mutex<ChildState> {
    fn rebuild(&self, tree: &ItemTree, _comparator: Option<Comparator>) {
        self.lock().rebuild(tree);
    }
}

impl ChildState {
    fn rebuild(&mut self, tree: &ItemTree) {
        self.rows.clear();
        self.state = ModelState::Empty;
        self.listeners.emit(&ModelEvent::Reset);
        self.populate(tree);
    }

    fn populate(&mut self, tree: &ItemTree) {
        for (id, item) in tree.children(self.parent) {
            self.rows.insert(id, child_row(id, item, tree));
        }
        if !self.rows.is_empty() {
            self.state = ModelState::Populated;
        }
    }

    fn on_event(&mut self, event: &TreeEvent, tree: &ItemTree) {
        match event {
            TreeEvent::ChildAdded { parent, child, .. } if *parent == self.parent => {
                let Some(item) = tree.item(*child) else {
                    return;
                };
                let row = child_row(*child, item, tree);
                let index = self.rows.len();
                self.rows.insert(*child, row.clone());
                self.state = ModelState::Populated;
                trace!(index, path = %row.path, "child row inserted");
                self.listeners.emit(&ModelEvent::RowInserted { index, row });
            }
            TreeEvent::ChildRemoved { parent, path } if *parent == self.parent => {
                let Some(index) = self.rows.values().position(|row| &row.path == path) else {
                    return;
                };
                self.rows.shift_remove_index(index);
                self.listeners.emit(&ModelEvent::RowRemoved {
                    index,
                    path: path.clone(),
                });
            }
            _ => self.refresh(event.path(), tree),
        }
    }

    /// Recompute the row that `path` lies in, if any.
    fn refresh(&mut self, path: &ItemPath, tree: &ItemTree) {
        if path.len() <= self.depth {
            return;
        }
        let row_path = path.truncated(self.depth + 1);
        let Some(id) = tree.lookup(&row_path) else {
            return;
        };
        let Some(index) = self.rows.get_index_of(&id) else {
            return;
        };
        let Some(item) = tree.item(id) else {
            return;
        };
        let row = child_row(id, item, tree);
        if let Some(slot) = self.rows.get_mut(&id) {
            if *slot == row {
                return;
            }
            *slot = row.clone();
        }
        self.listeners.emit(&ModelEvent::RowUpdated { index, row });
    }
}

fn child_row(id: ItemId, item: &Item, tree: &ItemTree) -> Row {
    Row {
        item: id,
        path: item.path().clone(),
        value: item.value().clone(),
        live: node_live(item, tree),
        key: Value::Invalid,
        cells: Vec::new(),
    }
}

/// A node is live if it or one of its direct children is backed by a
/// producer. Grouping nodes like `battery/ttyO1` carry no value of their own.
pub(super) fn node_live(item: &Item, tree: &ItemTree) -> bool {
    item.is_live()
        || item
            .children()
            .any(|(_, id)| tree.item(id).is_some_and(Item::is_live))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tree::Mutation;

    fn p(s: &str) -> ItemPath {
        ItemPath::parse(s)
    }

    #[test]
    fn lists_existing_and_new_children_in_insertion_order() {
        let mut tree = ItemTree::new();
        tree.apply(Mutation::value_changed("tank/fresh/level", 40.0))
            .unwrap();
        let model = ChildModel::attach(&mut tree, &p("tank"));
        assert_eq!(model.state(), ModelState::Populated);
        let mut events = model.events();

        tree.apply(Mutation::value_changed("tank/waste/level", 10.0))
            .unwrap();

        let paths: Vec<String> = model.rows().iter().map(|r| r.path.to_string()).collect();
        assert_eq!(paths, vec!["tank/fresh", "tank/waste"]);
        match events.try_recv().unwrap() {
            ModelEvent::RowInserted { index, row } => {
                assert_eq!(index, 1);
                assert!(row.live);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn value_change_updates_row_in_place() {
        let mut tree = ItemTree::new();
        tree.apply(Mutation::value_changed("settings/a", 1_i64))
            .unwrap();
        tree.apply(Mutation::value_changed("settings/b", 2_i64))
            .unwrap();
        let model = ChildModel::attach(&mut tree, &p("settings"));
        let mut events = model.events();

        tree.apply(Mutation::value_changed("settings/b", 3_i64))
            .unwrap();
        tree.apply(Mutation::value_changed("settings/b", 3_i64))
            .unwrap();

        match events.try_recv().unwrap() {
            ModelEvent::RowUpdated { index, row } => {
                assert_eq!(index, 1);
                assert_eq!(row.value, Value::Int(3));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn removal_emits_row_removed() {
        let mut tree = ItemTree::new();
        for name in ["a", "b", "c"] {
            tree.apply(Mutation::ItemAdded {
                path: p(&format!("devices/{name}")),
            })
            .unwrap();
        }
        let model = ChildModel::attach(&mut tree, &p("devices"));
        let mut events = model.events();

        tree.apply(Mutation::ItemRemoved {
            path: p("devices/b"),
        })
        .unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            ModelEvent::RowRemoved {
                index: 1,
                path: p("devices/b")
            }
        );
        assert_eq!(model.len(), 2);
        assert_eq!(model.index_of(&p("devices/c")), Some(1));
    }

    #[test]
    fn empty_stays_populated_until_reset() {
        let mut tree = ItemTree::new();
        let model = ChildModel::attach(&mut tree, &p("grid"));
        assert_eq!(model.state(), ModelState::Empty);

        tree.apply(Mutation::ItemAdded { path: p("grid/x") }).unwrap();
        tree.apply(Mutation::ItemRemoved { path: p("grid/x") })
            .unwrap();
        assert!(model.is_empty());
        assert_eq!(model.state(), ModelState::Populated);

        model.reset(&tree);
        assert_eq!(model.state(), ModelState::Empty);
    }

    #[test]
    fn dropping_the_model_unsubscribes() {
        let mut tree = ItemTree::new();
        let model = ChildModel::attach(&mut tree, &p("solar"));
        assert_eq!(tree.bus().len(), 1);
        drop(model);
        assert!(tree.bus().is_empty());
    }
}
