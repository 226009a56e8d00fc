// ── Item tree & registry ──
//
// Arena-backed hierarchy of items. All mutation goes through `&mut self`,
// which the session loop alone holds, so the tree is never mutated from
// two places at once. Every logical change queues exactly one event;
// queued events are delivered to the notification bus after the mutation
// completes, so observers always see a consistent tree.

mod event;
mod item;

use std::collections::VecDeque;

use chrono::Utc;
use slotmap::SlotMap;
use tracing::{debug, trace};

use crate::bus::{NotificationBus, Scope, SubscriptionId};
use crate::error::CoreError;
use crate::model::{ItemPath, PathPattern, Value};

pub use event::{Mutation, TreeEvent};
pub use item::{Item, ItemId, ItemSnapshot};

pub struct ItemTree {
    items: SlotMap<ItemId, Item>,
    root: ItemId,
    bus: NotificationBus,
    pending: VecDeque<TreeEvent>,
    connected: bool,
    /// Roots of subtrees the producer removed while they were observed.
    retained: Vec<ItemId>,
}

impl Default for ItemTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemTree {
    pub fn new() -> Self {
        Self::with_bus(NotificationBus::new())
    }

    pub fn with_bus(bus: NotificationBus) -> Self {
        let mut items = SlotMap::with_key();
        let root = items.insert(Item::placeholder(String::new(), ItemPath::root(), None));
        Self {
            items,
            root,
            bus,
            pending: VecDeque::new(),
            connected: false,
            retained: Vec::new(),
        }
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn root(&self) -> ItemId {
        self.root
    }

    /// Number of items, including the root.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.len() <= 1
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    // ── Lookup ───────────────────────────────────────────────────────

    /// Return the item at `path`, creating it and any missing ancestors as
    /// placeholders. Never fails; O(depth).
    pub fn resolve(&mut self, path: &ItemPath) -> ItemId {
        let id = self.resolve_queued(path);
        self.flush();
        id
    }

    /// Find the item at `path` without creating anything.
    pub fn lookup(&self, path: &ItemPath) -> Option<ItemId> {
        path.segments().iter().try_fold(self.root, |current, name| {
            self.items.get(current).and_then(|item| item.child(name))
        })
    }

    pub fn get(&self, path: &ItemPath) -> Result<&Item, CoreError> {
        self.lookup(path)
            .and_then(|id| self.items.get(id))
            .ok_or_else(|| CoreError::PathNotFound {
                path: path.to_string(),
            })
    }

    /// `None` once the item has been destroyed.
    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn children(&self, id: ItemId) -> impl Iterator<Item = (ItemId, &Item)> + '_ {
        self.items
            .get(id)
            .into_iter()
            .flat_map(|item| item.children.values())
            .filter_map(move |child| self.items.get(*child).map(|item| (*child, item)))
    }

    /// `id` followed by its parent chain up to the root.
    pub fn ancestors(&self, id: ItemId) -> impl Iterator<Item = ItemId> + '_ {
        std::iter::successors(Some(id), move |current| {
            self.items.get(*current).and_then(|item| item.parent)
        })
        .filter(move |id| self.items.contains_key(*id))
    }

    /// Value of the item at `path`, `Invalid` if there is none.
    pub fn value(&self, path: &ItemPath) -> Value {
        self.get(path).map(|i| i.value.clone()).unwrap_or_default()
    }

    /// All items matching `pattern`, in tree order.
    pub fn find(&self, pattern: &PathPattern) -> Vec<ItemId> {
        let prefix = pattern.fixed_prefix();
        let Some(start) = self.lookup(&prefix) else {
            return Vec::new();
        };
        let target_depth = pattern.len();
        let mut found = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let Some(item) = self.items.get(id) else {
                continue;
            };
            if item.path.len() == target_depth {
                if pattern.matches(&item.path) {
                    found.push(id);
                }
                continue;
            }
            stack.extend(item.children.values().rev().copied());
        }
        found
    }

    /// Snapshots of every item at or below `prefix` (root excluded),
    /// sorted by path.
    pub fn dump(&self, prefix: &ItemPath) -> Vec<ItemSnapshot> {
        let Some(start) = self.lookup(prefix) else {
            return Vec::new();
        };
        let mut out: Vec<ItemSnapshot> = self
            .subtree(start)
            .into_iter()
            .filter(|id| *id != self.root)
            .filter_map(|id| self.items.get(id).map(Item::snapshot))
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    // ── Writes from consumers ────────────────────────────────────────

    /// Validate a consumer write. On success the caller forwards the
    /// request to the transport; the tree itself changes only when the
    /// producer echoes the new value.
    pub fn set_value(&self, path: &ItemPath, value: &Value) -> Result<(), CoreError> {
        if !self.connected {
            return Err(CoreError::rejected(path, "transport disconnected"));
        }
        let Some(item) = self.lookup(path).and_then(|id| self.items.get(id)) else {
            return Err(CoreError::rejected(path, "no producer for this path"));
        };
        if !item.live {
            return Err(CoreError::rejected(path, "producer is offline"));
        }
        if !item.writable {
            return Err(CoreError::rejected(path, "item is read-only"));
        }
        trace!(%path, %value, "write accepted");
        Ok(())
    }

    // ── Mutations from producers ─────────────────────────────────────

    /// Apply one canonical mutation and deliver the resulting events.
    pub fn apply(&mut self, mutation: Mutation) -> Result<(), CoreError> {
        self.collect_queued();
        let result = match mutation {
            Mutation::ValueChanged { path, value } => {
                if path.is_root() {
                    Err(CoreError::InvariantViolation {
                        message: "the root item cannot hold a value".into(),
                    })
                } else {
                    let id = self.resolve_queued(&path);
                    self.mark_live(id);
                    self.write_value(id, value);
                    Ok(())
                }
            }
            Mutation::ItemAdded { path } => {
                let id = self.resolve_queued(&path);
                self.mark_live(id);
                Ok(())
            }
            Mutation::ItemRemoved { path } => self.remove(&path),
            Mutation::Describe {
                path,
                format,
                writable,
            } => {
                let id = self.resolve_queued(&path);
                if let Some(item) = self.items.get_mut(id) {
                    if item.format != format || item.writable != writable {
                        item.format = format;
                        item.writable = writable;
                        self.pending.push_back(TreeEvent::Described { item: id, path });
                    }
                }
                Ok(())
            }
        };
        self.flush();
        result
    }

    /// Record the transport state. Going offline marks every live item
    /// stale but keeps its value.
    pub fn set_connected(&mut self, connected: bool) {
        if self.connected == connected {
            return;
        }
        self.connected = connected;
        if !connected {
            let stale: Vec<ItemId> = self
                .subtree(self.root)
                .into_iter()
                .filter(|id| self.items.get(*id).is_some_and(|i| i.live))
                .collect();
            debug!(items = stale.len(), "transport offline, marking items stale");
            for id in stale {
                self.mark_offline(id);
            }
            self.flush();
        }
    }

    // ── Observers ────────────────────────────────────────────────────

    /// Resolve `path` and subscribe to it.
    pub fn subscribe<F>(&mut self, path: &ItemPath, scope: Scope, callback: F) -> SubscriptionId
    where
        F: FnMut(&TreeEvent, &Self) + Send + 'static,
    {
        let id = self.resolve(path);
        self.bus.subscribe(id, scope, callback)
    }

    /// Unsubscribe and destroy anything the subscription was keeping
    /// alive after its producer removed it.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let found = self.bus.unsubscribe(id);
        self.collect_released();
        found
    }

    /// Destroy removed subtrees that no subscription pins any more.
    /// Subscriptions dropped elsewhere are picked up here or by the next
    /// mutation.
    pub fn collect_released(&mut self) {
        self.collect_queued();
        self.flush();
    }

    /// Number of removed subtrees still held for observers.
    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }

    // ── Consistency ──────────────────────────────────────────────────

    /// Verify parent/child links, paths and reachability.
    pub fn check_integrity(&self) -> Result<(), CoreError> {
        let violation = |message: String| CoreError::InvariantViolation { message };
        for (id, item) in &self.items {
            if id == self.root {
                continue;
            }
            let parent_id = item
                .parent
                .ok_or_else(|| violation(format!("{} has no parent", item.path)))?;
            let parent = self
                .items
                .get(parent_id)
                .ok_or_else(|| violation(format!("{} has a dead parent", item.path)))?;
            if parent.child(&item.name) != Some(id) {
                return Err(violation(format!("{} is not linked from its parent", item.path)));
            }
            if parent.path.child(&item.name) != item.path {
                return Err(violation(format!("{} has an inconsistent path", item.path)));
            }
        }
        let reachable = self.subtree(self.root).len();
        if reachable != self.items.len() {
            return Err(violation(format!(
                "{} items unreachable from the root",
                self.items.len() - reachable
            )));
        }
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    fn resolve_queued(&mut self, path: &ItemPath) -> ItemId {
        let mut current = self.root;
        for (depth, name) in path.segments().iter().enumerate() {
            if let Some(existing) = self.items.get(current).and_then(|i| i.child(name)) {
                current = existing;
                continue;
            }
            let child_path = path.truncated(depth + 1);
            let child = self.items.insert(Item::placeholder(
                name.clone(),
                child_path.clone(),
                Some(current),
            ));
            if let Some(parent) = self.items.get_mut(current) {
                parent.children.insert(name.clone(), child);
            }
            trace!(path = %child_path, "item created");
            self.pending.push_back(TreeEvent::ChildAdded {
                parent: current,
                child,
                path: child_path,
            });
            current = child;
        }
        current
    }

    fn write_value(&mut self, id: ItemId, value: Value) {
        let Some(item) = self.items.get_mut(id) else {
            return;
        };
        item.updated_at = Some(Utc::now());
        if item.value == value {
            trace!(path = %item.path, "unchanged value suppressed");
            return;
        }
        item.value = value.clone();
        self.pending.push_back(TreeEvent::ValueChanged {
            item: id,
            path: item.path.clone(),
            value,
        });
    }

    fn mark_live(&mut self, id: ItemId) {
        self.set_live(id, true);
    }

    fn mark_offline(&mut self, id: ItemId) {
        self.set_live(id, false);
    }

    fn set_live(&mut self, id: ItemId, live: bool) {
        if live && !self.retained.is_empty() {
            self.revive(id);
        }
        if let Some(item) = self.items.get_mut(id) {
            if item.live != live {
                item.live = live;
                self.pending.push_back(TreeEvent::LivenessChanged {
                    item: id,
                    path: item.path.clone(),
                    live,
                });
            }
        }
    }

    /// Destroy the subtree at `path`, or mark it stale if anything in it
    /// is pinned by a subscription.
    fn remove(&mut self, path: &ItemPath) -> Result<(), CoreError> {
        let Some(id) = self.lookup(path) else {
            trace!(%path, "remove of unknown path ignored");
            return Ok(());
        };
        let Some(parent) = self.items.get(id).and_then(|i| i.parent) else {
            return Err(CoreError::InvariantViolation {
                message: "the root item cannot be removed".into(),
            });
        };

        let subtree = self.subtree(id);
        if self.bus.any_pinned(&subtree) {
            debug!(%path, "removed subtree is observed, retaining as stale");
            for item in subtree {
                self.mark_offline(item);
            }
            if !self.retained.contains(&id) {
                self.retained.push(id);
            }
            return Ok(());
        }

        self.destroy(id, parent, &subtree);
        Ok(())
    }

    fn destroy(&mut self, id: ItemId, parent: ItemId, subtree: &[ItemId]) {
        let Some(path) = self.items.get(id).map(|i| i.path.clone()) else {
            return;
        };
        if let (Some(name), Some(parent_item)) = (path.name(), self.items.get_mut(parent)) {
            parent_item.children.shift_remove(name);
        }
        for item in subtree {
            self.items.remove(*item);
        }
        self.retained.retain(|r| self.items.contains_key(*r));
        debug!(%path, destroyed = subtree.len(), "subtree removed");
        self.pending.push_back(TreeEvent::ChildRemoved { parent, path });
    }

    /// Destroy every retained subtree that is no longer pinned. Events are
    /// queued, not delivered.
    fn collect_queued(&mut self) {
        if !self.bus.take_released() || self.retained.is_empty() {
            return;
        }
        for root in std::mem::take(&mut self.retained) {
            let Some(parent) = self.items.get(root).and_then(|i| i.parent) else {
                continue;
            };
            let subtree = self.subtree(root);
            if self.bus.any_pinned(&subtree) {
                self.retained.push(root);
            } else {
                self.destroy(root, parent, &subtree);
            }
        }
    }

    /// The producer is back for `id`: any retained subtree containing it is
    /// ordinary again.
    fn revive(&mut self, id: ItemId) {
        let chain: Vec<ItemId> = self.ancestors(id).collect();
        self.retained.retain(|root| !chain.contains(root));
    }

    /// `id` and all its descendants, pre-order.
    fn subtree(&self, id: ItemId) -> Vec<ItemId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(item) = self.items.get(current) else {
                continue;
            };
            out.push(current);
            stack.extend(item.children.values().rev().copied());
        }
        out
    }

    fn flush(&mut self) {
        while let Some(event) = self.pending.pop_front() {
            self.bus.dispatch(&event, self);
        }
    }
}

impl std::fmt::Debug for ItemTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemTree")
            .field("items", &self.items.len())
            .field("connected", &self.connected)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::model::Format;

    fn p(s: &str) -> ItemPath {
        ItemPath::parse(s)
    }

    /// Subscribe and collect every event delivered.
    fn record(tree: &mut ItemTree, path: &str, scope: Scope) -> Arc<Mutex<Vec<TreeEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tree.subscribe(&p(path), scope, move |event, _| sink.lock().push(event.clone()));
        seen
    }

    fn values(events: &[TreeEvent]) -> Vec<Value> {
        events
            .iter()
            .filter_map(|e| match e {
                TreeEvent::ValueChanged { value, .. } => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut tree = ItemTree::new();
        let a = tree.resolve(&p("battery/soldc/voltage"));
        let b = tree.resolve(&p("battery.soldc.voltage"));
        assert_eq!(a, b);
        assert_eq!(tree.len(), 4);
        tree.check_integrity().unwrap();
    }

    #[test]
    fn resolve_creates_placeholders() {
        let mut tree = ItemTree::new();
        let id = tree.resolve(&p("a/b/c"));
        let item = tree.item(id).unwrap();
        assert_eq!(item.value(), &Value::Invalid);
        assert!(!item.is_live());
        assert!(tree.lookup(&p("a/b")).is_some());
    }

    #[test]
    fn get_does_not_create() {
        let tree = ItemTree::new();
        let err = tree.get(&p("nope")).unwrap_err();
        assert!(matches!(err, CoreError::PathNotFound { .. }));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn unchanged_value_is_suppressed() {
        let mut tree = ItemTree::new();
        let seen = record(&mut tree, "battery/soldc/voltage", Scope::Exact);

        for v in [12.8, 12.8, 12.8, 12.9, 12.9] {
            tree.apply(Mutation::value_changed("battery/soldc/voltage", v))
                .unwrap();
        }

        assert_eq!(
            values(&seen.lock()),
            vec![Value::Float(12.8), Value::Float(12.9)]
        );
    }

    #[test]
    fn values_arrive_in_application_order() {
        let mut tree = ItemTree::new();
        let seen = record(&mut tree, "x", Scope::Exact);
        for i in 0..100 {
            tree.apply(Mutation::value_changed("x", i64::from(i))).unwrap();
        }
        let got = values(&seen.lock());
        let expected: Vec<Value> = (0..100).map(Value::Int).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn offline_keeps_value_and_reconnect_restores_liveness() {
        let mut tree = ItemTree::new();
        tree.set_connected(true);
        tree.apply(Mutation::value_changed("tank/fresh/level", 55.0))
            .unwrap();
        let seen = record(&mut tree, "tank/fresh/level", Scope::Exact);

        tree.set_connected(false);
        let item = tree.get(&p("tank/fresh/level")).unwrap();
        assert!(!item.is_live());
        assert_eq!(item.value(), &Value::Float(55.0));

        tree.set_connected(true);
        tree.apply(Mutation::value_changed("tank/fresh/level", 55.0))
            .unwrap();
        let item = tree.get(&p("tank/fresh/level")).unwrap();
        assert!(item.is_live());
        assert_eq!(item.value(), &Value::Float(55.0));

        let events = seen.lock();
        let liveness: Vec<bool> = events
            .iter()
            .filter_map(|e| match e {
                TreeEvent::LivenessChanged { live, .. } => Some(*live),
                _ => None,
            })
            .collect();
        assert_eq!(liveness, vec![false, true]);
        assert!(values(&events).is_empty());
    }

    #[test]
    fn unobserved_subtree_is_destroyed() {
        let mut tree = ItemTree::new();
        tree.apply(Mutation::value_changed("battery/ttyO1/Dc/0/Voltage", 12.1))
            .unwrap();
        let seen = record(&mut tree, "battery", Scope::Exact);
        let stale = tree.lookup(&p("battery/ttyO1")).unwrap();

        tree.apply(Mutation::ItemRemoved {
            path: p("battery/ttyO1"),
        })
        .unwrap();

        assert!(tree.lookup(&p("battery/ttyO1")).is_none());
        assert!(tree.item(stale).is_none());
        assert_eq!(
            seen.lock().as_slice(),
            &[TreeEvent::ChildRemoved {
                parent: tree.lookup(&p("battery")).unwrap(),
                path: p("battery/ttyO1"),
            }]
        );
        tree.check_integrity().unwrap();
    }

    #[test]
    fn observed_item_survives_removal_as_stale() {
        let mut tree = ItemTree::new();
        tree.apply(Mutation::value_changed("grid/cgwacs/power", 300_i64))
            .unwrap();
        let _seen = record(&mut tree, "grid/cgwacs/power", Scope::Exact);

        tree.apply(Mutation::ItemRemoved {
            path: p("grid/cgwacs"),
        })
        .unwrap();

        let item = tree.get(&p("grid/cgwacs/power")).unwrap();
        assert!(!item.is_live());
        assert_eq!(item.value(), &Value::Int(300));
    }

    #[test]
    fn retained_subtree_is_destroyed_after_last_unsubscribe() {
        let mut tree = ItemTree::new();
        tree.apply(Mutation::value_changed("grid/cgwacs/power", 300_i64))
            .unwrap();
        let seen = record(&mut tree, "grid", Scope::Exact);
        let sub = tree.subscribe(&p("grid/cgwacs/power"), Scope::Exact, |_, _| {});

        tree.apply(Mutation::ItemRemoved {
            path: p("grid/cgwacs"),
        })
        .unwrap();
        assert_eq!(tree.retained_len(), 1);
        assert!(seen.lock().is_empty());

        assert!(tree.unsubscribe(sub));

        assert!(tree.lookup(&p("grid/cgwacs")).is_none());
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.retained_len(), 0);
        assert_eq!(
            seen.lock().as_slice(),
            &[TreeEvent::ChildRemoved {
                parent: tree.lookup(&p("grid")).unwrap(),
                path: p("grid/cgwacs"),
            }]
        );
        tree.check_integrity().unwrap();
    }

    #[test]
    fn retained_subtree_waits_for_every_observer() {
        let mut tree = ItemTree::new();
        tree.apply(Mutation::value_changed("tank/20/level", 55_i64))
            .unwrap();
        let first = tree.subscribe(&p("tank/20/level"), Scope::Exact, |_, _| {});
        let second = tree.subscribe(&p("tank/20"), Scope::Subtree, |_, _| {});
        tree.apply(Mutation::ItemRemoved { path: p("tank/20") })
            .unwrap();

        tree.unsubscribe(first);
        assert!(tree.lookup(&p("tank/20/level")).is_some());

        // Released from another task: nothing happens until the owner collects.
        let guard = tree.bus().guard(second);
        drop(guard);
        assert!(tree.lookup(&p("tank/20")).is_some());

        tree.collect_released();
        assert!(tree.lookup(&p("tank/20")).is_none());
        tree.check_integrity().unwrap();
    }

    #[test]
    fn next_mutation_collects_released_subtree() {
        let mut tree = ItemTree::new();
        tree.apply(Mutation::value_changed("devices/fridge/power", 45_i64))
            .unwrap();
        let sub = tree.subscribe(&p("devices/fridge/power"), Scope::Exact, |_, _| {});
        tree.apply(Mutation::ItemRemoved {
            path: p("devices/fridge"),
        })
        .unwrap();

        tree.bus().unsubscribe(sub);
        tree.apply(Mutation::value_changed("devices/charger/power", 120_i64))
            .unwrap();

        assert!(tree.lookup(&p("devices/fridge")).is_none());
        assert!(tree.lookup(&p("devices/charger/power")).is_some());
        tree.check_integrity().unwrap();
    }

    #[test]
    fn producer_return_keeps_subtree_after_unsubscribe() {
        let mut tree = ItemTree::new();
        tree.apply(Mutation::value_changed("grid/cgwacs/power", 300_i64))
            .unwrap();
        let sub = tree.subscribe(&p("grid/cgwacs/power"), Scope::Exact, |_, _| {});
        tree.apply(Mutation::ItemRemoved {
            path: p("grid/cgwacs"),
        })
        .unwrap();

        tree.apply(Mutation::value_changed("grid/cgwacs/power", 310_i64))
            .unwrap();
        assert_eq!(tree.retained_len(), 0);
        tree.unsubscribe(sub);

        let item = tree.get(&p("grid/cgwacs/power")).unwrap();
        assert!(item.is_live());
        assert_eq!(item.value(), &Value::Int(310));
    }

    #[test]
    fn removing_root_is_an_invariant_violation() {
        let mut tree = ItemTree::new();
        let err = tree
            .apply(Mutation::ItemRemoved {
                path: ItemPath::root(),
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation { .. }));
    }

    #[test]
    fn writes_are_rejected_when_disconnected_or_read_only() {
        let mut tree = ItemTree::new();
        tree.apply(Mutation::value_changed("settings/brightness", 50_i64))
            .unwrap();
        let path = p("settings/brightness");
        let value = Value::Int(60);

        let err = tree.set_value(&path, &value).unwrap_err();
        assert!(err.to_string().contains("disconnected"));

        tree.set_connected(true);
        tree.set_value(&path, &value).unwrap();

        tree.apply(Mutation::Describe {
            path: path.clone(),
            format: Some(Format::new("%", 0)),
            writable: false,
        })
        .unwrap();
        let err = tree.set_value(&path, &value).unwrap_err();
        assert!(err.to_string().contains("read-only"));

        let err = tree.set_value(&p("unknown/path"), &value).unwrap_err();
        assert!(matches!(err, CoreError::WriteRejected { .. }));
    }

    #[test]
    fn unchanged_description_is_silent() {
        let mut tree = ItemTree::new();
        let seen = record(&mut tree, "solar/yield", Scope::Exact);
        let describe = Mutation::Describe {
            path: p("solar/yield"),
            format: Some(Format::new("kWh", 1)),
            writable: false,
        };
        tree.apply(describe.clone()).unwrap();
        tree.apply(describe).unwrap();
        let described = seen
            .lock()
            .iter()
            .filter(|e| matches!(e, TreeEvent::Described { .. }))
            .count();
        assert_eq!(described, 1);
    }

    #[test]
    fn subtree_scope_sees_descendants() {
        let mut tree = ItemTree::new();
        let seen = record(&mut tree, "devices", Scope::Subtree);
        tree.apply(Mutation::value_changed("devices/a/name", "A"))
            .unwrap();
        let events = seen.lock();
        let paths: Vec<String> = events.iter().map(|e| e.path().to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "devices/a",
                "devices/a/name",
                "devices/a/name",
                "devices/a/name"
            ]
        );
    }

    #[test]
    fn unsubscribe_from_inside_callback() {
        let mut tree = ItemTree::new();
        let bus = tree.bus().clone();
        let calls = Arc::new(Mutex::new(0_u32));
        let handle: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let counter = Arc::clone(&calls);
        let own = Arc::clone(&handle);
        let id = tree.subscribe(&p("x"), Scope::Exact, move |event, _| {
            if matches!(event, TreeEvent::ValueChanged { .. }) {
                *counter.lock() += 1;
                if let Some(id) = *own.lock() {
                    bus.unsubscribe(id);
                }
            }
        });
        *handle.lock() = Some(id);

        tree.apply(Mutation::value_changed("x", 1_i64)).unwrap();
        tree.apply(Mutation::value_changed("x", 2_i64)).unwrap();

        assert_eq!(*calls.lock(), 1);
        assert!(!tree.bus().is_subscribed(id));
    }

    #[test]
    fn callback_can_unsubscribe_a_later_recipient() {
        let mut tree = ItemTree::new();
        let bus = tree.bus().clone();
        let victim: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let target = Arc::clone(&victim);
        tree.subscribe(&p("x"), Scope::Exact, move |_, _| {
            if let Some(id) = target.lock().take() {
                bus.unsubscribe(id);
            }
        });
        let fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&fired);
        let second = tree.subscribe(&p("x"), Scope::Exact, move |_, _| *flag.lock() = true);
        *victim.lock() = Some(second);

        tree.apply(Mutation::value_changed("x", 1_i64)).unwrap();
        assert!(!*fired.lock());
    }

    #[test]
    fn find_matches_pattern() {
        let mut tree = ItemTree::new();
        for name in ["c", "a", "b"] {
            tree.apply(Mutation::value_changed(
                ItemPath::parse(&format!("devices/{name}/name")),
                name,
            ))
            .unwrap();
        }
        let found: Vec<String> = tree
            .find(&PathPattern::parse("devices/*"))
            .into_iter()
            .map(|id| tree.item(id).unwrap().path().to_string())
            .collect();
        assert_eq!(found, vec!["devices/c", "devices/a", "devices/b"]);
    }
}
