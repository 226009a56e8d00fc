// ── Notification bus ──
//
// Delivers tree events to subscribers without the tree knowing who they
// are. Subscriptions live in a slotmap so a handle carries a generation:
// once a subscription is removed its key never matches again, and any
// event still being delivered for it is discarded at dispatch time.
//
// The registry lock is never held while a callback runs, so callbacks may
// subscribe or unsubscribe (including themselves) freely.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};
use tokio::sync::Notify;
use tracing::trace;

use crate::tree::{ItemId, ItemTree, TreeEvent};

new_key_type! {
    /// Handle returned by [`NotificationBus::subscribe`].
    pub struct SubscriptionId;
}

/// Which events a subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Events targeting the item itself: its value, liveness and metadata,
    /// plus children added to or removed from it.
    Exact,
    /// Events targeting the item or anything below it.
    Subtree,
}

/// Observer callback. Receives the event and a read-only view of the tree
/// as it stands after the mutation.
pub type Callback = Box<dyn FnMut(&TreeEvent, &ItemTree) + Send>;

struct Subscription {
    item: ItemId,
    scope: Scope,
    /// `None` while the callback is running.
    callback: Option<Callback>,
}

#[derive(Default)]
struct Registry {
    subs: SlotMap<SubscriptionId, Subscription>,
    by_item: HashMap<ItemId, Vec<SubscriptionId>>,
    /// Set when an item loses its last subscriber.
    released: bool,
}

impl Registry {
    fn remove(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let sub = self.subs.remove(id)?;
        if let Some(list) = self.by_item.get_mut(&sub.item) {
            list.retain(|s| *s != id);
            if list.is_empty() {
                self.by_item.remove(&sub.item);
                self.released = true;
            }
        }
        Some(sub)
    }
}

/// Shared subscriber registry. Cheap to clone.
#[derive(Clone, Default)]
pub struct NotificationBus {
    inner: Arc<Mutex<Registry>>,
    released: Arc<Notify>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for events on `item`. The subscription pins the
    /// item: it is retained (not destroyed) if its producer removes it.
    pub fn subscribe<F>(&self, item: ItemId, scope: Scope, callback: F) -> SubscriptionId
    where
        F: FnMut(&TreeEvent, &ItemTree) + Send + 'static,
    {
        let mut reg = self.inner.lock();
        let id = reg.subs.insert(Subscription {
            item,
            scope,
            callback: Some(Box::new(callback)),
        });
        reg.by_item.entry(item).or_default().push(id);
        trace!(?id, ?scope, "subscribed");
        id
    }

    /// Remove a subscription. Takes effect for every event not yet
    /// delivered, including ones already queued. Returns `false` if the
    /// handle was already dead.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let (removed, released) = {
            let mut reg = self.inner.lock();
            let removed = reg.remove(id);
            (removed, reg.released)
        };
        if released {
            self.released.notify_one();
        }
        // Dropped after the lock is released: the callback may own guards
        // that unsubscribe in turn.
        let found = removed.is_some();
        drop(removed);
        found
    }

    /// Woken whenever an item loses its last subscriber, from any task.
    /// The owner of the tree reacts with [`ItemTree::collect_released`].
    pub fn release_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.released)
    }

    /// Clear and return the released flag.
    pub(crate) fn take_released(&self) -> bool {
        std::mem::take(&mut self.inner.lock().released)
    }

    /// Wrap a handle so it unsubscribes on drop.
    pub fn guard(&self, id: SubscriptionId) -> SubscriptionGuard {
        SubscriptionGuard {
            bus: self.clone(),
            id,
        }
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.lock().subs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_pinned(&self, item: ItemId) -> bool {
        self.inner.lock().by_item.contains_key(&item)
    }

    pub(crate) fn any_pinned(&self, items: &[ItemId]) -> bool {
        let reg = self.inner.lock();
        items.iter().any(|i| reg.by_item.contains_key(i))
    }

    /// Deliver one event to every matching subscriber, in registration
    /// order per item, nearest item first.
    pub(crate) fn dispatch(&self, event: &TreeEvent, tree: &ItemTree) {
        let target = event.target();
        let recipients: Vec<SubscriptionId> = {
            let reg = self.inner.lock();
            if reg.by_item.is_empty() {
                return;
            }
            let mut out = Vec::new();
            for item in tree.ancestors(target) {
                let Some(list) = reg.by_item.get(&item) else {
                    continue;
                };
                for id in list {
                    let wanted = item == target
                        || reg.subs.get(*id).is_some_and(|s| s.scope == Scope::Subtree);
                    if wanted {
                        out.push(*id);
                    }
                }
            }
            out
        };

        for id in recipients {
            let taken = self
                .inner
                .lock()
                .subs
                .get_mut(id)
                .and_then(|s| s.callback.take());
            let Some(mut callback) = taken else {
                // Unsubscribed since the recipient list was built.
                continue;
            };

            callback(event, tree);

            let leftover = {
                let mut reg = self.inner.lock();
                match reg.subs.get_mut(id) {
                    Some(sub) => {
                        sub.callback = Some(callback);
                        None
                    }
                    None => Some(callback),
                }
            };
            drop(leftover);
        }
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscriptions", &self.len())
            .finish()
    }
}

// ── SubscriptionGuard ────────────────────────────────────────────────

/// Unsubscribes when dropped.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct SubscriptionGuard {
    bus: NotificationBus,
    id: SubscriptionId,
}

impl SubscriptionGuard {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SubscriptionGuard").field(&self.id).finish()
    }
}
