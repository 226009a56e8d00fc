// ── Live models ──
//
// Derived, ordered projections over the tree for list and table views.
// A model owns no authoritative data: it caches rows computed from the
// tree and updates them incrementally from tree events. Dropping a model
// unsubscribes it immediately.

mod child;
mod table;

use std::fmt;
use std::sync::Weak;

use tokio::sync::mpsc;

use crate::model::{ItemPath, Value};
use crate::tree::{ItemId, ItemTree};

pub use child::ChildModel;
pub use table::{Comparator, SortKey, SortTableModel, TableSpec};

/// Model lifecycle. A model leaves `Empty` on its first row and returns
/// to it only through an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Empty,
    Populated,
}

/// One projected item.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub item: ItemId,
    pub path: ItemPath,
    pub value: Value,
    pub live: bool,
    /// Cached sort key (`Invalid` for unsorted models).
    pub key: Value,
    /// Column values, in column order.
    pub cells: Vec<Value>,
}

/// Row-level change notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    RowInserted { index: usize, row: Row },
    RowRemoved { index: usize, path: ItemPath },
    RowUpdated { index: usize, row: Row },
    RowMoved { from: usize, to: usize, row: Row },
    /// All rows were replaced; re-read the model.
    Reset,
}

/// Detached reference to a live model. Rebuilding needs the tree, so a
/// consumer outside the session task passes this to
/// [`SessionHandle::reset_model`](crate::SessionHandle::reset_model) or
/// [`SessionHandle::sort_table`](crate::SessionHandle::sort_table). Does
/// not keep the model alive.
#[derive(Clone)]
pub struct ModelHandle(Weak<dyn Rebuild>);

impl ModelHandle {
    /// Rebuild from `tree`, switching a table to `comparator` first.
    /// Emits `Reset`. A dropped model is skipped.
    pub(crate) fn rebuild(&self, tree: &ItemTree, comparator: Option<Comparator>) {
        if let Some(model) = self.0.upgrade() {
            model.rebuild(tree, comparator);
        }
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

trait Rebuild: Send + Sync {
    fn rebuild(&self, tree: &ItemTree, comparator: Option<Comparator>);
}

/// Fan-out to event listeners; closed listeners are pruned on send.
#[derive(Debug, Default)]
struct Listeners {
    senders: Vec<mpsc::UnboundedSender<ModelEvent>>,
}

impl Listeners {
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ModelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push(tx);
        rx
    }

    fn emit(&mut self, event: &ModelEvent) {
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
