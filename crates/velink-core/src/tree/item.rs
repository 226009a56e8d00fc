use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use slotmap::new_key_type;

use crate::model::{Format, ItemPath, Value};

new_key_type! {
    /// Arena key of an item. Stale keys of destroyed items never resolve
    /// to a newer item that reused the slot.
    pub struct ItemId;
}

/// A node in the tree.
#[derive(Debug, Clone)]
pub struct Item {
    pub(crate) name: String,
    pub(crate) path: ItemPath,
    pub(crate) parent: Option<ItemId>,
    pub(crate) children: IndexMap<String, ItemId>,
    pub(crate) value: Value,
    pub(crate) format: Option<Format>,
    pub(crate) live: bool,
    pub(crate) writable: bool,
    pub(crate) updated_at: Option<DateTime<Utc>>,
}

impl Item {
    pub(crate) fn placeholder(name: String, path: ItemPath, parent: Option<ItemId>) -> Self {
        Self {
            name,
            path,
            parent,
            children: IndexMap::new(),
            value: Value::Invalid,
            format: None,
            live: false,
            writable: true,
            updated_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &ItemPath {
        &self.path
    }

    pub fn parent(&self) -> Option<ItemId> {
        self.parent
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    /// Whether a producer currently backs this item.
    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Child names and ids in insertion order.
    pub fn children(&self) -> impl Iterator<Item = (&str, ItemId)> + '_ {
        self.children.iter().map(|(n, id)| (n.as_str(), *id))
    }

    pub fn child(&self, name: &str) -> Option<ItemId> {
        self.children.get(name).copied()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// The value rendered through the item's format, if any.
    pub fn display_text(&self) -> String {
        match &self.format {
            Some(fmt) => fmt.render(&self.value),
            None => self.value.to_string(),
        }
    }

    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            path: self.path.clone(),
            value: self.value.clone(),
            text: self.display_text(),
            live: self.live,
            writable: self.writable,
            updated_at: self.updated_at,
        }
    }
}

/// Owned copy of an item's state, safe to send off the session loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemSnapshot {
    pub path: ItemPath,
    pub value: Value,
    pub text: String,
    pub live: bool,
    pub writable: bool,
    pub updated_at: Option<DateTime<Utc>>,
}
