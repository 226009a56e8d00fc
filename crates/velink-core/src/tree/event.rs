use crate::model::{Format, ItemPath, Value};
use crate::tree::ItemId;

/// A canonical change produced by a transport adapter.
///
/// Adapters translate every wire event into these before anything reaches
/// the tree, so the tree never sees transport details.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    ValueChanged { path: ItemPath, value: Value },
    ItemAdded { path: ItemPath },
    ItemRemoved { path: ItemPath },
    /// Producer-asserted metadata.
    Describe {
        path: ItemPath,
        format: Option<Format>,
        writable: bool,
    },
}

impl Mutation {
    pub fn path(&self) -> &ItemPath {
        match self {
            Self::ValueChanged { path, .. }
            | Self::ItemAdded { path }
            | Self::ItemRemoved { path }
            | Self::Describe { path, .. } => path,
        }
    }

    pub fn value_changed(path: impl Into<ItemPath>, value: impl Into<Value>) -> Self {
        Self::ValueChanged {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// A change notification delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    ValueChanged {
        item: ItemId,
        path: ItemPath,
        value: Value,
    },
    /// `path` is the new child's path.
    ChildAdded {
        parent: ItemId,
        child: ItemId,
        path: ItemPath,
    },
    /// The child at `path` and its subtree were destroyed.
    ChildRemoved { parent: ItemId, path: ItemPath },
    LivenessChanged {
        item: ItemId,
        path: ItemPath,
        live: bool,
    },
    /// Format or writability changed.
    Described { item: ItemId, path: ItemPath },
}

impl TreeEvent {
    /// The item whose observers receive this event. Structural events
    /// target the parent.
    pub fn target(&self) -> ItemId {
        match self {
            Self::ValueChanged { item, .. }
            | Self::LivenessChanged { item, .. }
            | Self::Described { item, .. } => *item,
            Self::ChildAdded { parent, .. } | Self::ChildRemoved { parent, .. } => *parent,
        }
    }

    /// The path the change is about (the child for structural events).
    pub fn path(&self) -> &ItemPath {
        match self {
            Self::ValueChanged { path, .. }
            | Self::ChildAdded { path, .. }
            | Self::ChildRemoved { path, .. }
            | Self::LivenessChanged { path, .. }
            | Self::Described { path, .. } => path,
        }
    }
}
