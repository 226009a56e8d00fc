// ── Command API ──
//
// Everything a consumer asks of the session loop flows through a
// `Command`. The loop owns the tree, so each command is executed there
// and its result comes back through a oneshot.

use std::fmt;

use crate::bus::{Callback, Scope, SubscriptionGuard};
use crate::error::CoreError;
use crate::model::{ItemPath, Value};
use crate::models::{ChildModel, Comparator, ModelHandle, SortTableModel, TableSpec};
use crate::stream::ItemStream;
use crate::tree::ItemSnapshot;

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// All operations the session loop executes on behalf of consumers.
pub enum Command {
    SetValue { path: ItemPath, value: Value },
    Snapshot { path: ItemPath },
    Dump { prefix: ItemPath },
    Watch { path: ItemPath, scope: Scope },
    Subscribe {
        path: ItemPath,
        scope: Scope,
        callback: Callback,
    },
    ChildModel { path: ItemPath },
    TableModel { spec: TableSpec },
    /// Rebuild a model from the tree, re-sorting a table first when a
    /// comparator is given.
    RebuildModel {
        model: ModelHandle,
        comparator: Option<Comparator>,
    },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetValue { path, value } => f
                .debug_struct("SetValue")
                .field("path", path)
                .field("value", value)
                .finish(),
            Self::Snapshot { path } => f.debug_struct("Snapshot").field("path", path).finish(),
            Self::Dump { prefix } => f.debug_struct("Dump").field("prefix", prefix).finish(),
            Self::Watch { path, scope } => f
                .debug_struct("Watch")
                .field("path", path)
                .field("scope", scope)
                .finish(),
            Self::Subscribe { path, scope, .. } => f
                .debug_struct("Subscribe")
                .field("path", path)
                .field("scope", scope)
                .finish_non_exhaustive(),
            Self::ChildModel { path } => f.debug_struct("ChildModel").field("path", path).finish(),
            Self::TableModel { spec } => f.debug_struct("TableModel").field("spec", spec).finish(),
            Self::RebuildModel { model, comparator } => f
                .debug_struct("RebuildModel")
                .field("model", model)
                .field("comparator", comparator)
                .finish(),
        }
    }
}

/// Result of a command execution.
#[derive(Debug)]
pub enum CommandResult {
    Ok,
    Snapshot(ItemSnapshot),
    Dump(Vec<ItemSnapshot>),
    Stream(ItemStream),
    Subscription(SubscriptionGuard),
    ChildModel(ChildModel),
    TableModel(SortTableModel),
}

impl CommandResult {
    pub(crate) fn unexpected(self, wanted: &str) -> CoreError {
        CoreError::InvariantViolation {
            message: format!("session answered {self:?} to a {wanted} command"),
        }
    }
}
