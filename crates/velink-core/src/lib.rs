//! Transport-agnostic item tree between `velink-api` and its consumers.
//!
//! - **[`ItemTree`]**: hierarchical store of named items. Adapters never
//!   touch it directly; they produce canonical [`Mutation`]s which the
//!   session applies in order. Duplicate values are suppressed here.
//!
//! - **[`NotificationBus`]**: per-item callback registry. A subscription
//!   pins its item, so a removed-but-observed item turns offline instead of
//!   disappearing, and comes back live when the source re-publishes it.
//!
//! - **Adapters** ([`adapter`]): D-Bus, MQTT and a deterministic mock
//!   source, all behind [`TransportAdapter`]. Each runs its own reconnect
//!   loop and feeds the bounded, coalescing ingest queue ([`ingest`]).
//!
//! - **[`Session`] / [`SessionHandle`]**: the single task that owns the
//!   tree, plus a cloneable command front door used by everything else.
//!
//! - **Models** ([`models`]): [`ChildModel`] lists the children of one
//!   node, [`SortTableModel`] keeps the matches of a path pattern sorted
//!   and emits minimal row moves.

pub mod adapter;
pub mod backend;
pub mod bus;
pub mod command;
pub mod error;
pub mod ingest;
pub mod model;
pub mod models;
pub mod session;
pub mod stream;
pub mod tree;

// ── Primary re-exports ──────────────────────────────────────────────
pub use adapter::{Transport, TransportAdapter, WriteCompletion, WriteRequest};
pub use backend::{BackendConnection, ConnectionState, SourceConfig, SourceKind};
pub use bus::{NotificationBus, Scope, SubscriptionGuard, SubscriptionId};
pub use command::{Command, CommandResult};
pub use error::CoreError;
pub use model::{Format, ItemPath, PathPattern, Value};
pub use models::{
    ChildModel, Comparator, ModelEvent, ModelHandle, ModelState, Row, SortKey, SortTableModel,
    TableSpec,
};
pub use session::{Session, SessionConfig, SessionHandle};
pub use stream::ItemStream;
pub use tree::{Item, ItemId, ItemSnapshot, ItemTree, Mutation, TreeEvent};
