// ── Session ──
//
// Owns the item tree and the active transport. A single task drains the
// ingest queue, write completions and consumer commands, so every tree
// mutation and every observer callback happens on that task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use velink_api::ReconnectConfig;

use crate::adapter::{AdapterContext, Transport, WriteCompletion, WriteRequest};
use crate::backend::{BackendConnection, ConnectionState};
use crate::bus::{Scope, SubscriptionGuard};
use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::error::CoreError;
use crate::ingest::{self, Inbound, IngestReceiver, IngestSender};
use crate::model::{ItemPath, Value};
use crate::models::{ChildModel, Comparator, ModelHandle, SortTableModel, TableSpec};
use crate::stream::ItemStream;
use crate::tree::{ItemSnapshot, ItemTree, TreeEvent};

const COMMAND_CHANNEL_SIZE: usize = 64;

// ── SessionConfig ────────────────────────────────────────────────────

/// Tuning for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Ingest queue bound, in distinct entries.
    pub ingest_capacity: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ingest_capacity: ingest::DEFAULT_CAPACITY,
            reconnect: ReconnectConfig::default(),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────

/// The tree owner. Build with [`Session::new`], attach anything that must
/// see the very first mutation through [`Session::tree_mut`], then hand it
/// to a task with [`Session::run`].
pub struct Session {
    backend: Arc<BackendConnection>,
    tree: ItemTree,
    transport: Transport,
    reconnect: ReconnectConfig,
    ingest_tx: Option<IngestSender>,
    ingest_rx: IngestReceiver,
    completions_tx: mpsc::UnboundedSender<WriteCompletion>,
    completions_rx: mpsc::UnboundedReceiver<WriteCompletion>,
    commands: mpsc::Receiver<CommandEnvelope>,
    cancel: CancellationToken,
    pending_writes: HashMap<u64, oneshot::Sender<Result<CommandResult, CoreError>>>,
    next_write_id: u64,
}

impl Session {
    /// Create a session for an already-configured backend connection.
    pub fn new(
        backend: Arc<BackendConnection>,
        config: SessionConfig,
    ) -> Result<(Self, SessionHandle), CoreError> {
        let source = backend.source().ok_or_else(|| CoreError::Config {
            message: "no data source configured".into(),
        })?;
        let transport = Transport::from_config(source);

        let (ingest_tx, ingest_rx) = ingest::channel(config.ingest_capacity);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        let handle = SessionHandle {
            commands: command_tx,
            state: backend.subscribe_state(),
            cancel: cancel.clone(),
        };

        let session = Self {
            backend,
            tree: ItemTree::new(),
            transport,
            reconnect: config.reconnect,
            ingest_tx: Some(ingest_tx),
            ingest_rx,
            completions_tx,
            completions_rx,
            commands: command_rx,
            cancel,
            pending_writes: HashMap::new(),
            next_write_id: 1,
        };

        Ok((session, handle))
    }

    pub fn tree(&self) -> &ItemTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ItemTree {
        &mut self.tree
    }

    /// Drive the session until shutdown, every handle is dropped, or an
    /// adapter breaks a tree invariant (returned as the error).
    pub async fn run(mut self) -> Result<(), CoreError> {
        let Some(ingest) = self.ingest_tx.take() else {
            return Err(CoreError::SessionClosed);
        };
        let ctx = AdapterContext {
            ingest,
            completions: self.completions_tx.clone(),
            cancel: self.cancel.child_token(),
            reconnect: self.reconnect.clone(),
        };

        info!(source = %self.transport.kind(), "session starting");
        self.transport.connect(ctx);
        let released = self.tree.bus().release_signal();

        let result = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break Ok(()),
                Some(batch) = self.ingest_rx.recv_batch() => {
                    if let Err(e) = self.apply_batch(batch) {
                        break Err(e);
                    }
                }
                Some(done) = self.completions_rx.recv() => self.complete_write(done),
                () = released.notified() => self.tree.collect_released(),
                envelope = self.commands.recv() => {
                    let Some(envelope) = envelope else { break Ok(()) };
                    self.handle(envelope);
                }
            }
        };

        self.transport.disconnect();
        self.tree.set_connected(false);
        self.backend.set_state(ConnectionState::Disconnected);
        for (_, tx) in self.pending_writes.drain() {
            let _ = tx.send(Err(CoreError::SessionClosed));
        }
        info!("session stopped");
        result
    }

    // ── Ingest ───────────────────────────────────────────────────────

    fn apply_batch(&mut self, batch: Vec<Inbound>) -> Result<(), CoreError> {
        trace!(entries = batch.len(), "applying ingest batch");
        for entry in batch {
            match entry {
                Inbound::Mutation(mutation) => {
                    if let Err(e) = self.tree.apply(mutation) {
                        error!(error = %e, "adapter produced an invalid mutation");
                        return Err(e);
                    }
                }
                Inbound::Status(state) => self.on_status(state),
            }
        }
        Ok(())
    }

    fn on_status(&mut self, state: ConnectionState) {
        debug!(%state, "backend state");
        self.backend.set_state(state);
        self.tree.set_connected(state.is_connected());
    }

    // ── Writes ───────────────────────────────────────────────────────

    fn complete_write(&mut self, done: WriteCompletion) {
        let Some(tx) = self.pending_writes.remove(&done.id) else {
            warn!(id = done.id, "completion for unknown write");
            return;
        };
        if let Err(ref e) = done.result {
            debug!(id = done.id, error = %e, "write failed");
        }
        let _ = tx.send(done.result.map(|()| CommandResult::Ok));
    }

    // ── Commands ─────────────────────────────────────────────────────

    fn handle(&mut self, envelope: CommandEnvelope) {
        let CommandEnvelope {
            command,
            response_tx,
        } = envelope;
        trace!(?command, "executing command");

        let result = match command {
            Command::SetValue { path, value } => {
                if let Err(e) = self.tree.set_value(&path, &value) {
                    Err(e)
                } else {
                    let id = self.next_write_id;
                    self.next_write_id += 1;
                    self.pending_writes.insert(id, response_tx);
                    self.transport
                        .translate_write(WriteRequest { id, path, value });
                    return;
                }
            }
            Command::Snapshot { path } => self
                .tree
                .get(&path)
                .map(|item| CommandResult::Snapshot(item.snapshot())),
            Command::Dump { prefix } => Ok(CommandResult::Dump(self.tree.dump(&prefix))),
            Command::Watch { path, scope } => Ok(CommandResult::Stream(ItemStream::attach(
                &mut self.tree,
                &path,
                scope,
            ))),
            Command::Subscribe {
                path,
                scope,
                callback,
            } => {
                let id = self.tree.subscribe(&path, scope, callback);
                Ok(CommandResult::Subscription(self.tree.bus().guard(id)))
            }
            Command::ChildModel { path } => Ok(CommandResult::ChildModel(ChildModel::attach(
                &mut self.tree,
                &path,
            ))),
            Command::TableModel { spec } => Ok(CommandResult::TableModel(SortTableModel::attach(
                &mut self.tree,
                spec,
            ))),
            Command::RebuildModel { model, comparator } => {
                model.rebuild(&self.tree, comparator);
                Ok(CommandResult::Ok)
            }
        };

        let _ = response_tx.send(result);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("items", &self.tree.len())
            .field("pending_writes", &self.pending_writes.len())
            .finish_non_exhaustive()
    }
}

// ── SessionHandle ────────────────────────────────────────────────────

/// Cheaply cloneable front door to a running [`Session`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<CommandEnvelope>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl SessionHandle {
    async fn execute(&self, command: Command) -> Result<CommandResult, CoreError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.commands
            .send(CommandEnvelope {
                command,
                response_tx,
            })
            .await
            .map_err(|_| CoreError::SessionClosed)?;
        response_rx.await.map_err(|_| CoreError::SessionClosed)?
    }

    /// Request a write. Resolves once the transport has accepted or
    /// refused it; the tree only changes when the source reports back.
    pub async fn set_value(&self, path: &ItemPath, value: Value) -> Result<(), CoreError> {
        match self
            .execute(Command::SetValue {
                path: path.clone(),
                value,
            })
            .await?
        {
            CommandResult::Ok => Ok(()),
            other => Err(other.unexpected("set_value")),
        }
    }

    pub async fn snapshot(&self, path: &ItemPath) -> Result<ItemSnapshot, CoreError> {
        match self.execute(Command::Snapshot { path: path.clone() }).await? {
            CommandResult::Snapshot(s) => Ok(s),
            other => Err(other.unexpected("snapshot")),
        }
    }

    /// Every item under `prefix`, sorted by path.
    pub async fn dump(&self, prefix: &ItemPath) -> Result<Vec<ItemSnapshot>, CoreError> {
        match self
            .execute(Command::Dump {
                prefix: prefix.clone(),
            })
            .await?
        {
            CommandResult::Dump(items) => Ok(items),
            other => Err(other.unexpected("dump")),
        }
    }

    pub async fn watch(&self, path: &ItemPath, scope: Scope) -> Result<ItemStream, CoreError> {
        match self
            .execute(Command::Watch {
                path: path.clone(),
                scope,
            })
            .await?
        {
            CommandResult::Stream(s) => Ok(s),
            other => Err(other.unexpected("watch")),
        }
    }

    /// Register a callback that runs on the session task.
    pub async fn subscribe<F>(
        &self,
        path: &ItemPath,
        scope: Scope,
        callback: F,
    ) -> Result<SubscriptionGuard, CoreError>
    where
        F: FnMut(&TreeEvent, &ItemTree) + Send + 'static,
    {
        match self
            .execute(Command::Subscribe {
                path: path.clone(),
                scope,
                callback: Box::new(callback),
            })
            .await?
        {
            CommandResult::Subscription(guard) => Ok(guard),
            other => Err(other.unexpected("subscribe")),
        }
    }

    pub async fn child_model(&self, path: &ItemPath) -> Result<ChildModel, CoreError> {
        match self.execute(Command::ChildModel { path: path.clone() }).await? {
            CommandResult::ChildModel(m) => Ok(m),
            other => Err(other.unexpected("child_model")),
        }
    }

    pub async fn table_model(&self, spec: TableSpec) -> Result<SortTableModel, CoreError> {
        match self.execute(Command::TableModel { spec }).await? {
            CommandResult::TableModel(m) => Ok(m),
            other => Err(other.unexpected("table_model")),
        }
    }

    /// Switch a table to a new ordering. Its listeners get `Reset`.
    pub async fn sort_table(
        &self,
        model: &SortTableModel,
        comparator: Comparator,
    ) -> Result<(), CoreError> {
        self.rebuild(model.handle(), Some(comparator), "sort_table")
            .await
    }

    /// Drop and recompute every row of a model. Its listeners get `Reset`.
    pub async fn reset_model(&self, model: ModelHandle) -> Result<(), CoreError> {
        self.rebuild(model, None, "reset_model").await
    }

    async fn rebuild(
        &self,
        model: ModelHandle,
        comparator: Option<Comparator>,
        wanted: &str,
    ) -> Result<(), CoreError> {
        match self
            .execute(Command::RebuildModel { model, comparator })
            .await?
        {
            CommandResult::Ok => Ok(()),
            other => Err(other.unexpected(wanted)),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the backend reports `Connected`.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut rx = self.state.clone();
        match tokio::time::timeout(timeout, rx.wait_for(|s| s.is_connected())).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(CoreError::SessionClosed),
            Err(_) => Err(CoreError::TransportDisconnected {
                reason: format!("not connected after {}s", timeout.as_secs()),
            }),
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::SourceConfig;

    fn mock_backend() -> Arc<BackendConnection> {
        let backend = Arc::new(BackendConnection::new());
        backend
            .configure(SourceConfig::mock(Duration::from_secs(1)))
            .unwrap();
        backend
    }

    #[test]
    fn unconfigured_backend_is_rejected() {
        let backend = Arc::new(BackendConnection::new());
        let err = Session::new(backend, SessionConfig::default()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_after_connect() {
        let (session, handle) = Session::new(mock_backend(), SessionConfig::default()).unwrap();
        let task = tokio::spawn(session.run());

        handle.wait_connected(Duration::from_secs(5)).await.unwrap();
        let snap = handle
            .snapshot(&ItemPath::parse("battery/soldc/voltage"))
            .await
            .unwrap();
        assert_eq!(snap.value, Value::Float(12.8));
        assert!(snap.live);

        handle.shutdown();
        task.await.unwrap().unwrap();
        assert_eq!(handle.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_path_is_not_found() {
        let (session, handle) = Session::new(mock_backend(), SessionConfig::default()).unwrap();
        let task = tokio::spawn(session.run());
        handle.wait_connected(Duration::from_secs(5)).await.unwrap();

        let err = handle
            .snapshot(&ItemPath::parse("does/not/exist"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PathNotFound { .. }));

        handle.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn commands_fail_after_shutdown() {
        let (session, handle) = Session::new(mock_backend(), SessionConfig::default()).unwrap();
        let task = tokio::spawn(session.run());
        handle.shutdown();
        task.await.unwrap().unwrap();

        let err = handle.dump(&ItemPath::root()).await.unwrap_err();
        assert_eq!(err, CoreError::SessionClosed);
    }
}
