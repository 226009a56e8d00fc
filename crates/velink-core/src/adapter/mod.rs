// ── Transport adapters ──
//
// One adapter per source kind, all with the same capability set: connect
// (spawn the I/O task with its reconnect loop), disconnect, translate a
// raw wire event into canonical mutations, and translate a canonical
// write into a transport call. Adapters never touch the tree; everything
// they observe goes through the ingest queue, and every write completion
// comes back on the completion channel.

mod dbus;
mod mock;
mod mqtt;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use velink_api::ReconnectConfig;

use crate::backend::{ConnectionState, SourceConfig, SourceKind};
use crate::error::CoreError;
use crate::ingest::IngestSender;
use crate::model::{ItemPath, Value};
use crate::tree::Mutation;

pub use dbus::DbusAdapter;
pub use mock::{MockAdapter, MockEvent};
pub use mqtt::MqttAdapter;

/// A consumer write accepted by the tree, on its way to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub id: u64,
    pub path: ItemPath,
    pub value: Value,
}

/// Outcome of a [`WriteRequest`], delivered back to the session loop.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCompletion {
    pub id: u64,
    pub result: Result<(), CoreError>,
}

/// Everything an adapter's background task needs.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub ingest: IngestSender,
    pub completions: mpsc::UnboundedSender<WriteCompletion>,
    pub cancel: CancellationToken,
    pub reconnect: ReconnectConfig,
}

impl AdapterContext {
    /// Report a status transition. A closed queue means the session is
    /// gone; the caller's task will be cancelled shortly.
    pub(crate) async fn status(&self, state: ConnectionState) {
        let _ = self.ingest.status(state).await;
    }

    /// Queue translated mutations in order. `false` once the session is gone.
    pub(crate) async fn push_all(&self, mutations: Vec<Mutation>) -> bool {
        for m in mutations {
            if self.ingest.send(m).await.is_err() {
                return false;
            }
        }
        true
    }

    pub(crate) fn complete(&self, id: u64, result: Result<(), CoreError>) {
        let _ = self.completions.send(WriteCompletion { id, result });
    }

    /// Sleep before the next attempt. Returns `None` when retries are
    /// exhausted or the adapter was cancelled, otherwise the next attempt
    /// number (already reported as `Retrying`).
    pub(crate) async fn backoff(&self, attempt: u32, source: SourceKind) -> Option<u32> {
        if self.reconnect.exhausted(attempt) {
            warn!(%source, attempts = attempt, "giving up after exhausting retries");
            return None;
        }
        let delay = self.reconnect.delay(attempt);
        let next = attempt + 1;
        info!(
            %source,
            attempt = next,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting after backoff"
        );
        self.status(ConnectionState::Retrying { attempt: next }).await;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            () = tokio::time::sleep(delay) => Some(next),
        }
    }
}

/// The adapter contract shared by every transport.
pub trait TransportAdapter {
    /// What the transport delivers before translation.
    type RawEvent;

    fn kind(&self) -> SourceKind;

    /// Start the background I/O task. Returns immediately; progress is
    /// reported through `ctx.ingest` as status entries.
    fn connect(&mut self, ctx: AdapterContext);

    /// Stop the background task. Idempotent.
    fn disconnect(&mut self);

    /// Translate one wire event into canonical mutations.
    fn on_remote_event(&self, event: Self::RawEvent) -> Vec<Mutation>;

    /// Hand a write to the transport. Never blocks; the outcome arrives on
    /// the completion channel.
    fn translate_write(&self, request: WriteRequest);
}

// ── Transport ────────────────────────────────────────────────────────

/// The active adapter, chosen once from the source configuration.
#[derive(Debug)]
pub enum Transport {
    Dbus(DbusAdapter),
    Mqtt(MqttAdapter),
    Mock(MockAdapter),
}

impl Transport {
    pub fn from_config(config: &SourceConfig) -> Self {
        match config {
            SourceConfig::Dbus { address } => Self::Dbus(DbusAdapter::new(address.clone())),
            SourceConfig::Mqtt { endpoint, options } => {
                Self::Mqtt(MqttAdapter::new(endpoint.clone(), options.clone()))
            }
            SourceConfig::Mock { interval } => Self::Mock(MockAdapter::new(*interval)),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Dbus(a) => a.kind(),
            Self::Mqtt(a) => a.kind(),
            Self::Mock(a) => a.kind(),
        }
    }

    pub fn connect(&mut self, ctx: AdapterContext) {
        match self {
            Self::Dbus(a) => a.connect(ctx),
            Self::Mqtt(a) => a.connect(ctx),
            Self::Mock(a) => a.connect(ctx),
        }
    }

    pub fn disconnect(&mut self) {
        match self {
            Self::Dbus(a) => a.disconnect(),
            Self::Mqtt(a) => a.disconnect(),
            Self::Mock(a) => a.disconnect(),
        }
    }

    pub fn translate_write(&self, request: WriteRequest) {
        match self {
            Self::Dbus(a) => a.translate_write(request),
            Self::Mqtt(a) => a.translate_write(request),
            Self::Mock(a) => a.translate_write(request),
        }
    }
}

/// Interval between keep-alive publishes and similar periodic chores.
pub(crate) fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}
