use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use velink_api::{BrokerClient, BrokerEndpoint, BrokerMessage, BrokerOptions, BrokerWriter};

use super::{AdapterContext, TransportAdapter, WriteRequest, ticker};
use crate::backend::{ConnectionState, SourceKind};
use crate::error::CoreError;
use crate::model::{ItemPath, Value};
use crate::tree::Mutation;

/// Adapter for the broker bridge.
///
/// `N/<portal>/battery/256/Dc/0/Voltage` carrying `{"value": 12.8}` becomes
/// item `battery/256/Dc/0/Voltage`; an empty payload removes the item.
pub struct MqttAdapter {
    endpoint: BrokerEndpoint,
    options: BrokerOptions,
    writer: Arc<Mutex<Option<BrokerWriter>>>,
    ctx: Option<AdapterContext>,
    cancel: Option<CancellationToken>,
}

impl MqttAdapter {
    pub fn new(endpoint: BrokerEndpoint, options: BrokerOptions) -> Self {
        Self {
            endpoint,
            options,
            writer: Arc::new(Mutex::new(None)),
            ctx: None,
            cancel: None,
        }
    }
}

impl TransportAdapter for MqttAdapter {
    type RawEvent = BrokerMessage;

    fn kind(&self) -> SourceKind {
        SourceKind::Mqtt
    }

    fn connect(&mut self, ctx: AdapterContext) {
        self.disconnect();
        let cancel = ctx.cancel.child_token();
        let task_ctx = AdapterContext {
            cancel: cancel.clone(),
            ..ctx.clone()
        };
        tokio::spawn(run(
            self.endpoint.clone(),
            self.options.clone(),
            Arc::clone(&self.writer),
            task_ctx,
        ));
        self.cancel = Some(cancel);
        self.ctx = Some(ctx);
    }

    fn disconnect(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        *self.writer.lock() = None;
    }

    fn on_remote_event(&self, event: BrokerMessage) -> Vec<Mutation> {
        translate(&event)
    }

    fn translate_write(&self, request: WriteRequest) {
        let Some(ctx) = self.ctx.clone() else {
            return;
        };
        let writer = self.writer.lock().clone();
        tokio::spawn(async move {
            let result = match writer {
                None => Err(CoreError::rejected(&request.path, "transport disconnected")),
                Some(writer) => match write_payload(&request.value) {
                    Ok(payload) => writer
                        .write(&request.path.to_string(), payload)
                        .await
                        .map_err(|e| CoreError::rejected(&request.path, e.to_string())),
                    Err(e) => Err(CoreError::rejected(&request.path, e.to_string())),
                },
            };
            ctx.complete(request.id, result);
        });
    }
}

impl fmt::Debug for MqttAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttAdapter")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.options.client_id)
            .field("connected", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

// ── Background task ──────────────────────────────────────────────────

async fn run(
    endpoint: BrokerEndpoint,
    options: BrokerOptions,
    writer: Arc<Mutex<Option<BrokerWriter>>>,
    ctx: AdapterContext,
) {
    let mut attempt: u32 = 0;
    loop {
        ctx.status(ConnectionState::Connecting).await;
        let connected = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            result = BrokerClient::connect(&endpoint, &options) => result,
        };

        match connected {
            Ok(mut client) => {
                attempt = 0;
                *writer.lock() = Some(client.writer());
                let keepalive = ctx.cancel.child_token();
                tokio::spawn(keep_alive(
                    client.writer(),
                    options.keepalive,
                    keepalive.clone(),
                ));
                ctx.status(ConnectionState::Connected).await;
                info!(%endpoint, portal = client.portal_id(), "broker source connected");

                let outcome = stream(&mut client, &ctx).await;
                keepalive.cancel();
                *writer.lock() = None;
                if ctx.cancel.is_cancelled() {
                    client.disconnect().await;
                    break;
                }
                if let Err(e) = outcome {
                    warn!(%endpoint, error = %e, "broker connection lost");
                }
            }
            Err(e) => warn!(%endpoint, error = %e, "broker connection failed"),
        }

        ctx.status(ConnectionState::Disconnected).await;
        match ctx.backoff(attempt, SourceKind::Mqtt).await {
            Some(next) => attempt = next,
            None => return,
        }
    }
    debug!("broker adapter stopped");
}

async fn stream(client: &mut BrokerClient, ctx: &AdapterContext) -> Result<(), velink_api::Error> {
    loop {
        let message = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Ok(()),
            message = client.next_message() => message?,
        };
        if !ctx.push_all(translate(&message)).await {
            return Ok(());
        }
    }
}

/// Publish `R/<portal>/keepalive` every period. The first publish makes the
/// bridge republish every topic, which repopulates the tree.
async fn keep_alive(writer: BrokerWriter, period: std::time::Duration, cancel: CancellationToken) {
    let mut tick = ticker(period);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = tick.tick() => {
                if let Err(e) = writer.keepalive().await {
                    debug!(error = %e, "keep-alive publish failed");
                    break;
                }
                trace!(portal = writer.portal_id(), "keep-alive sent");
            }
        }
    }
}

// ── Translation helpers ──────────────────────────────────────────────

fn translate(message: &BrokerMessage) -> Vec<Mutation> {
    let mut parts = message.topic.splitn(3, '/');
    let (Some("N"), Some(_portal), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
        return Vec::new();
    };
    let path = ItemPath::from_slash_path(rest);
    if path.is_root() {
        return Vec::new();
    }
    if message.payload.is_empty() {
        return vec![Mutation::ItemRemoved { path }];
    }
    match serde_json::from_slice::<serde_json::Value>(&message.payload) {
        Ok(json) => {
            let value = json.get("value").map(Value::from_json).unwrap_or_default();
            vec![Mutation::ValueChanged { path, value }]
        }
        Err(e) => {
            debug!(topic = %message.topic, error = %e, "dropping malformed payload");
            Vec::new()
        }
    }
}

fn write_payload(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&serde_json::json!({ "value": value.to_json() }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn msg(topic: &str, payload: &str) -> BrokerMessage {
        BrokerMessage {
            topic: topic.into(),
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        }
    }

    #[test]
    fn notification_becomes_value_change() {
        let out = translate(&msg("N/c0619ab1cafe/battery/256/Dc/0/Voltage", r#"{"value": 12.8}"#));
        assert_eq!(
            out,
            vec![Mutation::value_changed("battery/256/Dc/0/Voltage", 12.8)]
        );
    }

    #[test]
    fn null_value_is_invalid() {
        let out = translate(&msg("N/id/tank/20/Level", r#"{"value": null}"#));
        assert_eq!(
            out,
            vec![Mutation::ValueChanged {
                path: ItemPath::parse("tank/20/Level"),
                value: Value::Invalid
            }]
        );
    }

    #[test]
    fn empty_payload_removes_item() {
        let out = translate(&msg("N/id/tank/20/Level", ""));
        assert_eq!(
            out,
            vec![Mutation::ItemRemoved {
                path: ItemPath::parse("tank/20/Level")
            }]
        );
    }

    #[test]
    fn foreign_and_malformed_messages_are_ignored() {
        assert!(translate(&msg("W/id/tank/20/Level", r#"{"value": 1}"#)).is_empty());
        assert!(translate(&msg("N/id", r#"{"value": 1}"#)).is_empty());
        assert!(translate(&msg("N/id/x", "not json")).is_empty());
    }

    #[test]
    fn write_payload_wraps_value() {
        let bytes = write_payload(&Value::Int(80)).unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&bytes).unwrap(),
            serde_json::json!({ "value": 80 })
        );
    }

    #[test]
    fn background_task_is_spawnable() {
        fn assert_send<T: Send>(_: &T) {}
        let (ingest, _rx) = crate::ingest::channel(4);
        let (completions, _done) = tokio::sync::mpsc::unbounded_channel();
        let ctx = AdapterContext {
            ingest,
            completions,
            cancel: CancellationToken::new(),
            reconnect: velink_api::ReconnectConfig::default(),
        };
        let task = run(
            "mqtt://localhost".parse().unwrap(),
            BrokerOptions::default(),
            Arc::new(Mutex::new(None)),
            ctx,
        );
        assert_send(&task);
    }

    #[test]
    fn adapter_translation_matches_helper() {
        let adapter = MqttAdapter::new(
            "mqtt://localhost".parse().unwrap(),
            BrokerOptions::default(),
        );
        let m = msg("N/id/grid/30/Ac/Power", r#"{"value": 310}"#);
        assert_eq!(adapter.on_remote_event(m.clone()), translate(&m));
    }
}
