use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use velink_api::dbus::SERVICE_PREFIX;
use velink_api::{BusEvent, DbusAddress, DbusClient, DbusWriter, WireValue};

use super::{AdapterContext, TransportAdapter, WriteRequest};
use crate::backend::{ConnectionState, SourceKind};
use crate::error::CoreError;
use crate::model::{ItemPath, Value};
use crate::tree::Mutation;

/// Adapter for `com.victronenergy.*` services on a D-Bus bus.
///
/// Service `com.victronenergy.battery.ttyO1` with object `/Dc/0/Voltage`
/// becomes item `battery/ttyO1/Dc/0/Voltage`.
pub struct DbusAdapter {
    address: DbusAddress,
    shared: Arc<Shared>,
    ctx: Option<AdapterContext>,
    cancel: Option<CancellationToken>,
}

#[derive(Default)]
struct Shared {
    writer: Mutex<Option<DbusWriter>>,
    /// Tree prefix of each known service → its bus name.
    services: Mutex<HashMap<ItemPath, String>>,
}

impl Shared {
    fn translate(&self, event: BusEvent) -> Vec<Mutation> {
        match event {
            BusEvent::ServiceAppeared { service, items } => {
                let Some(root) = service_path(&service) else {
                    return Vec::new();
                };
                self.services.lock().insert(root.clone(), service);
                let mut out = Vec::with_capacity(items.len() + 1);
                out.push(Mutation::ItemAdded { path: root.clone() });
                out.extend(items.into_iter().map(|item| Mutation::ValueChanged {
                    path: root.join(&ItemPath::from_slash_path(&item.path)),
                    value: wire_to_value(item.value),
                }));
                out
            }
            BusEvent::ServiceVanished { service } => {
                let Some(root) = service_path(&service) else {
                    return Vec::new();
                };
                self.services.lock().remove(&root);
                vec![Mutation::ItemRemoved { path: root }]
            }
            BusEvent::ItemsChanged { service, items } => {
                let Some(root) = service_path(&service) else {
                    return Vec::new();
                };
                items
                    .into_iter()
                    .map(|item| Mutation::ValueChanged {
                        path: root.join(&ItemPath::from_slash_path(&item.path)),
                        value: wire_to_value(item.value),
                    })
                    .collect()
            }
        }
    }

    /// Split an item path into the owning service and its object path,
    /// preferring the longest known service prefix.
    fn route(&self, path: &ItemPath) -> Option<(String, String)> {
        let services = self.services.lock();
        (1..=path.len()).rev().find_map(|n| {
            let service = services.get(&path.truncated(n))?;
            let object = format!("/{}", path.segments()[n..].join("/"));
            Some((service.clone(), object))
        })
    }
}

impl DbusAdapter {
    pub fn new(address: DbusAddress) -> Self {
        Self {
            address,
            shared: Arc::new(Shared::default()),
            ctx: None,
            cancel: None,
        }
    }
}

impl TransportAdapter for DbusAdapter {
    type RawEvent = BusEvent;

    fn kind(&self) -> SourceKind {
        SourceKind::Dbus
    }

    fn connect(&mut self, ctx: AdapterContext) {
        self.disconnect();
        let cancel = ctx.cancel.child_token();
        let task_ctx = AdapterContext {
            cancel: cancel.clone(),
            ..ctx.clone()
        };
        tokio::spawn(run(self.address.clone(), Arc::clone(&self.shared), task_ctx));
        self.cancel = Some(cancel);
        self.ctx = Some(ctx);
    }

    fn disconnect(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        *self.shared.writer.lock() = None;
    }

    fn on_remote_event(&self, event: BusEvent) -> Vec<Mutation> {
        self.shared.translate(event)
    }

    fn translate_write(&self, request: WriteRequest) {
        let Some(ctx) = self.ctx.clone() else {
            return;
        };
        let writer = self.shared.writer.lock().clone();
        let route = self.shared.route(&request.path);
        tokio::spawn(async move {
            let result = match (writer, route) {
                (None, _) => Err(CoreError::rejected(&request.path, "transport disconnected")),
                (_, None) => Err(CoreError::rejected(
                    &request.path,
                    "no D-Bus service owns this path",
                )),
                (Some(writer), Some((service, object))) => {
                    debug!(%service, %object, value = %request.value, "SetValue");
                    writer
                        .set_value(&service, &object, &value_to_wire(&request.value))
                        .await
                        .map_err(|e| CoreError::rejected(&request.path, e.to_string()))
                }
            };
            ctx.complete(request.id, result);
        });
    }
}

impl fmt::Debug for DbusAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbusAdapter")
            .field("address", &self.address)
            .field("connected", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

// ── Background task ──────────────────────────────────────────────────

async fn run(address: DbusAddress, shared: Arc<Shared>, ctx: AdapterContext) {
    let mut attempt: u32 = 0;
    loop {
        ctx.status(ConnectionState::Connecting).await;
        let connected = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            result = DbusClient::connect(&address) => result,
        };

        match connected {
            Ok(mut client) => {
                attempt = 0;
                let outcome = stream(&mut client, &shared, &ctx).await;
                *shared.writer.lock() = None;
                if ctx.cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = outcome {
                    warn!(%address, error = %e, "D-Bus connection lost");
                }
            }
            Err(e) if e.is_configuration() => {
                error!(%address, error = %e, "D-Bus address rejected");
                ctx.status(ConnectionState::Disconnected).await;
                return;
            }
            Err(e) => warn!(%address, error = %e, "D-Bus connection failed"),
        }

        ctx.status(ConnectionState::Disconnected).await;
        match ctx.backoff(attempt, SourceKind::Dbus).await {
            Some(next) => attempt = next,
            None => return,
        }
    }
    debug!("D-Bus adapter stopped");
}

/// Populate from a fresh connection, then forward signals until it drops.
async fn stream(
    client: &mut DbusClient,
    shared: &Shared,
    ctx: &AdapterContext,
) -> Result<(), velink_api::Error> {
    *shared.writer.lock() = Some(client.writer());
    let services = client.discover().await?;
    let count = services.len();
    for event in services {
        if !ctx.push_all(shared.translate(event)).await {
            return Ok(());
        }
    }
    ctx.status(ConnectionState::Connected).await;
    info!(services = count, "D-Bus source connected");

    loop {
        let event = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Ok(()),
            event = client.next_event() => event?,
        };
        let Some(event) = event else {
            return Err(velink_api::Error::Closed);
        };
        if !ctx.push_all(shared.translate(event)).await {
            return Ok(());
        }
    }
}

// ── Translation helpers ──────────────────────────────────────────────

/// `com.victronenergy.battery.ttyO1` → `battery/ttyO1`.
fn service_path(service: &str) -> Option<ItemPath> {
    let rest = service.strip_prefix(SERVICE_PREFIX)?;
    let path = ItemPath::from_segments(rest.split('.'));
    (!path.is_root()).then_some(path)
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn wire_to_value(wire: WireValue) -> Value {
    match wire {
        WireValue::Invalid => Value::Invalid,
        WireValue::Bool(b) => Value::Bool(b),
        WireValue::Int(i) => Value::Int(i),
        WireValue::UInt(u) => i64::try_from(u).map_or(Value::Float(u as f64), Value::Int),
        WireValue::Double(d) => Value::Float(d),
        WireValue::Str(s) => Value::String(s),
        WireValue::Bytes(b) => Value::Bytes(b.into()),
        WireValue::List(items) => {
            let json: Vec<serde_json::Value> = items
                .into_iter()
                .map(|w| wire_to_value(w).to_json())
                .collect();
            Value::String(serde_json::Value::Array(json).to_string())
        }
    }
}

fn value_to_wire(value: &Value) -> WireValue {
    match value {
        Value::Invalid => WireValue::Invalid,
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Int(i) => WireValue::Int(*i),
        Value::Float(f) => WireValue::Double(*f),
        Value::String(s) => WireValue::Str(s.clone()),
        Value::Bytes(b) => WireValue::Bytes(b.to_vec()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use velink_api::BusItemValue;

    use super::*;

    fn item(path: &str, value: WireValue) -> BusItemValue {
        BusItemValue {
            path: path.into(),
            value,
            text: None,
        }
    }

    fn adapter() -> DbusAdapter {
        DbusAdapter::new(DbusAddress::System)
    }

    #[test]
    fn service_names_map_to_tree_prefixes() {
        assert_eq!(
            service_path("com.victronenergy.battery.ttyO1"),
            Some(ItemPath::parse("battery/ttyO1"))
        );
        assert_eq!(
            service_path("com.victronenergy.settings"),
            Some(ItemPath::parse("settings"))
        );
        assert_eq!(service_path("org.freedesktop.DBus"), None);
    }

    #[test]
    fn appearing_service_adds_root_and_values() {
        let a = adapter();
        let out = a.on_remote_event(BusEvent::ServiceAppeared {
            service: "com.victronenergy.battery.ttyO1".into(),
            items: vec![
                item("/Dc/0/Voltage", WireValue::Double(12.8)),
                item("/Soc", WireValue::Invalid),
            ],
        });
        assert_eq!(
            out,
            vec![
                Mutation::ItemAdded {
                    path: ItemPath::parse("battery/ttyO1")
                },
                Mutation::value_changed("battery/ttyO1/Dc/0/Voltage", 12.8),
                Mutation::ValueChanged {
                    path: ItemPath::parse("battery/ttyO1/Soc"),
                    value: Value::Invalid
                },
            ]
        );
    }

    #[test]
    fn vanished_service_removes_subtree() {
        let a = adapter();
        let out = a.on_remote_event(BusEvent::ServiceVanished {
            service: "com.victronenergy.tank.ttyO3".into(),
        });
        assert_eq!(
            out,
            vec![Mutation::ItemRemoved {
                path: ItemPath::parse("tank/ttyO3")
            }]
        );
    }

    #[test]
    fn writes_route_to_longest_service_prefix() {
        let a = adapter();
        a.on_remote_event(BusEvent::ServiceAppeared {
            service: "com.victronenergy.settings".into(),
            items: vec![],
        });
        a.on_remote_event(BusEvent::ServiceAppeared {
            service: "com.victronenergy.vebus.ttyS3".into(),
            items: vec![],
        });

        assert_eq!(
            a.shared
                .route(&ItemPath::parse("settings/Settings/Gui/Brightness")),
            Some((
                "com.victronenergy.settings".into(),
                "/Settings/Gui/Brightness".into()
            ))
        );
        assert_eq!(
            a.shared.route(&ItemPath::parse("vebus/ttyS3/Mode")),
            Some(("com.victronenergy.vebus.ttyS3".into(), "/Mode".into()))
        );
        assert_eq!(a.shared.route(&ItemPath::parse("unknown/x")), None);
    }

    #[test]
    fn wire_values_convert_both_ways() {
        assert_eq!(wire_to_value(WireValue::UInt(7)), Value::Int(7));
        assert_eq!(
            wire_to_value(WireValue::List(vec![WireValue::Int(1), WireValue::Str("a".into())])),
            Value::String(r#"[1,"a"]"#.into())
        );
        assert_eq!(value_to_wire(&Value::Float(1.5)), WireValue::Double(1.5));
        assert_eq!(value_to_wire(&Value::Invalid), WireValue::Invalid);
    }
}
