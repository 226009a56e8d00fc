//! D-Bus client for `com.victronenergy.*` services.
//!
//! Every Venus service owns a well-known name `com.victronenergy.<type>.<instance>`
//! and exposes its values as objects implementing `com.victronenergy.BusItem`.
//! This client:
//!
//! 1. subscribes to bus signals *before* enumerating, so nothing published in
//!    between is lost,
//! 2. lists the matching services and fetches their items with `GetItems`,
//! 3. streams `ItemsChanged` / `PropertiesChanged` / `NameOwnerChanged` as
//!    [`BusEvent`]s until the connection drops.
//!
//! Writes go through a cheap [`DbusWriter`] clone of the connection so they
//! can run on their own task.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use futures_util::StreamExt;
use tracing::{debug, trace, warn};
use zbus::connection::Builder;
use zbus::zvariant::{OwnedValue, Value};
use zbus::message::Type as MessageType;
use zbus::{Connection, MatchRule, Message, MessageStream};

use crate::error::Error;

/// Well-known name prefix shared by all Venus services.
pub const SERVICE_PREFIX: &str = "com.victronenergy.";

/// Interface implemented by every published object.
pub const BUS_ITEM_INTERFACE: &str = "com.victronenergy.BusItem";

const DBUS_NAME: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";

/// Signals buffered by zbus before the stream is polled.
const SIGNAL_QUEUE: usize = 4096;

// ── Address ──────────────────────────────────────────────────────────

/// Where to find the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbusAddress {
    /// The system bus (default on a GX device).
    System,
    /// The session bus of the current user.
    Session,
    /// Explicit D-Bus address, e.g. `tcp:host=localhost,port=3000`.
    Address(String),
}

impl FromStr for DbusAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "system" => Ok(Self::System),
            "session" => Ok(Self::Session),
            other => {
                zbus::Address::from_str(other).map_err(|e| Error::InvalidBusAddress {
                    address: other.to_owned(),
                    reason: e.to_string(),
                })?;
                Ok(Self::Address(other.to_owned()))
            }
        }
    }
}

impl fmt::Display for DbusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Session => f.write_str("session"),
            Self::Address(a) => f.write_str(a),
        }
    }
}

// ── Wire values ──────────────────────────────────────────────────────

/// A decoded D-Bus variant, reduced to what BusItems actually publish.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Venus encodes "no value" as an empty array.
    Invalid,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<WireValue>),
}

impl WireValue {
    /// Decode a zvariant value. Unsupported containers decode as `Invalid`.
    pub fn from_variant(value: &Value<'_>) -> Self {
        match value {
            Value::Bool(b) => Self::Bool(*b),
            Value::U8(v) => Self::UInt(u64::from(*v)),
            Value::U16(v) => Self::UInt(u64::from(*v)),
            Value::U32(v) => Self::UInt(u64::from(*v)),
            Value::U64(v) => Self::UInt(*v),
            Value::I16(v) => Self::Int(i64::from(*v)),
            Value::I32(v) => Self::Int(i64::from(*v)),
            Value::I64(v) => Self::Int(*v),
            Value::F64(v) => Self::Double(*v),
            Value::Str(s) => Self::Str(s.as_str().to_owned()),
            Value::ObjectPath(p) => Self::Str(p.as_str().to_owned()),
            Value::Value(inner) => Self::from_variant(inner),
            Value::Array(items) => {
                if items.is_empty() {
                    Self::Invalid
                } else if items.iter().all(|v| matches!(v, Value::U8(_))) {
                    Self::Bytes(
                        items
                            .iter()
                            .filter_map(|v| match v {
                                Value::U8(b) => Some(*b),
                                _ => None,
                            })
                            .collect(),
                    )
                } else {
                    Self::List(items.iter().map(Self::from_variant).collect())
                }
            }
            other => {
                trace!(signature = %other.value_signature(), "unsupported variant");
                Self::Invalid
            }
        }
    }

    /// Encode for a `SetValue` call.
    pub fn to_variant(&self) -> Result<Value<'static>, Error> {
        Ok(match self {
            Self::Invalid => Value::from(Vec::<i32>::new()),
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => i32::try_from(*i).map_or(Value::I64(*i), Value::I32),
            Self::UInt(u) => u32::try_from(*u).map_or(Value::U64(*u), Value::U32),
            Self::Double(d) => Value::F64(*d),
            Self::Str(s) => Value::from(s.clone()),
            Self::Bytes(b) => Value::from(b.clone()),
            Self::List(_) => return Err(Error::UnsupportedValue("list".into())),
        })
    }
}

/// One object of a service: its object path, value and display text.
#[derive(Debug, Clone, PartialEq)]
pub struct BusItemValue {
    /// Object path, e.g. `/Dc/0/Voltage`.
    pub path: String,
    pub value: WireValue,
    pub text: Option<String>,
}

/// A raw change observed on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// A service registered (or was present at startup) with these items.
    ServiceAppeared {
        service: String,
        items: Vec<BusItemValue>,
    },
    /// A service released its name.
    ServiceVanished { service: String },
    /// One or more items of a service changed.
    ItemsChanged {
        service: String,
        items: Vec<BusItemValue>,
    },
}

type ItemMap = HashMap<String, HashMap<String, OwnedValue>>;

// ── DbusClient ───────────────────────────────────────────────────────

/// A live connection to a bus with the Venus signal subscription in place.
pub struct DbusClient {
    conn: Connection,
    signals: MessageStream,
    /// Unique connection name (`:1.42`) → well-known service name.
    owners: HashMap<String, String>,
}

impl DbusClient {
    /// Connect and subscribe to bus signals.
    pub async fn connect(address: &DbusAddress) -> Result<Self, Error> {
        let builder = match address {
            DbusAddress::System => Builder::system()?,
            DbusAddress::Session => Builder::session()?,
            DbusAddress::Address(addr) => Builder::address(addr.as_str())?,
        };
        let conn = builder.build().await?;
        debug!(%address, "D-Bus connection established");

        let rule = MatchRule::builder().msg_type(MessageType::Signal).build();
        let signals = MessageStream::for_match_rule(rule, &conn, Some(SIGNAL_QUEUE)).await?;

        Ok(Self {
            conn,
            signals,
            owners: HashMap::new(),
        })
    }

    /// A write handle sharing this connection.
    pub fn writer(&self) -> DbusWriter {
        DbusWriter {
            conn: self.conn.clone(),
        }
    }

    /// Enumerate all Venus services currently on the bus.
    ///
    /// A service that fails to answer is skipped with a warning; it will be
    /// picked up again if it re-registers.
    pub async fn discover(&mut self) -> Result<Vec<BusEvent>, Error> {
        let reply = self
            .conn
            .call_method(Some(DBUS_NAME), DBUS_PATH, Some(DBUS_NAME), "ListNames", &())
            .await?;
        let names: Vec<String> = reply.body().deserialize()?;

        let mut events = Vec::new();
        for service in names.into_iter().filter(|n| n.starts_with(SERVICE_PREFIX)) {
            match self.track_service(&service).await {
                Ok(items) => events.push(BusEvent::ServiceAppeared { service, items }),
                Err(e) => warn!(%service, error = %e, "skipping service that failed to enumerate"),
            }
        }
        debug!(services = events.len(), "D-Bus discovery complete");
        Ok(events)
    }

    /// Fetch every item of a service with `GetItems` on `/`.
    pub async fn get_items(&self, service: &str) -> Result<Vec<BusItemValue>, Error> {
        let reply = self
            .conn
            .call_method(Some(service), "/", Some(BUS_ITEM_INTERFACE), "GetItems", &())
            .await?;
        let items: ItemMap = reply.body().deserialize()?;
        Ok(decode_items(items))
    }

    /// Wait for the next relevant signal.
    ///
    /// Returns `Ok(None)` once the connection has closed.
    pub async fn next_event(&mut self) -> Result<Option<BusEvent>, Error> {
        while let Some(msg) = self.signals.next().await {
            let msg = msg?;
            if let Some(event) = self.decode_signal(&msg).await {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    async fn track_service(&mut self, service: &str) -> Result<Vec<BusItemValue>, Error> {
        let reply = self
            .conn
            .call_method(
                Some(DBUS_NAME),
                DBUS_PATH,
                Some(DBUS_NAME),
                "GetNameOwner",
                &(service,),
            )
            .await?;
        let owner: String = reply.body().deserialize()?;
        self.owners.insert(owner, service.to_owned());
        self.get_items(service).await
    }

    async fn decode_signal(&mut self, msg: &Message) -> Option<BusEvent> {
        let (interface, member, path, sender) = {
            let header = msg.header();
            (
                header.interface().map(|i| i.as_str().to_owned()),
                header.member().map(|m| m.as_str().to_owned()),
                header.path().map(|p| p.as_str().to_owned()),
                header.sender().map(|s| s.as_str().to_owned()),
            )
        };

        match (interface.as_deref(), member.as_deref()) {
            (Some(DBUS_NAME), Some("NameOwnerChanged")) => {
                let (name, _old, new_owner): (String, String, String) =
                    log_decode(msg.body().deserialize(), "NameOwnerChanged")?;
                if !name.starts_with(SERVICE_PREFIX) {
                    return None;
                }
                self.owners.retain(|_, service| *service != name);
                if new_owner.is_empty() {
                    return Some(BusEvent::ServiceVanished { service: name });
                }
                self.owners.insert(new_owner, name.clone());
                let items = self.get_items(&name).await.unwrap_or_else(|e| {
                    warn!(service = %name, error = %e, "GetItems failed for new service");
                    Vec::new()
                });
                Some(BusEvent::ServiceAppeared {
                    service: name,
                    items,
                })
            }
            (Some(BUS_ITEM_INTERFACE), Some("ItemsChanged")) => {
                let service = self.service_for(sender.as_deref())?;
                let items: ItemMap = log_decode(msg.body().deserialize(), "ItemsChanged")?;
                Some(BusEvent::ItemsChanged {
                    service,
                    items: decode_items(items),
                })
            }
            (Some(BUS_ITEM_INTERFACE), Some("PropertiesChanged")) => {
                let service = self.service_for(sender.as_deref())?;
                let props: HashMap<String, OwnedValue> =
                    log_decode(msg.body().deserialize(), "PropertiesChanged")?;
                let item = decode_item(path.unwrap_or_default(), &props)?;
                Some(BusEvent::ItemsChanged {
                    service,
                    items: vec![item],
                })
            }
            _ => None,
        }
    }

    fn service_for(&self, sender: Option<&str>) -> Option<String> {
        let sender = sender?;
        let service = self.owners.get(sender).cloned();
        if service.is_none() {
            trace!(sender, "signal from untracked sender");
        }
        service
    }
}

// ── DbusWriter ───────────────────────────────────────────────────────

/// Cloneable write handle.
#[derive(Clone)]
pub struct DbusWriter {
    conn: Connection,
}

impl DbusWriter {
    /// Call `SetValue` on `service` at object `path`.
    pub async fn set_value(&self, service: &str, path: &str, value: &WireValue) -> Result<(), Error> {
        let variant = value.to_variant()?;
        let reply = self
            .conn
            .call_method(
                Some(service),
                path,
                Some(BUS_ITEM_INTERFACE),
                "SetValue",
                &variant,
            )
            .await?;
        let status: i32 = reply.body().deserialize()?;
        if status == 0 {
            Ok(())
        } else {
            Err(Error::DbusWriteRefused {
                service: service.to_owned(),
                path: path.to_owned(),
                status,
            })
        }
    }
}

// ── Decoding helpers ─────────────────────────────────────────────────

fn log_decode<T>(result: zbus::Result<T>, signal: &str) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(signal, error = %e, "dropping undecodable signal body");
            None
        }
    }
}

fn decode_item(path: String, props: &HashMap<String, OwnedValue>) -> Option<BusItemValue> {
    let value = props.get("Value")?;
    let text = props.get("Text").and_then(|t| match &**t {
        Value::Str(s) => Some(s.as_str().to_owned()),
        _ => None,
    });
    Some(BusItemValue {
        path,
        value: WireValue::from_variant(value),
        text,
    })
}

fn decode_items(items: ItemMap) -> Vec<BusItemValue> {
    let mut decoded: Vec<BusItemValue> = items
        .into_iter()
        .filter_map(|(path, props)| decode_item(path, &props))
        .collect();
    decoded.sort_by(|a, b| a.path.cmp(&b.path));
    decoded
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_well_known_addresses() {
        assert_eq!("".parse::<DbusAddress>().unwrap(), DbusAddress::System);
        assert_eq!("system".parse::<DbusAddress>().unwrap(), DbusAddress::System);
        assert_eq!(
            "session".parse::<DbusAddress>().unwrap(),
            DbusAddress::Session
        );
    }

    #[test]
    fn parse_tcp_address() {
        let addr: DbusAddress = "tcp:host=localhost,port=3000".parse().unwrap();
        assert_eq!(
            addr,
            DbusAddress::Address("tcp:host=localhost,port=3000".into())
        );
        assert_eq!(addr.to_string(), "tcp:host=localhost,port=3000");
    }

    #[test]
    fn reject_garbage_address() {
        let err = "not an address".parse::<DbusAddress>().unwrap_err();
        assert!(err.is_configuration(), "got {err:?}");
    }

    #[test]
    fn empty_array_is_invalid() {
        let v = Value::from(Vec::<i32>::new());
        assert_eq!(WireValue::from_variant(&v), WireValue::Invalid);
    }

    #[test]
    fn decode_scalars() {
        assert_eq!(WireValue::from_variant(&Value::F64(12.8)), WireValue::Double(12.8));
        assert_eq!(WireValue::from_variant(&Value::I32(-3)), WireValue::Int(-3));
        assert_eq!(WireValue::from_variant(&Value::U8(7)), WireValue::UInt(7));
        assert_eq!(
            WireValue::from_variant(&Value::from("Battery")),
            WireValue::Str("Battery".into())
        );
        let nested = Value::Value(Box::new(Value::Bool(true)));
        assert_eq!(WireValue::from_variant(&nested), WireValue::Bool(true));
    }

    #[test]
    fn byte_arrays_decode_as_bytes() {
        let v = Value::from(vec![1u8, 2, 3]);
        assert_eq!(WireValue::from_variant(&v), WireValue::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn encode_prefers_narrow_integers() {
        assert_eq!(WireValue::Int(5).to_variant().unwrap(), Value::I32(5));
        assert_eq!(
            WireValue::Int(i64::MAX).to_variant().unwrap(),
            Value::I64(i64::MAX)
        );
        assert!(WireValue::List(vec![]).to_variant().is_err());
    }

    #[test]
    fn decode_item_requires_value_key() {
        let mut props = HashMap::new();
        props.insert(
            "Text".to_owned(),
            OwnedValue::try_from(Value::from("12.8V")).unwrap(),
        );
        assert!(decode_item("/Dc/0/Voltage".into(), &props).is_none());

        props.insert(
            "Value".to_owned(),
            OwnedValue::try_from(Value::F64(12.8)).unwrap(),
        );
        let item = decode_item("/Dc/0/Voltage".into(), &props).unwrap();
        assert_eq!(item.value, WireValue::Double(12.8));
        assert_eq!(item.text.as_deref(), Some("12.8V"));
    }
}
