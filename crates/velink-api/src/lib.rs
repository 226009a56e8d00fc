//! Wire-level clients for the data sources a Venus device exposes.
//!
//! This crate speaks the transports and nothing else. It knows how to open
//! a connection, enumerate what is published and stream raw change
//! notifications, but it has no notion of an item tree:
//!
//! - **[`dbus`]**: `zbus` client for the `com.victronenergy.*` services on a
//!   system bus (local socket or `tcp:` address). Emits [`dbus::BusEvent`]s.
//! - **[`mqtt`]**: `rumqttc` client for the broker bridge (`N/`, `W/`, `R/`
//!   topic families), over TCP or WebSocket. Emits [`mqtt::BrokerMessage`]s.
//! - **[`backoff`]**: reconnect policy shared by both transports.
//!
//! Translating these raw events into canonical tree mutations is the job of
//! the adapters in `velink-core`.

pub mod backoff;
pub mod dbus;
pub mod error;
pub mod mqtt;

pub use backoff::{MAX_JITTER_PERCENT, ReconnectConfig};
pub use dbus::{BusEvent, BusItemValue, DbusAddress, DbusClient, DbusWriter, WireValue};
pub use error::Error;
pub use mqtt::{BrokerClient, BrokerEndpoint, BrokerMessage, BrokerOptions, BrokerWriter};
