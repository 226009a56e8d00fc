//! MQTT client for the Venus broker bridge.
//!
//! The bridge mirrors every D-Bus item onto three topic families:
//!
//! | Prefix | Direction | Meaning |
//! |---|---|---|
//! | `N/<portal>/<service-type>/<instance>/<path>` | broker → us | value notification, `{"value": …}` |
//! | `W/<portal>/<service-type>/<instance>/<path>` | us → broker | write request |
//! | `R/<portal>/keepalive` | us → broker | keep notifications flowing |
//!
//! The portal id is the device serial. Unless configured, it is discovered
//! from the first `N/+/system/0/Serial` notification.

use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use tracing::{debug, info};
use url::Url;

use crate::error::Error;

const DEFAULT_TCP_PORT: u16 = 1883;
const DEFAULT_WS_PORT: u16 = 80;

/// Requests buffered between [`AsyncClient`] and the event loop.
const REQUEST_CAPACITY: usize = 64;

const SERIAL_TOPIC: &str = "N/+/system/0/Serial";

/// Upper bound on flushing the DISCONNECT packet at shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

// ── Endpoint ─────────────────────────────────────────────────────────

/// A parsed broker location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEndpoint {
    /// Plain MQTT over TCP.
    Tcp { host: String, port: u16 },
    /// MQTT over WebSocket. `url` is passed to the client verbatim.
    WebSocket { url: String, port: u16 },
}

impl FromStr for BrokerEndpoint {
    type Err = Error;

    /// Accepts `mqtt://host[:port]`, `tcp://host[:port]`, `ws://host[:port]/path`
    /// and a bare `host[:port]` (treated as TCP).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let invalid = |reason: String| Error::InvalidBrokerUrl {
            url: raw.to_owned(),
            reason,
        };
        if raw.is_empty() {
            return Err(invalid("empty".into()));
        }

        let with_scheme = if raw.contains("://") {
            raw.to_owned()
        } else {
            format!("mqtt://{raw}")
        };
        let url = Url::parse(&with_scheme).map_err(|e| invalid(e.to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host".into()))?
            .to_owned();

        match url.scheme() {
            "mqtt" | "tcp" => Ok(Self::Tcp {
                host,
                port: url.port().unwrap_or(DEFAULT_TCP_PORT),
            }),
            "ws" => Ok(Self::WebSocket {
                url: with_scheme,
                port: url.port().unwrap_or(DEFAULT_WS_PORT),
            }),
            other => Err(invalid(format!("unsupported scheme '{other}'"))),
        }
    }
}

impl std::fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "mqtt://{host}:{port}"),
            Self::WebSocket { url, .. } => f.write_str(url),
        }
    }
}

// ── Options ──────────────────────────────────────────────────────────

/// Session parameters for [`BrokerClient::connect`].
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub client_id: String,
    /// MQTT keep-alive, also the period of `R/<portal>/keepalive` publishes.
    pub keepalive: Duration,
    /// Skip discovery and use this portal id.
    pub portal_id: Option<String>,
    /// How long to wait for the serial announcement.
    pub discovery_timeout: Duration,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            client_id: "velink".into(),
            keepalive: Duration::from_secs(30),
            portal_id: None,
            discovery_timeout: Duration::from_secs(10),
        }
    }
}

/// One publish received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Bytes,
}

// ── BrokerClient ─────────────────────────────────────────────────────

/// A connected session subscribed to `N/<portal>/#`.
pub struct BrokerClient {
    client: AsyncClient,
    eventloop: EventLoop,
    portal_id: String,
}

impl BrokerClient {
    /// Connect, wait for the broker's `ConnAck`, resolve the portal id and
    /// subscribe to its notifications.
    pub async fn connect(endpoint: &BrokerEndpoint, options: &BrokerOptions) -> Result<Self, Error> {
        let mut mqtt = match endpoint {
            BrokerEndpoint::Tcp { host, port } => {
                MqttOptions::new(&options.client_id, host, *port)
            }
            BrokerEndpoint::WebSocket { url, port } => {
                let mut o = MqttOptions::new(&options.client_id, url, *port);
                o.set_transport(Transport::Ws);
                o
            }
        };
        mqtt.set_keep_alive(options.keepalive.max(Duration::from_secs(5)));
        mqtt.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(mqtt, REQUEST_CAPACITY);
        loop {
            if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
                debug!(%endpoint, code = ?ack.code, "broker accepted connection");
                break;
            }
        }

        let portal_id = match &options.portal_id {
            Some(id) => id.clone(),
            None => discover_portal(&client, &mut eventloop, options.discovery_timeout).await?,
        };
        info!(%endpoint, portal = %portal_id, "subscribed to broker notifications");
        client
            .subscribe(format!("N/{portal_id}/#"), QoS::AtMostOnce)
            .await?;

        Ok(Self {
            client,
            eventloop,
            portal_id,
        })
    }

    pub fn portal_id(&self) -> &str {
        &self.portal_id
    }

    /// A write handle sharing this session's request queue.
    pub fn writer(&self) -> BrokerWriter {
        BrokerWriter {
            client: self.client.clone(),
            portal_id: self.portal_id.clone(),
        }
    }

    /// Drive the event loop until the next publish arrives.
    ///
    /// Requests queued through a [`BrokerWriter`] are flushed while this is
    /// being polled, so it must be called continuously.
    pub async fn next_message(&mut self) -> Result<BrokerMessage, Error> {
        loop {
            if let Event::Incoming(Packet::Publish(p)) = self.eventloop.poll().await? {
                return Ok(BrokerMessage {
                    topic: p.topic,
                    payload: p.payload,
                });
            }
        }
    }

    /// Send a DISCONNECT and drive the event loop until it is on the wire.
    /// Errors are ignored; the session is going away.
    pub async fn disconnect(self) {
        let Self {
            client,
            mut eventloop,
            ..
        } = self;
        if client.disconnect().await.is_err() {
            return;
        }
        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        let _ = tokio::time::timeout(DISCONNECT_GRACE, flush).await;
    }
}

async fn discover_portal(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    timeout: Duration,
) -> Result<String, Error> {
    client.subscribe(SERIAL_TOPIC, QoS::AtMostOnce).await?;
    let wait = async {
        loop {
            if let Event::Incoming(Packet::Publish(p)) = eventloop.poll().await? {
                if let Some(id) = portal_from_topic(&p.topic) {
                    return Ok::<_, Error>(id);
                }
            }
        }
    };
    let portal = tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| Error::PortalDiscoveryTimeout {
            timeout_secs: timeout.as_secs(),
        })??;
    client.unsubscribe(SERIAL_TOPIC).await?;
    debug!(portal = %portal, "portal id discovered");
    Ok(portal)
}

/// Extract the portal id from `N/<portal>/system/0/Serial`.
pub fn portal_from_topic(topic: &str) -> Option<String> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next()) {
        (Some("N"), Some(id)) if !id.is_empty() && id != "+" => Some(id.to_owned()),
        _ => None,
    }
}

// ── BrokerWriter ─────────────────────────────────────────────────────

/// Cloneable publish handle.
#[derive(Clone)]
pub struct BrokerWriter {
    client: AsyncClient,
    portal_id: String,
}

impl BrokerWriter {
    /// Queue a write request to `W/<portal>/<path>`.
    ///
    /// Completes when the request is handed to the event loop; the broker
    /// does not acknowledge writes individually.
    pub async fn write(&self, path: &str, payload: Vec<u8>) -> Result<(), Error> {
        let topic = format!("W/{}/{}", self.portal_id, path.trim_start_matches('/'));
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    /// Publish `R/<portal>/keepalive`.
    pub async fn keepalive(&self) -> Result<(), Error> {
        let topic = format!("R/{}/keepalive", self.portal_id);
        self.client
            .publish(topic, QoS::AtMostOnce, false, Vec::new())
            .await?;
        Ok(())
    }

    pub fn portal_id(&self) -> &str {
        &self.portal_id
    }
}

// ── Tests ────────────────────────────────────────────────────────────
