// ── Backend connection ──
//
// Process-wide choice of data source. Configured exactly once, then owned
// by the session. Reconnection happens within the chosen kind; switching
// kinds at runtime is not supported.

use std::sync::OnceLock;
use std::time::Duration;

use serde::Serialize;
use strum::{Display, EnumString};
use tokio::sync::watch;
use tracing::info;

use velink_api::{BrokerEndpoint, BrokerOptions, DbusAddress};

use crate::error::CoreError;

/// `tcp:host=localhost,port=3000`, the address `--dbus-default` selects.
pub const DEFAULT_DBUS_TCP: &str = "tcp:host=localhost,port=3000";

/// Default step of the mock schedule.
pub const DEFAULT_MOCK_INTERVAL: Duration = Duration::from_secs(1);

// ── SourceKind ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Dbus,
    Mqtt,
    Mock,
}

// ── SourceConfig ─────────────────────────────────────────────────────

/// A validated source selection with its connection parameter.
#[derive(Debug, Clone)]
pub enum SourceConfig {
    Dbus { address: DbusAddress },
    Mqtt {
        endpoint: BrokerEndpoint,
        options: BrokerOptions,
    },
    Mock { interval: Duration },
}

impl SourceConfig {
    /// Parse a D-Bus address (`system`, `session` or a D-Bus address
    /// string). Malformed input is a configuration error.
    pub fn dbus(address: &str) -> Result<Self, CoreError> {
        Ok(Self::Dbus {
            address: address.parse()?,
        })
    }

    /// Parse a broker URL. Malformed or unsupported URLs are configuration
    /// errors.
    pub fn mqtt(url: &str, options: BrokerOptions) -> Result<Self, CoreError> {
        if url.trim().is_empty() {
            return Err(CoreError::Config {
                message: "broker URL must not be empty".into(),
            });
        }
        Ok(Self::Mqtt {
            endpoint: url.parse()?,
            options,
        })
    }

    pub fn mock(interval: Duration) -> Self {
        Self::Mock {
            interval: if interval.is_zero() {
                DEFAULT_MOCK_INTERVAL
            } else {
                interval
            },
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Dbus { .. } => SourceKind::Dbus,
            Self::Mqtt { .. } => SourceKind::Mqtt,
            Self::Mock { .. } => SourceKind::Mock,
        }
    }

    /// Human-readable connection parameter.
    pub fn describe(&self) -> String {
        match self {
            Self::Dbus { address } => format!("dbus {address}"),
            Self::Mqtt { endpoint, .. } => format!("mqtt {endpoint}"),
            Self::Mock { interval } => format!("mock every {}ms", interval.as_millis()),
        }
    }
}

// ── ConnectionState ──────────────────────────────────────────────────

/// Lifecycle of the backend connection, observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Unconfigured,
    Connecting,
    Connected,
    Disconnected,
    Retrying { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unconfigured => f.write_str("unconfigured"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Retrying { attempt } => write!(f, "retrying (attempt {attempt})"),
        }
    }
}

// ── BackendConnection ────────────────────────────────────────────────

/// Configure-once holder of the source selection and its live state.
///
/// Not a global: construct one per process (or per test) and pass it to
/// [`Session::new`](crate::session::Session::new).
#[derive(Debug)]
pub struct BackendConnection {
    source: OnceLock<SourceConfig>,
    state: watch::Sender<ConnectionState>,
}

impl Default for BackendConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendConnection {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Unconfigured);
        Self {
            source: OnceLock::new(),
            state,
        }
    }

    /// Select the source. A second call fails with `AlreadyConfigured`.
    pub fn configure(&self, config: SourceConfig) -> Result<(), CoreError> {
        let kind = config.kind();
        let description = config.describe();
        self.source
            .set(config)
            .map_err(|_| CoreError::AlreadyConfigured {
                kind: self.current_source().map(|k| k.to_string()).unwrap_or_default(),
            })?;
        info!(%kind, source = %description, "backend configured");
        Ok(())
    }

    pub fn current_source(&self) -> Option<SourceKind> {
        self.source.get().map(SourceConfig::kind)
    }

    pub fn source(&self) -> Option<&SourceConfig> {
        self.source.get()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn configure_once() {
        let backend = BackendConnection::new();
        assert_eq!(backend.current_source(), None);
        assert_eq!(backend.state(), ConnectionState::Unconfigured);

        backend
            .configure(SourceConfig::mock(Duration::from_millis(100)))
            .unwrap();
        assert_eq!(backend.current_source(), Some(SourceKind::Mock));

        let err = backend
            .configure(SourceConfig::dbus("system").unwrap())
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::AlreadyConfigured {
                kind: "mock".into()
            }
        );
        assert_eq!(backend.current_source(), Some(SourceKind::Mock));
    }

    #[test]
    fn invalid_parameters_are_configuration_errors() {
        assert!(SourceConfig::dbus("bogus").unwrap_err().is_configuration());
        assert!(
            SourceConfig::mqtt("ftp://venus", BrokerOptions::default())
                .unwrap_err()
                .is_configuration()
        );
        assert!(
            SourceConfig::mqtt(" ", BrokerOptions::default())
                .unwrap_err()
                .is_configuration()
        );
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("MQTT".parse::<SourceKind>().unwrap(), SourceKind::Mqtt);
        assert_eq!(SourceKind::Dbus.to_string(), "dbus");
    }

    #[test]
    fn state_changes_are_observable() {
        let backend = BackendConnection::new();
        let mut rx = backend.subscribe_state();
        backend.set_state(ConnectionState::Connecting);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);
        backend.set_state(ConnectionState::Connecting);
        assert!(!rx.has_changed().unwrap());
    }
}
