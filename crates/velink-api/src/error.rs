// ── Transport errors ──
//
// Raw failures from the bus and broker clients. `velink-core` maps these
// into its own domain errors; nothing above the adapters sees them.

use thiserror::Error;

/// Top-level error type for the `velink-api` crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The D-Bus address string could not be parsed.
    #[error("invalid D-Bus address '{address}': {reason}")]
    InvalidBusAddress { address: String, reason: String },

    /// The broker URL could not be parsed or uses an unsupported scheme.
    #[error("invalid broker URL '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },

    /// Any failure reported by `zbus` (connect, call, decode).
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    /// A `SetValue` call was answered with a non-zero status.
    #[error("D-Bus service {service} refused write to {path} (status {status})")]
    DbusWriteRefused {
        service: String,
        path: String,
        status: i32,
    },

    /// The broker connection failed or dropped.
    #[error("broker connection error: {0}")]
    BrokerConnection(#[from] rumqttc::ConnectionError),

    /// The broker client request queue rejected a request.
    #[error("broker client error: {0}")]
    BrokerClient(#[from] rumqttc::ClientError),

    /// The broker did not announce a portal id within the discovery window.
    #[error("no portal id announced by broker within {timeout_secs}s")]
    PortalDiscoveryTimeout { timeout_secs: u64 },

    /// A value could not be represented on the wire.
    #[error("value not supported by transport: {0}")]
    UnsupportedValue(String),

    /// The connection closed while a request was outstanding.
    #[error("connection closed")]
    Closed,
}

impl Error {
    /// Whether this error is caused by user input rather than the network.
    ///
    /// Configuration errors are fatal at startup; everything else is
    /// retried by the adapters.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidBusAddress { .. } | Self::InvalidBrokerUrl { .. }
        )
    }
}
