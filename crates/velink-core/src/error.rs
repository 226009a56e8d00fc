// ── Core error types ──
//
// User-facing errors from velink-core. These are NOT transport-specific --
// consumers never see zbus or rumqttc errors directly. The
// `From<velink_api::Error>` impl translates transport-layer errors into
// domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Backend connection is already configured as {kind}")]
    AlreadyConfigured { kind: String },

    // ── Transport errors ─────────────────────────────────────────────
    #[error("Transport disconnected: {reason}")]
    TransportDisconnected { reason: String },

    // ── Item errors ──────────────────────────────────────────────────
    #[error("Write to {path} rejected: {reason}")]
    WriteRejected { path: String, reason: String },

    #[error("No item at {path}")]
    PathNotFound { path: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Tree invariant violated: {message}")]
    InvariantViolation { message: String },

    #[error("Session loop has shut down")]
    SessionClosed,
}

impl CoreError {
    /// Whether this error should abort startup.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::AlreadyConfigured { .. })
    }

    pub(crate) fn rejected(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::WriteRejected {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<velink_api::Error> for CoreError {
    fn from(err: velink_api::Error) -> Self {
        match err {
            velink_api::Error::InvalidBusAddress { address, reason } => CoreError::Config {
                message: format!("invalid D-Bus address '{address}': {reason}"),
            },
            velink_api::Error::InvalidBrokerUrl { url, reason } => CoreError::Config {
                message: format!("invalid broker URL '{url}': {reason}"),
            },
            velink_api::Error::DbusWriteRefused {
                service,
                path,
                status,
            } => CoreError::WriteRejected {
                path: format!("{service}{path}"),
                reason: format!("service returned status {status}"),
            },
            velink_api::Error::UnsupportedValue(kind) => CoreError::WriteRejected {
                path: String::new(),
                reason: format!("{kind} values cannot be written"),
            },
            velink_api::Error::PortalDiscoveryTimeout { timeout_secs } => {
                CoreError::TransportDisconnected {
                    reason: format!("no portal id announced within {timeout_secs}s"),
                }
            }
            velink_api::Error::Dbus(e) => CoreError::TransportDisconnected {
                reason: format!("D-Bus: {e}"),
            },
            velink_api::Error::BrokerConnection(e) => CoreError::TransportDisconnected {
                reason: format!("broker: {e}"),
            },
            velink_api::Error::BrokerClient(e) => CoreError::TransportDisconnected {
                reason: format!("broker client: {e}"),
            },
            velink_api::Error::Closed => CoreError::TransportDisconnected {
                reason: "connection closed".into(),
            },
        }
    }
}
