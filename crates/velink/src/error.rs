//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use velink_config::ConfigError;
use velink_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Invalid data source: {message}")]
    #[diagnostic(
        code(velink::source),
        help(
            "Pick exactly one of --dbus ADDRESS, --dbus-default, --mqtt URL or --mock,\n\
             or set [source] in {path}"
        )
    )]
    Source { message: String, path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(velink::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(velink::config))]
    Config(#[from] ConfigError),

    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach {source_desc}: {reason}")]
    #[diagnostic(
        code(velink::connection),
        help("Check that the source is running. Use -v for connection logs.")
    )]
    Connection { source_desc: String, reason: String },

    #[error("Source did not connect within {seconds}s")]
    #[diagnostic(
        code(velink::timeout),
        help("Increase --timeout or check the source address.")
    )]
    Timeout { seconds: u64 },

    // ── Items ────────────────────────────────────────────────────────

    #[error("Item '{path}' not found")]
    #[diagnostic(
        code(velink::not_found),
        help("Run: velink dump to list the available items")
    )]
    NotFound { path: String },

    #[error("Write to '{path}' rejected: {reason}")]
    #[diagnostic(code(velink::write_rejected))]
    WriteRejected { path: String, reason: String },

    // ── Internal ─────────────────────────────────────────────────────

    #[error("Session failed: {message}")]
    #[diagnostic(code(velink::session))]
    Session { message: String },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML output failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Source { .. } | Self::Validation { .. } | Self::Config(_) => exit_code::USAGE,
            Self::Connection { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::WriteRejected { .. } => exit_code::PERMISSION,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config { message } => CliError::Source {
                message,
                path: velink_config::config_path().display().to_string(),
            },
            CoreError::AlreadyConfigured { kind } => CliError::Source {
                message: format!("a {kind} source is already configured"),
                path: velink_config::config_path().display().to_string(),
            },
            CoreError::TransportDisconnected { reason } => CliError::Connection {
                source_desc: "data source".into(),
                reason,
            },
            CoreError::WriteRejected { path, reason } => CliError::WriteRejected { path, reason },
            CoreError::PathNotFound { path } => CliError::NotFound { path },
            CoreError::InvariantViolation { message } => CliError::Session { message },
            CoreError::SessionClosed => CliError::Session {
                message: "the session stopped unexpectedly".into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_usage_errors() {
        let err = CliError::from(CoreError::Config {
            message: "bad".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }

    #[test]
    fn rejected_writes_map_to_permission() {
        let err = CliError::from(CoreError::WriteRejected {
            path: "a/b".into(),
            reason: "read-only".into(),
        });
        assert_eq!(err.exit_code(), exit_code::PERMISSION);
    }
}
