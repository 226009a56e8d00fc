//! Shared configuration for the velink binary and embedders.
//!
//! A TOML file in the platform config directory, overridden by `VELINK_*`
//! environment variables, translated into `velink_core::SourceConfig` and
//! `SessionConfig`. The CLI layers its source flags on top.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use velink_api::{BrokerOptions, MAX_JITTER_PERCENT, ReconnectConfig};
use velink_core::{SessionConfig, SourceConfig, SourceKind};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceSection,

    #[serde(default)]
    pub reconnect: ReconnectSection,

    #[serde(default)]
    pub ingest: IngestSection,

    #[serde(default)]
    pub mock: MockSection,

    #[serde(default)]
    pub mqtt: MqttSection,
}

/// Which data source to use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourceSection {
    /// "dbus", "mqtt" or "mock".
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Bus address or broker URL. Unset means the system bus for "dbus".
    pub address: Option<String>,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            address: None,
        }
    }
}

fn default_kind() -> String {
    "dbus".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconnectSection {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor between attempts; 1 keeps the delay constant.
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,

    /// Spread of each delay, 0 to 100 percent.
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: u8,

    /// Unset retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_percent: default_jitter_percent(),
            max_retries: None,
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_multiplier() -> u32 {
    2
}
fn default_jitter_percent() -> u8 {
    25
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngestSection {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    velink_core::ingest::DEFAULT_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MockSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for MockSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MqttSection {
    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Skip portal discovery.
    pub portal_id: Option<String>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            keepalive_secs: default_keepalive_secs(),
            portal_id: None,
        }
    }
}

fn default_client_id() -> String {
    "velink".into()
}
fn default_keepalive_secs() -> u64 {
    30
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    pub fn source_kind(&self) -> Result<SourceKind, ConfigError> {
        SourceKind::from_str(self.source.kind.trim()).map_err(|_| {
            ConfigError::invalid(
                "source.kind",
                format!(
                    "expected 'dbus', 'mqtt', or 'mock', got '{}'",
                    self.source.kind
                ),
            )
        })
    }

    /// Validate the source section and build the backend configuration.
    pub fn source_config(&self) -> Result<SourceConfig, ConfigError> {
        let address = match self.source.address.as_deref() {
            Some(a) if a.trim().is_empty() => {
                return Err(ConfigError::invalid("source.address", "must not be empty"));
            }
            other => other,
        };

        let invalid =
            |e: velink_core::CoreError| ConfigError::invalid("source.address", e.to_string());

        match self.source_kind()? {
            SourceKind::Dbus => SourceConfig::dbus(address.unwrap_or("system")).map_err(invalid),
            SourceKind::Mqtt => {
                let url = address.ok_or_else(|| {
                    ConfigError::invalid("source.address", "a broker URL is required for mqtt")
                })?;
                SourceConfig::mqtt(url, self.broker_options()).map_err(invalid)
            }
            SourceKind::Mock => Ok(SourceConfig::mock(Duration::from_millis(
                self.mock.interval_ms,
            ))),
        }
    }

    pub fn broker_options(&self) -> BrokerOptions {
        BrokerOptions {
            client_id: self.mqtt.client_id.clone(),
            keepalive: Duration::from_secs(self.mqtt.keepalive_secs),
            portal_id: self.mqtt.portal_id.clone(),
            ..BrokerOptions::default()
        }
    }

    pub fn reconnect_config(&self) -> Result<ReconnectConfig, ConfigError> {
        let section = &self.reconnect;
        if section.multiplier == 0 {
            return Err(ConfigError::invalid("reconnect.multiplier", "must be at least 1"));
        }
        if section.jitter_percent > MAX_JITTER_PERCENT {
            return Err(ConfigError::invalid(
                "reconnect.jitter_percent",
                format!("must be at most {MAX_JITTER_PERCENT}"),
            ));
        }
        if section.initial_delay_ms > section.max_delay_ms {
            return Err(ConfigError::invalid(
                "reconnect.initial_delay_ms",
                "must not exceed reconnect.max_delay_ms",
            ));
        }
        Ok(ReconnectConfig {
            initial_delay: Duration::from_millis(section.initial_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            multiplier: section.multiplier,
            jitter_percent: section.jitter_percent,
            max_retries: section.max_retries,
        })
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        if self.ingest.capacity == 0 {
            return Err(ConfigError::invalid("ingest.capacity", "must be at least 1"));
        }
        Ok(SessionConfig {
            ingest_capacity: self.ingest.capacity,
            reconnect: self.reconnect_config()?,
        })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "velink", "velink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("velink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_from(&config_path())
}

/// Load from `path` + environment. A missing file is not an error.
///
/// Nested keys use a double underscore: `VELINK_SOURCE__KIND=mock`,
/// `VELINK_MQTT__PORTAL_ID=...`.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("VELINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

pub fn save_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
