//! Source resolution: config file + environment, then CLI flag overrides.

use velink_config::{Config, ConfigError};
use velink_core::backend::DEFAULT_DBUS_TCP;
use velink_core::{SessionConfig, SourceConfig};

use crate::cli::{GlobalOpts, SourceOpts};
use crate::error::CliError;

/// Load the configuration selected by `--config` (or the default path).
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let cfg = match &global.config {
        Some(path) => velink_config::load_from(path)?,
        None => velink_config::load_config()?,
    };
    Ok(cfg)
}

/// Fold the mutually exclusive source flags into `cfg.source`.
pub fn apply_source_flags(cfg: &mut Config, flags: &SourceOpts) {
    let (kind, address) = if let Some(address) = &flags.dbus {
        ("dbus", Some(address.clone()))
    } else if flags.dbus_default {
        ("dbus", Some(DEFAULT_DBUS_TCP.to_owned()))
    } else if let Some(url) = &flags.mqtt {
        ("mqtt", Some(url.clone()))
    } else if flags.mock {
        ("mock", None)
    } else {
        return;
    };
    cfg.source.kind = kind.into();
    cfg.source.address = address;
}

/// Validate everything before the event loop starts.
pub fn resolve(
    flags: &SourceOpts,
    global: &GlobalOpts,
) -> Result<(SourceConfig, SessionConfig), CliError> {
    let mut cfg = load(global)?;
    apply_source_flags(&mut cfg, flags);

    let source = cfg.source_config().map_err(|e| match e {
        ConfigError::Validation { reason, .. } => CliError::Source {
            message: reason,
            path: global
                .config
                .clone()
                .unwrap_or_else(velink_config::config_path)
                .display()
                .to_string(),
        },
        other => other.into(),
    })?;
    let session = cfg.session_config()?;

    tracing::debug!(source = %source.describe(), "resolved data source");
    Ok((source, session))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_file() {
        let mut cfg = Config::default();
        cfg.source.kind = "mqtt".into();
        cfg.source.address = Some("mqtt://venus.local".into());

        apply_source_flags(
            &mut cfg,
            &SourceOpts {
                mock: true,
                ..SourceOpts::default()
            },
        );
        assert_eq!(cfg.source.kind, "mock");
        assert_eq!(cfg.source.address, None);
    }

    #[test]
    fn dbus_default_uses_the_tcp_bridge() {
        let mut cfg = Config::default();
        apply_source_flags(
            &mut cfg,
            &SourceOpts {
                dbus_default: true,
                ..SourceOpts::default()
            },
        );
        assert_eq!(cfg.source.address.as_deref(), Some(DEFAULT_DBUS_TCP));
    }

    #[test]
    fn no_flags_keep_the_file_source() {
        let mut cfg = Config::default();
        apply_source_flags(&mut cfg, &SourceOpts::default());
        assert_eq!(cfg.source.kind, "dbus");
        assert!(cfg.source.address.is_none());
    }
}
