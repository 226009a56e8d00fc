#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use velink_config::{Config, load_from, save_to};
use velink_core::SourceKind;

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut cfg = Config::default();
    cfg.source.kind = "mock".into();
    cfg.mock.interval_ms = 500;
    cfg.reconnect.max_retries = Some(5);
    cfg.reconnect.jitter_percent = 10;
    save_to(&cfg, &path).unwrap();

    let loaded = load_from(&path).unwrap();
    assert_eq!(loaded, cfg);
    assert_eq!(
        loaded.source_config().unwrap().kind(),
        SourceKind::Mock
    );
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = load_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(loaded.source.kind, "dbus");
    assert_eq!(loaded.ingest.capacity, 1024);
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[source\nkind = ").unwrap();
    assert!(load_from(&path).is_err());
}
