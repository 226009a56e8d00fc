//! Integration tests for the `velink` CLI binary.
//!
//! Argument parsing, help output, shell completions and source validation
//! need no network. Data tests run against the built-in mock source.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `velink` binary with env isolation.
///
/// Clears `VELINK_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn velink_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("velink");
    cmd.env("HOME", "/tmp/velink-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/velink-cli-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("VELINK_CONFIG")
        .env_remove("VELINK_OUTPUT")
        .env_remove("VELINK_TIMEOUT")
        .env_remove("VELINK_SOURCE__KIND")
        .env_remove("VELINK_SOURCE__ADDRESS")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = velink_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    velink_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("watch")
            .and(predicate::str::contains("dump"))
            .and(predicate::str::contains("set"))
            .and(predicate::str::contains("--mqtt")),
    );
}

#[test]
fn test_version_flag() {
    velink_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("velink"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    velink_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    velink_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("velink"));
}

// ── Source selection ────────────────────────────────────────────────

#[test]
fn test_source_flags_are_exclusive() {
    velink_cmd()
        .args(["--mock", "--mqtt", "mqtt://venus.local", "dump"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_dbus_flags_are_exclusive() {
    velink_cmd()
        .args(["--dbus", "system", "--dbus-default", "dump"])
        .assert()
        .code(2);
}

#[test]
fn test_unsupported_broker_scheme_fails_fast() {
    velink_cmd()
        .args(["--mqtt", "http://venus.local", "dump"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("broker URL"));
}

#[test]
fn test_malformed_dbus_address_fails_fast() {
    velink_cmd()
        .args(["--dbus", "not-an-address", "dump"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("D-Bus address"));
}

#[test]
fn test_unknown_kind_in_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[source]\nkind = \"serial\"\n").unwrap();

    velink_cmd()
        .arg("--config")
        .arg(&path)
        .args(["dump", "--settle", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("serial"));
}

#[test]
fn test_root_is_not_an_item() {
    velink_cmd()
        .args(["--mock", "get", "/"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("does not name an item"));
}

// ── Mock source ─────────────────────────────────────────────────────

#[test]
fn test_mock_dump_json() {
    velink_cmd()
        .args(["--mock", "dump", "--settle", "0", "-o", "json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("battery/soldc/voltage")
                .and(predicate::str::contains("settings/gui/brightness")),
        );
}

#[test]
fn test_mock_dump_prefix_plain() {
    velink_cmd()
        .args(["--mock", "dump", "devices", "--settle", "0", "-o", "plain"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("devices/fridge/name Fridge")
                .and(predicate::str::contains("battery").not()),
        );
}

#[test]
fn test_mock_get_plain() {
    velink_cmd()
        .args([
            "--mock",
            "get",
            "battery.soldc.voltage",
            "--settle",
            "0",
            "-o",
            "plain",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("12.80V"));
}

#[test]
fn test_mock_get_missing_item() {
    velink_cmd()
        .args(["--mock", "get", "no/such/item", "--settle", "0"])
        .assert()
        .code(4);
}

#[test]
fn test_mock_set_writable_setting() {
    velink_cmd()
        .args([
            "--mock",
            "set",
            "settings/gui/brightness",
            "40",
            "--settle",
            "0",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("settings/gui/brightness <- 40"));
}

#[test]
fn test_mock_set_read_only_item() {
    velink_cmd()
        .args(["--mock", "set", "battery/soldc/voltage", "1", "--settle", "0"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("rejected"));
}

#[test]
fn test_mock_watch_prints_current_value() {
    velink_cmd()
        .args(["--mock", "watch", "battery/soldc/soc", "--count", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("battery/soldc/soc = 87"));
}

#[test]
fn test_mock_table_sorted_by_power() {
    let output = velink_cmd()
        .args([
            "--mock",
            "table",
            "devices/*",
            "--sort",
            "power",
            "--settle",
            "0",
            "-o",
            "plain",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let rows: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        rows,
        vec!["devices/fridge", "devices/charger", "devices/inverter"]
    );
}
