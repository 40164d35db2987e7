//! Integration tests for the `fieldsim` binary.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// A `fieldsim` command isolated from the user's config and environment.
fn fieldsim_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("fieldsim");
    cmd.env("HOME", "/tmp/fieldsim-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/fieldsim-cli-test-nonexistent")
        .env_remove("FIELDSIM_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

const LOOPBACK: &str = r#"
[collector]
monitor_interval = "50ms"

[[devices]]
name = "plc-test"
kind = "polled"
port = 1502
update_interval = "20ms"

[[devices]]
name = "sock-test"
kind = "broadcast"
port = 0
update_interval = "20ms"
"#;

fn write_config(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("fieldsim.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let output = fieldsim_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "expected usage text:\n{stderr}");
}

#[test]
fn help_lists_commands() {
    fieldsim_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("config")),
    );
}

// ── config ──────────────────────────────────────────────────────────

#[test]
fn config_init_writes_starter_and_refuses_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conf").join("fieldsim.toml");

    fieldsim_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success();
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("plc-1"));
    assert!(written.contains("sock-1"));

    fieldsim_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("--force"));

    fieldsim_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn config_show_prints_effective_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), LOOPBACK);

    fieldsim_cmd()
        .env("FIELDSIM_CONFIG", &path)
        .env("FIELDSIM_COLLECTOR__MONITOR_INTERVAL", "3s")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("monitor_interval = \"3s\"")
                .and(predicate::str::contains("name = \"sock-test\"")),
        );
}

#[test]
fn invalid_config_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        "[[devices]]\nname = \"x\"\nkind = \"polled\"\nport = 1\nupdate_interval = \"0s\"\n",
    );

    fieldsim_cmd()
        .arg("--config")
        .arg(&path)
        .arg("devices")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("x.update_interval"));
}

// ── devices ─────────────────────────────────────────────────────────

#[test]
fn devices_prints_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), LOOPBACK);

    fieldsim_cmd()
        .arg("--config")
        .arg(&path)
        .arg("devices")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("plc-test")
                .and(predicate::str::contains("broadcast"))
                .and(predicate::str::contains("127.0.0.1:1502"))
                .and(predicate::str::contains("default registers")),
        );
}

#[test]
fn devices_without_config_suggests_init() {
    fieldsim_cmd()
        .args(["--config", "/tmp/fieldsim-cli-test-nonexistent/none.toml", "devices"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("fieldsim config init"));
}

// ── run ─────────────────────────────────────────────────────────────

#[test]
fn run_streams_json_lines_until_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), LOOPBACK);

    let output = fieldsim_cmd()
        .arg("--config")
        .arg(&path)
        .args(["run", "--json", "--for", "500ms"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"kind\":\"data_point\""), "{stdout}");
    assert!(stdout.contains("\"source\":\"plc-test\""), "{stdout}");
    assert!(stdout.contains("\"source\":\"sock-test\""), "{stdout}");
    assert!(
        stdout.lines().all(|l| l.starts_with('{') && l.ends_with('}')),
        "non-JSON line on stdout:\n{stdout}"
    );
}

#[test]
fn run_fails_when_nothing_comes_online() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        "[[devices]]\nname = \"unroutable\"\nkind = \"broadcast\"\naddress = \"203.0.113.7\"\nport = 9\n",
    );

    fieldsim_cmd()
        .arg("--config")
        .arg(&path)
        .args(["run", "--for", "100ms"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("came online"));
}
