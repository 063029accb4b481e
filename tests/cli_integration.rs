//! CLI integration tests
//!
//! Runs the built `pytr` binary.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_version_flag() {
    let mut cmd = cargo_bin_cmd!("pytr");
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("pytr");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("server"))
        .stdout(predicate::str::contains("probe"));
}

#[test]
fn test_no_subcommand_prints_help() {
    let mut cmd = cargo_bin_cmd!("pytr");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_server_help_mentions_config() {
    let mut cmd = cargo_bin_cmd!("pytr");
    cmd.args(["server", "--help"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--port"));
}

#[test]
fn test_probe_requires_url() {
    let mut cmd = cargo_bin_cmd!("pytr");
    cmd.arg("probe");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("URL"));
}

#[test]
fn test_probe_rejects_invalid_url() {
    let mut cmd = cargo_bin_cmd!("pytr");
    cmd.args(["probe", "not a url"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid URL"));
}

#[test]
fn test_unknown_flag_rejected() {
    let mut cmd = cargo_bin_cmd!("pytr");
    cmd.args(["server", "--content-binding", "abc"]);

    cmd.assert().failure();
}

#[cfg(unix)]
#[test]
fn test_server_rejects_invalid_host() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = NamedTempFile::new().unwrap();
    writeln!(
        config,
        r#"
[download]
dir = "{}"

[store]
snapshot_enabled = false
"#,
        dir.path().join("downloads").display()
    )
    .unwrap();
    config.flush().unwrap();

    let mut cmd = cargo_bin_cmd!("pytr");
    cmd.args([
        "server",
        "--host",
        "not-a-host",
        "--config",
        config.path().to_str().unwrap(),
    ]);
    cmd.timeout(std::time::Duration::from_secs(10));

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid host address: not-a-host"));
}
