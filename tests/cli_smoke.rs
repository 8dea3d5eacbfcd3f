//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("hetzner-machine");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_lifecycle_commands() {
    let mut cmd = cargo_bin_cmd!("hetzner-machine");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create").and(predicate::str::contains("remove")));
}

#[test]
fn create_without_token_names_the_environment_variable() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let mut cmd = cargo_bin_cmd!("hetzner-machine");
    cmd.current_dir(tmp.path())
        .env("HOME", tmp.path())
        .env("XDG_CONFIG_HOME", tmp.path())
        .env("HETZNER_ACCESS_TOKEN", "")
        .arg("--store-path")
        .arg(tmp.path())
        .args(["create", "alpha"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("HETZNER_ACCESS_TOKEN"));
}

#[test]
fn state_before_create_reports_missing_server() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let mut cmd = cargo_bin_cmd!("hetzner-machine");
    cmd.current_dir(tmp.path())
        .env("HOME", tmp.path())
        .env("XDG_CONFIG_HOME", tmp.path())
        .env("HETZNER_ACCESS_TOKEN", "token")
        .arg("--store-path")
        .arg(tmp.path())
        .args(["state", "alpha"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("run create first"));
}
