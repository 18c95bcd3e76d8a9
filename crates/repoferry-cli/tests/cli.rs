// SPDX-License-Identifier: Apache-2.0

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

/// A command isolated from the operator's config file and environment.
fn isolated(config_home: &std::path::Path) -> Command {
    let mut cmd = cargo_bin_cmd!("repoferry");
    cmd.env("XDG_CONFIG_HOME", config_home)
        .env_remove("RUST_LOG")
        .env_remove("REPOFERRY_SOURCE__TOKEN")
        .env_remove("REPOFERRY_SOURCE__APP_ID")
        .env_remove("REPOFERRY_SOURCE__APP_PRIVATE_KEY")
        .env_remove("REPOFERRY_DESTINATION__TOKEN")
        .env_remove("REPOFERRY_DESTINATION__APP_ID")
        .env_remove("REPOFERRY_DESTINATION__APP_PRIVATE_KEY");
    cmd
}

#[test]
fn test_version() {
    let mut cmd = cargo_bin_cmd!("repoferry");
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("repoferry"));
}

#[test]
fn test_help_contains_all_commands() {
    let mut cmd = cargo_bin_cmd!("repoferry");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("endpoints"))
        .stdout(predicate::str::contains("rate-limit"))
        .stdout(predicate::str::contains("discover"))
        .stdout(predicate::str::contains("installations"));
}

#[test]
fn test_endpoints_self_hosted_text() {
    let mut cmd = cargo_bin_cmd!("repoferry");
    cmd.args([
        "endpoints",
        "https://ghe.example.com/api/v3",
        "--repo",
        "octo/hello",
    ])
    .assert()
    .success()
    .stdout(predicate::str::contains("self_hosted"))
    .stdout(predicate::str::contains("https://ghe.example.com/api/graphql"))
    .stdout(predicate::str::contains("https://ghe.example.com/octo/hello"));
}

#[test]
fn test_endpoints_data_residency_json() {
    let output = cargo_bin_cmd!("repoferry")
        .args(["endpoints", "https://api.octo.ghe.com", "--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["topology"], "cloud_data_residency");
    assert_eq!(parsed["graphql_endpoint"], "https://api.octo.ghe.com/graphql");
    assert_eq!(parsed["web_root"], "https://octo.ghe.com");
    assert!(parsed.get("web_url").is_none());
}

#[test]
fn test_endpoints_rejects_malformed_repo() {
    let mut cmd = cargo_bin_cmd!("repoferry");
    cmd.args(["endpoints", "https://github.com", "--repo", "octo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid owner/repo format"));
}

#[test]
fn test_rate_limit_without_credentials() {
    let home = tempfile::tempdir().unwrap();
    isolated(home.path())
        .arg("rate-limit")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No credentials configured"))
        .stderr(predicate::str::contains("Tip:"));
}

#[test]
fn test_installations_without_app_credentials() {
    let home = tempfile::tempdir().unwrap();
    isolated(home.path())
        .args(["installations", "--side", "destination"])
        .env("REPOFERRY_DESTINATION__TOKEN", "ghp_test")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "App id and private key are required",
        ));
}

#[test]
fn test_missing_explicit_config_file() {
    let home = tempfile::tempdir().unwrap();
    let missing = home.path().join("nope.toml");
    isolated(home.path())
        .args(["discover", "octo-org", "--config"])
        .arg(&missing)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
}
