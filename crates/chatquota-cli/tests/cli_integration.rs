//! Integration tests for chatquota-cli
//!
//! These tests verify the CLI commands work end-to-end.
//! Each test gets its own database and config file; tests still run
//! serially to keep env handling predictable.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Isolated database and config for one test
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Get a Command for the chatquota binary bound to this sandbox
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("chatquota").unwrap();
        cmd.env_remove("CHATQUOTA_DB_PATH")
            .env_remove("CHATQUOTA_CONFIG")
            .arg("--db")
            .arg(self.dir.path().join("test.db"))
            .arg("--config")
            .arg(self.dir.path().join("config.json"));
        cmd
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self
            .cmd()
            .args(["--format", "json", "--quiet"])
            .args(args)
            .output()
            .expect("Failed to run chatquota");
        assert!(output.status.success(), "{:?} failed: {:?}", args, output);
        serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
    }
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
#[serial]
fn test_cli_help() {
    Sandbox::new()
        .cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("chatquota"))
        .stdout(predicate::str::contains("banner"))
        .stdout(predicate::str::contains("sweep"));
}

#[test]
#[serial]
fn test_cli_version() {
    Sandbox::new()
        .cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("chatquota"));
}

#[test]
#[serial]
fn test_invalid_format_rejected() {
    Sandbox::new()
        .cmd()
        .args(["--format", "yaml", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid format"));
}

// =============================================================================
// Status and Recording Tests
// =============================================================================

#[test]
#[serial]
fn test_status_empty() {
    Sandbox::new()
        .cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Plan: free"))
        .stdout(predicate::str::contains("Nothing tracked yet."));
}

#[test]
#[serial]
fn test_used_then_status_json() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["used", "GPT-4o", "-n", "3"])
        .assert()
        .success();

    let row = sandbox.json(&["status", "GPT-4o"]);
    assert_eq!(row["model"], "GPT-4o");
    assert_eq!(row["used"], "3");
    assert_eq!(row["limit"], "10 / 5 hours");
    assert_eq!(row["remaining"], "7");
    assert_eq!(row["level"], "normal");

    let all = sandbox.json(&["status"]);
    assert_eq!(all.as_array().map(|a| a.len()), Some(1));
}

#[test]
#[serial]
fn test_untracked_model_is_counted() {
    let sandbox = Sandbox::new();
    sandbox.cmd().args(["used", "my-local-model"]).assert().success();

    let row = sandbox.json(&["status", "my-local-model"]);
    assert_eq!(row["used"], "1");
    assert_eq!(row["limit"], "untracked");
    assert_eq!(row["resets"], "-");
}

#[test]
#[serial]
fn test_banner_recognized_and_ignored() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["banner", "You've hit the limit for gpt-4o. Try again in 2 hours."])
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied banner to gpt-4o"));

    sandbox
        .cmd()
        .args(["banner", "Good morning! How can I help?"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No quota signal recognized"));
}

#[test]
#[serial]
fn test_banner_uses_model_hint() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["banner", "You have 3 responses left. Resets in 45 minutes.", "--model", "o4-mini"])
        .assert()
        .success()
        .stdout(predicate::str::contains("o4-mini"));
}

// =============================================================================
// Plan Tests
// =============================================================================

#[test]
#[serial]
fn test_plan_set_and_show() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["plan", "set", "plus"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Plan set to plus"));

    let plan = sandbox.json(&["plan", "show"]);
    assert_eq!(plan["plan"], "plus");

    let limits = sandbox.json(&["plan", "limits"]);
    let o3 = limits
        .as_array()
        .and_then(|rows| rows.iter().find(|r| r["pattern"] == "o3"))
        .cloned()
        .expect("o3 row");
    assert_eq!(o3["limit"], "100 / week");
}

#[test]
#[serial]
fn test_unknown_plan_warns() {
    Sandbox::new()
        .cmd()
        .args(["plan", "set", "enterprise"])
        .assert()
        .success()
        .stderr(predicate::str::contains("has no limits"));
}

// =============================================================================
// Override, Reset and Sweep Tests
// =============================================================================

#[test]
#[serial]
fn test_override_sets_count_and_window() {
    let sandbox = Sandbox::new();
    sandbox.cmd().args(["plan", "set", "plus"]).assert().success();
    sandbox
        .cmd()
        .args(["override", "o3", "40", "+2h"])
        .assert()
        .success();

    let row = sandbox.json(&["status", "o3"]);
    assert_eq!(row["used"], "40");
    assert_eq!(row["remaining"], "60");
    assert_ne!(row["resets"], "-");
}

#[test]
#[serial]
fn test_override_rejects_bad_until() {
    Sandbox::new()
        .cmd()
        .args(["override", "o3", "40", "next tuesday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid reset time"));
}

#[test]
#[serial]
fn test_reset_zeroes_counters() {
    let sandbox = Sandbox::new();
    sandbox.cmd().args(["used", "gpt-4o", "-n", "2"]).assert().success();
    sandbox.cmd().args(["used", "o4-mini"]).assert().success();

    sandbox
        .cmd()
        .arg("reset")
        .assert()
        .success()
        .stdout(predicate::str::contains("Reset 2 counters"));

    let all = sandbox.json(&["status"]);
    let rows = all.as_array().expect("array");
    assert!(rows.iter().all(|r| r["used"] == "0"));
}

#[test]
#[serial]
fn test_sweep_reports() {
    let sandbox = Sandbox::new();
    sandbox.cmd().args(["used", "gpt-4o"]).assert().success();

    let report = sandbox.json(&["sweep", "--full"]);
    assert_eq!(report["kind"], "full");
    assert_eq!(report["examined"], 1);
    assert_eq!(report["failed"], "-");
}

// =============================================================================
// Config Tests
// =============================================================================

#[test]
#[serial]
fn test_config_init_and_show() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote default config"));

    let config = sandbox.json(&["config", "show"]);
    assert_eq!(config["default_plan"], "free");
    assert_eq!(config["tick_secs"], 15);
}

#[test]
#[serial]
fn test_config_default_plan_applies() {
    let sandbox = Sandbox::new();
    std::fs::write(
        sandbox.dir.path().join("config.json"),
        r#"{"default_plan": "plus"}"#,
    )
    .unwrap();

    let plan = sandbox.json(&["plan", "show"]);
    assert_eq!(plan["plan"], "plus");
}

#[test]
#[serial]
fn test_config_invalid_file_fails() {
    let sandbox = Sandbox::new();
    std::fs::write(sandbox.dir.path().join("config.json"), "{ not json").unwrap();

    sandbox
        .cmd()
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid config"));
}

#[test]
#[serial]
fn test_config_path() {
    Sandbox::new()
        .cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.json"))
        .stdout(predicate::str::contains("test.db"));
}
