//! CLI integration tests.
//!
//! Uses `assert_cmd` to spawn the `procflow` binary and verify exit codes,
//! stdout content, and stderr content. Tests run from the workspace root so
//! that `scenarios/` fixtures resolve.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Locate the workspace root by walking up from CARGO_MANIFEST_DIR.
fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    // crates/cli -> workspace root is two levels up
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

fn procflow() -> Command {
    let mut cmd = cargo_bin_cmd!("procflow");
    cmd.current_dir(workspace_root());
    cmd
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("write fixture");
    path
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    procflow()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Workflow authorization and lifecycle engine",
        ));
}

#[test]
fn version_exits_0() {
    procflow()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("procflow"));
}

#[test]
fn validate_requires_a_resource() {
    procflow().arg("validate").assert().failure();
}

// ──────────────────────────────────────────────
// 2. Validate subcommand
// ──────────────────────────────────────────────

#[test]
fn validate_scenario_definitions_exits_0() {
    procflow()
        .args([
            "validate",
            "scenarios/testProcess.json",
            "scenarios/testCase.json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("testProcess.json: valid"))
        .stdout(predicate::str::contains("testCase.json: valid"));
}

#[test]
fn validate_json_output_lists_kinds() {
    let output = procflow()
        .args([
            "--output",
            "json",
            "validate",
            "scenarios/testProcess.json",
            "scenarios/testCase.json",
        ])
        .output()
        .expect("run procflow");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json stdout");
    assert_eq!(json["valid"], true);
    assert_eq!(json["resources"][0]["kind"], "Process");
    assert_eq!(json["resources"][1]["kind"], "Case");
}

#[test]
fn validate_unresolved_companion_case_exits_1() {
    procflow()
        .args(["validate", "scenarios/testProcess.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid deployment"))
        .stderr(predicate::str::contains("testCase"));
}

#[test]
fn validate_schema_violation_exits_1() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "bad.json",
        r#"{ "kind": "Case", "key": "c", "tasks": [{ "key": "t" }] }"#,
    );
    procflow()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad.json: invalid"));
}

#[test]
fn validate_duplicate_task_key_exits_1() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "dup.json",
        r#"{ "kind": "Process", "key": "p", "tasks": [{ "key": "t" }, { "key": "t" }] }"#,
    );
    procflow()
        .arg("validate")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("declared twice"));
}

#[test]
fn validate_malformed_json_exits_1() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "broken.json", "{ nope");
    procflow()
        .args(["--output", "json", "validate"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"valid\": false"))
        .stderr(predicate::str::contains("error parsing JSON"));
}

#[test]
fn validate_missing_file_exits_1() {
    procflow()
        .args(["validate", "scenarios/does-not-exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error reading file"));
}

// ──────────────────────────────────────────────
// 3. Run subcommand
// ──────────────────────────────────────────────

#[test]
fn run_attachment_auth_scenario_passes() {
    procflow()
        .args(["run", "scenarios/attachment_auth.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "set_task_variable: failed as expected (authorization)",
        ))
        .stdout(predicate::str::contains(
            "create_attachment: failed as expected (authorization)",
        ))
        .stdout(predicate::str::contains("scenario 'attachment-auth' passed"));
}

#[test]
fn run_case_termination_scenario_passes() {
    procflow()
        .args(["run", "scenarios/case_termination.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("scenario 'case-termination' passed"));
}

#[test]
fn run_with_config_file() {
    procflow()
        .args([
            "run",
            "scenarios/case_termination.json",
            "--config",
            "scenarios/engine.toml",
        ])
        .assert()
        .success();
}

#[test]
fn run_json_output_reports_steps() {
    let output = procflow()
        .args(["--output", "json", "run", "scenarios/attachment_auth.json"])
        .output()
        .expect("run procflow");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json stdout");
    assert_eq!(json["passed"], true);
    let steps = json["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 11);
    assert_eq!(steps[8]["op"], "set_task_variable");
    assert_eq!(steps[8]["expected_error"], "authorization");
}

#[test]
fn run_quiet_prints_nothing() {
    procflow()
        .args(["--quiet", "run", "scenarios/case_termination.json"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn run_failing_expectation_exits_1() {
    let dir = TempDir::new().unwrap();
    fs::copy(
        workspace_root().join("scenarios/testProcess.json"),
        dir.path().join("testProcess.json"),
    )
    .unwrap();
    fs::copy(
        workspace_root().join("scenarios/testCase.json"),
        dir.path().join("testCase.json"),
    )
    .unwrap();
    let path = write(
        &dir,
        "wrong.json",
        r#"{
            "name": "wrong",
            "resources": ["testProcess.json", "testCase.json"],
            "steps": [
                { "op": "start", "key": "testProcess" },
                { "op": "expect", "tasks": 3 }
            ]
        }"#,
    );
    procflow()
        .arg("run")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("scenario 'wrong' failed"))
        .stderr(predicate::str::contains("tasks is 1, expected 3"));
}

#[test]
fn run_unexpected_success_exits_1() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "unexpected.json",
        r#"{
            "name": "unexpected",
            "steps": [
                { "op": "create_user", "id": "u", "expect_error": "authorization" }
            ]
        }"#,
    );
    procflow()
        .arg("run")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "succeeded, expected authorization error",
        ));
}

#[test]
fn run_bad_config_exits_1() {
    let dir = TempDir::new().unwrap();
    let config = write(&dir, "engine.toml", "no_such_setting = true\n");
    procflow()
        .args(["run", "scenarios/case_termination.json", "--config"])
        .arg(&config)
        .assert()
        .failure();
}

#[test]
fn run_json_error_is_an_object() {
    procflow()
        .args(["--output", "json", "run", "scenarios/missing.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"error\""));
}
