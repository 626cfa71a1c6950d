#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SAM_TEMPLATE: &str = "AWSTemplateFormatVersion: '2010-09-09'\n\
Transform: AWS::Serverless-2016-10-31\nResources: {}\n";

fn deployloop(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("deployloop").unwrap();
    cmd.current_dir(dir.path())
        .env("DEPLOYLOOP_ROOT", dir.path())
        .env_remove("AI_MODEL")
        .env_remove("RUST_LOG");
    cmd
}

fn sam_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("template.yaml"), SAM_TEMPLATE).unwrap();
    dir
}

fn only_run_dir(root: &Path) -> PathBuf {
    let runs: Vec<PathBuf> = std::fs::read_dir(root.join(".deployloop/runs"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_dir())
        .collect();
    assert_eq!(runs.len(), 1, "expected exactly one run: {runs:?}");
    runs.into_iter().next().unwrap()
}

// ---------------------------------------------------------------------------
// deployloop init / config
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    deployloop(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .deployloop/config.yaml"));
    assert!(dir.path().join(".deployloop/config.yaml").exists());
    assert!(dir.path().join(".deployloop/runs").is_dir());

    deployloop(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .deployloop/config.yaml"));
}

#[test]
fn init_adds_runs_to_existing_gitignore_once() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".gitignore"), "node_modules/").unwrap();
    deployloop(&dir).arg("init").assert().success();
    deployloop(&dir).arg("init").assert().success();

    let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert_eq!(content, "node_modules/\n.deployloop/runs/\n");
}

#[test]
fn config_show_applies_flags() {
    let dir = TempDir::new().unwrap();
    deployloop(&dir).arg("init").assert().success();

    let out = deployloop(&dir)
        .args(["--json", "config", "show", "--region", "eu-west-1"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value["deploy"]["region"], "eu-west-1");
    assert_eq!(value["testing"]["max_suites"], 5);
}

#[test]
fn config_validate_default_is_clean() {
    let dir = TempDir::new().unwrap();
    deployloop(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_rejects_bad_model() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".deployloop")).unwrap();
    std::fs::write(
        dir.path().join(".deployloop/config.yaml"),
        "ai:\n  model: nonsense\n",
    )
    .unwrap();
    deployloop(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error] ai.model"))
        .stderr(predicate::str::contains("config validation found errors"));
}

// ---------------------------------------------------------------------------
// deployloop detect
// ---------------------------------------------------------------------------

#[test]
fn detect_sam_starts_a_run() {
    let dir = sam_project();
    deployloop(&dir)
        .arg("detect")
        .assert()
        .success()
        .stdout(predicate::str::contains("kind: sam"))
        .stderr(predicate::str::contains("✓ detect [sam]"));

    let run = only_run_dir(dir.path());
    let detection = std::fs::read_to_string(run.join("detection.json")).unwrap();
    assert!(detection.contains("\"kind\": \"sam\""));
    assert!(run.join("reports/detect.json").exists());

    let latest = std::fs::read_to_string(dir.path().join(".deployloop/runs/LATEST")).unwrap();
    assert_eq!(latest.trim(), run.file_name().unwrap().to_str().unwrap());
}

#[test]
fn detect_json_output() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("cdk.json"), "{}").unwrap();
    std::fs::write(dir.path().join("main.tf"), "").unwrap();
    let out = deployloop(&dir).args(["detect", "--json"]).output().unwrap();
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value["kind"], "cdk");
    assert_eq!(value["rule"], "cdk_json");
}

#[test]
fn detect_unknown_project_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("README.md"), "# nothing to deploy").unwrap();
    deployloop(&dir)
        .arg("detect")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no deployment markers recognized"))
        .stderr(predicate::str::contains("✗ detect [unknown]"));
}

// ---------------------------------------------------------------------------
// stage commands against missing artifacts
// ---------------------------------------------------------------------------

#[test]
fn deploy_without_run_fails() {
    let dir = sam_project();
    deployloop(&dir)
        .arg("deploy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no run found"));
}

#[test]
fn test_without_plan_reports_missing_artifact() {
    let dir = sam_project();
    let run = dir.path().join("scratch");
    deployloop(&dir)
        .args(["test", "--run-dir"])
        .arg(&run)
        .assert()
        .failure()
        .stderr(predicate::str::contains("artifact not found"))
        .stderr(predicate::str::contains("test-plan.json"));
}

#[test]
fn fix_without_logs_fails_before_generation() {
    let dir = sam_project();
    deployloop(&dir).arg("detect").assert().success();
    deployloop(&dir)
        .args(["fix", "--stage", "deploy"])
        .env("ANTHROPIC_API_KEY", "test-key")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no log artifact to diagnose"));
}

#[test]
fn fix_rejects_unknown_stage() {
    let dir = sam_project();
    deployloop(&dir)
        .args(["fix", "--stage", "outputs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown failure stage"));
}

// ---------------------------------------------------------------------------
// deployloop test
// ---------------------------------------------------------------------------

#[test]
fn failing_test_run_exits_one_and_writes_log() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".deployloop")).unwrap();
    std::fs::write(
        dir.path().join(".deployloop/config.yaml"),
        "testing:\n  step_delay_ms: 0\n  request_timeout_secs: 5\n",
    )
    .unwrap();
    let run = dir.path().join("run-1");
    std::fs::create_dir_all(&run).unwrap();
    // Port 9 (discard) is closed on test hosts; the request fails at transport.
    std::fs::write(run.join("outputs.json"), r#"{"ApiUrl":"http://127.0.0.1:9"}"#).unwrap();
    std::fs::write(
        run.join("test-plan.json"),
        r#"{"suites":[{"name":"Health","steps":[
            {"action":"ping","endpoint":"/health"},
            {"action":"never runs","endpoint":"/other"}]}]}"#,
    )
    .unwrap();

    deployloop(&dir)
        .args(["test", "--run-dir"])
        .arg(&run)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAIL"))
        .stdout(predicate::str::contains("0 passed, 1 failed, 1 skipped"))
        .stderr(predicate::str::contains("1 of 1 executed test step(s) failed"));

    assert!(run.join("test-results.json").exists());
    let log = std::fs::read_to_string(run.join("test.log")).unwrap();
    assert!(log.contains("skipped 1 remaining step(s)"));
}

// ---------------------------------------------------------------------------
// deployloop scaffold
// ---------------------------------------------------------------------------

#[test]
fn scaffold_missing_spec_fails() {
    let dir = TempDir::new().unwrap();
    deployloop(&dir)
        .args(["scaffold", "--spec", "does-not-exist.md"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read spec"));
}
