//! End-to-end tests for the talk-codebase binary.
//!
//! None of these reach a model: every chat run fails configuration or model
//! resolution before any embedding work starts.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::{BufRead, BufReader};
use std::process::Stdio;
use tempfile::TempDir;

#[allow(deprecated)]
fn talk_cmd(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("talk-codebase").expect("talk-codebase binary should exist");
    cmd.env_remove("RUST_LOG")
        .env_remove("TALK_CODEBASE_MODE")
        .arg("--config-dir")
        .arg(config_dir.path());
    cmd
}

fn config_text(config_dir: &TempDir) -> String {
    fs::read_to_string(config_dir.path().join("talk_codebase_config.yaml")).unwrap()
}

#[test]
fn chat_without_api_key_reports_error_and_exits_1() {
    let config_dir = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();

    talk_cmd(&config_dir)
        .arg("chat")
        .arg(repo.path())
        .write_stdin("hello END\n")
        .assert()
        .code(1)
        .stdout(predicate::str::contains(r#""status":"error""#))
        .stdout(predicate::str::contains("API key not configured"))
        .stdout(predicate::str::ends_with("END_OF_RESPONSE\n"));

    assert!(!repo.path().join(".talk_codebase").exists());
}

#[test]
fn chat_with_missing_local_model_stays_in_loop() {
    let config_dir = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();

    configure_missing_local_model(&config_dir);

    let output = talk_cmd(&config_dir)
        .arg("chat")
        .arg(repo.path())
        .write_stdin("what is this END\nexit\nignored END\n")
        .assert()
        .success()
        .stderr(predicate::str::contains("Entered loop for queries..."))
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(output).unwrap();
    assert_eq!(stdout.matches("END_OF_RESPONSE").count(), 2);
    assert!(stdout.contains("Failed to load vector store"));
    assert!(stdout.contains("RECREATE_VECTOR_STORE"));
    assert!(!stdout.contains("ignored"));
}

fn configure_missing_local_model(config_dir: &TempDir) {
    talk_cmd(config_dir)
        .args(["configure", "--model-type", "local", "--model-path"])
        .arg(config_dir.path().join("missing.bin"))
        .assert()
        .success()
        .stdout(predicate::str::contains("not run"));
}

#[test]
fn readiness_line_survives_quiet_log_filter() {
    let config_dir = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    configure_missing_local_model(&config_dir);

    talk_cmd(&config_dir)
        .env("RUST_LOG", "warn")
        .arg("chat")
        .arg(repo.path())
        .write_stdin("exit\n")
        .assert()
        .success()
        .stderr(predicate::str::contains("Entered loop for queries..."));
}

#[cfg(unix)]
#[test]
fn interrupt_says_bye_and_exits_0() {
    let config_dir = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    configure_missing_local_model(&config_dir);

    let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_talk-codebase"))
        .env_remove("RUST_LOG")
        .env_remove("TALK_CODEBASE_MODE")
        .arg("--config-dir")
        .arg(config_dir.path())
        .arg("chat")
        .arg(repo.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    // Held open so the session stays blocked on input.
    let _stdin = child.stdin.take().unwrap();

    let mut stderr = BufReader::new(child.stderr.take().unwrap()).lines();
    let ready = stderr
        .by_ref()
        .map_while(|line| line.ok())
        .any(|line| line.contains("Entered loop for queries..."));
    assert!(ready, "session never reported readiness");

    let killed = std::process::Command::new("kill")
        .arg("-INT")
        .arg(child.id().to_string())
        .status()
        .unwrap();
    assert!(killed.success());

    let output = child.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.ends_with("{\"status\":\"success\",\"message\":\"Bye!\"}\nEND_OF_RESPONSE\n"));
}

#[test]
fn configure_openai_persists_key_and_defaults() {
    let config_dir = TempDir::new().unwrap();

    talk_cmd(&config_dir)
        .args(["configure", "--model-type", "openai", "--api-key", "sk-abc123456"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configured"));

    let text = config_text(&config_dir);
    assert!(text.contains("api_key: sk-abc123456"));
    assert!(text.contains("model_name: gpt-3.5-turbo-16k-0613"));
    assert!(text.contains("chunk_size:"));
}

#[test]
fn configure_rejects_unknown_model_type() {
    let config_dir = TempDir::new().unwrap();

    talk_cmd(&config_dir)
        .args(["configure", "--model-type", "llama"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown model type"));
}

#[test]
fn show_config_masks_api_key() {
    let config_dir = TempDir::new().unwrap();

    talk_cmd(&config_dir)
        .args(["configure", "--api-key", "sk-abc123456"])
        .assert()
        .success();

    talk_cmd(&config_dir)
        .arg("show-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("****3456"))
        .stdout(predicate::str::contains("sk-abc123456").not());
}

#[test]
fn show_config_without_file_fails() {
    let config_dir = TempDir::new().unwrap();

    talk_cmd(&config_dir)
        .arg("show-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No configuration"));
}

#[test]
fn init_writes_defaults_once() {
    let config_dir = TempDir::new().unwrap();

    talk_cmd(&config_dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote default configuration"));

    let text = config_text(&config_dir);
    assert!(text.contains("model_type: openai"));
    assert!(text.contains("api_key: null"));

    talk_cmd(&config_dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}
