use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

const SHORT_LOG: &str = "\
exec: virt-v2v [-i disk /var/tmp/in.img -o local -os /var/tmp]
[   0.0] Setting up the source
[   4.1] Finishing off
";

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../engine/tests/fixtures/windows_conversion.log")
}

#[allow(deprecated)]
fn loglens() -> Command {
    Command::cargo_bin("loglens").expect("binary")
}

fn run_json(args: &[&str]) -> Value {
    let output = loglens().args(args).output().expect("command run");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid json")
}

#[test]
fn parse_file_emits_full_json() {
    let path = fixture();
    let body = run_json(&["--quiet", "parse", path.to_str().expect("utf-8 path")]);

    assert_eq!(body["total_lines"], 99);
    let run = &body["runs"][0];
    assert_eq!(run["tool"], "virt-v2v");
    assert_eq!(run["exit_status"], "success");
    assert_eq!(run["stages"].as_array().map(Vec::len), Some(11));
    assert_eq!(run["installed_apps"][0]["name"], "VMware Tools");
    assert!(!run["lines"].as_array().expect("line buffer").is_empty());
}

#[test]
fn no_lines_drops_the_line_buffer() {
    let path = fixture();
    let body = run_json(&[
        "--quiet",
        "parse",
        "--no-lines",
        "--parallel",
        path.to_str().expect("utf-8 path"),
    ]);
    assert_eq!(body["runs"][0]["lines"], Value::Array(Vec::new()));
    assert_eq!(body["runs"][0]["exit_status"], "success");
}

#[test]
fn parse_reads_stdin() {
    let output = loglens()
        .args(["--quiet", "parse", "--format", "counts", "-"])
        .write_stdin(SHORT_LOG)
        .output()
        .expect("command run");
    assert!(output.status.success());

    let body: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(body["total_lines"], 3);
    assert_eq!(body["runs"][0]["stages"], 2);
    assert_eq!(body["runs"][0]["last_stage"], "Finishing off");
}

#[test]
fn summary_is_markdown() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("v2v.log");
    fs::write(&path, SHORT_LOG).expect("write log");

    loglens()
        .args(["--quiet", "parse", "--summary"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("# Log summary"))
        .stdout(predicate::str::contains("| `1` | `virt-v2v` | `success` |"));
}

#[test]
fn binary_input_yields_empty_result() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("disk.img");
    fs::write(&path, [0u8, 159, 146, 150, 0, 1, 2, 3]).expect("write blob");

    let body = run_json(&["--quiet", "parse", path.to_str().expect("utf-8 path")]);
    assert_eq!(body["total_lines"], 0);
    assert_eq!(body["runs"], Value::Array(Vec::new()));

    loglens()
        .args(["--quiet", "parse", "--strict"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no tool runs recognised"));
}

#[test]
fn missing_file_is_an_error() {
    let temp = tempdir().expect("tempdir");
    loglens()
        .args(["parse"])
        .arg(temp.path().join("absent.log"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn summary_conflicts_with_explicit_format() {
    loglens()
        .args(["parse", "--summary", "--format", "json", "-"])
        .assert()
        .failure();
}
