use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn scripthost() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_scripthost"));
    command.env_remove("SCRIPTHOST_LOG");
    command.env_remove("SCRIPTHOST_WORKER_STACK");
    command
}

fn write_script(
    dir: &TempDir,
    name: &str,
    contents: &[u8],
) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("Failed to write script");
    path
}

fn run(script: &Path) -> Output {
    scripthost()
        .arg(script)
        .output()
        .expect("Failed to spawn scripthost")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).replace("\r\n", "\n")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn stderr_lines(output: &Output) -> Vec<String> {
    stderr(output).lines().map(str::to_string).collect()
}

#[test]
fn test_runs_script_and_drains_continuations() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "hello.js", b"defer print world\nprint hello\n");

    let output = run(&script);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "hello\nworld\n");
    assert!(!stderr(&output).contains("ERROR"));
}

#[test]
fn test_script_error_prints_one_diagnostic() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "bad.js", b"print start\nthrow kaboom\n");

    let output = run(&script);
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(stdout(&output), "start\n");

    let lines = stderr_lines(&output);
    assert_eq!(lines.len(), 1, "stderr: {}", stderr(&output));
    assert!(lines[0].starts_with("ERROR: JsRunScript failed: "));
    assert!(lines[0].ends_with("bad.js(2, 1): kaboom [JsErrorScriptException]"));
}

#[test]
fn test_failing_continuation_names_the_call() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "late.js", b"print now
defer throw later
");

    let output = run(&script);
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(stdout(&output), "now\n");

    let lines = stderr_lines(&output);
    assert_eq!(lines.len(), 1, "stderr: {}", stderr(&output));
    assert!(lines[0].starts_with("ERROR: JsCallFunction failed: "));
    assert!(lines[0].ends_with("late.js(2, 7): later [JsErrorScriptException]"));
}

#[test]
fn test_missing_script_is_host_error() {
    let dir = TempDir::new().unwrap();
    let output = run(&dir.path().join("nope.js"));
    assert_eq!(output.status.code(), Some(2));
    let lines = stderr_lines(&output);
    assert_eq!(lines.len(), 1, "stderr: {}", stderr(&output));
    assert!(lines[0].starts_with("ERROR: cannot read"));
}

#[test]
fn test_conflicting_modes_are_usage_errors() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "a.js", b"print a\n");
    let header = dir.path().join("a.h");

    let output = scripthost()
        .arg(&script)
        .arg("--serialized")
        .arg("--generate-library-bytecode-header")
        .arg(&header)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("cannot be combined"));
    assert!(!header.exists());
}

#[test]
fn test_unknown_flag_is_usage_error() {
    let output = scripthost().arg("--no-such-flag").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_fault_exits_with_fault_code() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "crash.js", b"print before\nfault 2a\nprint after\n");

    let output = run(&script);
    assert_eq!(output.status.code(), Some(0x2a));
    assert_eq!(stdout(&output), "before\n");
    assert_eq!(
        stderr_lines(&output),
        vec!["FATAL ERROR: scripthost failed due to fault code 2a"]
    );
}

#[test]
fn test_print_config() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "a.js", b"print never\n");

    let output = scripthost()
        .arg(&script)
        .arg("--serialized")
        .arg("--print-config")
        .env("SCRIPTHOST_WORKER_STACK", "1048576")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));

    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["mode"]["kind"], "serialized");
    assert_eq!(config["worker"]["stack_size"], 1048576);
    assert_eq!(config["log_level"], "warn");
    assert!(!stdout(&output).contains("never"));
}

#[test]
fn test_verbose_logs_to_stderr_only() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "a.js", b"print quiet\n");

    let output = scripthost().arg(&script).arg("-v").output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "quiet\n");
    assert!(stderr(&output).contains("DEBUG"));
}
