use std::fs;
use std::process::Command;
use std::sync::Arc;

use scripthost::engine::EngineCapability;
use scripthost::host::{run_on_worker, FaultPolicy, InvocationMode, WorkerOptions};
use scripthost::{load_script, ExecutionOutcome, HostError, ReferenceEngine};
use tempfile::TempDir;

fn scripthost() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_scripthost"));
    command.env_remove("SCRIPTHOST_LOG");
    command
}

fn report_faults() -> WorkerOptions {
    WorkerOptions {
        fault_policy: FaultPolicy::Report,
        ..WorkerOptions::default()
    }
}

#[test]
fn test_header_is_generated_from_file() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("Promise.js");
    fs::write(&script, b"print resolved\r\n").unwrap();
    let header = dir.path().join("Promise.bc.h");

    let output = scripthost()
        .arg(&script)
        .arg("--generate-library-bytecode-header")
        .arg(&header)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(output.stdout.is_empty());

    let text = fs::read_to_string(&header).unwrap();
    assert!(text.starts_with("//-------"));
    assert!(text.contains("#if 0\r\nprint resolved\r\n#endif\r\n"));
    assert!(text.contains("    const char Library_Bytecode_promise[] = {\r\n/* 00000000 */ 0x52,"));
    assert!(text.ends_with("};\r\n\r\n}\r\n"));
}

#[test]
fn test_header_refuses_non_utf8_source() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("latin.js");
    fs::write(&script, b"print caf\xe9\n").unwrap();
    let header = dir.path().join("latin.h");

    let output = scripthost()
        .arg(&script)
        .arg("--generate-library-bytecode-header")
        .arg(&header)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("can only be used on UTF8 file"));
    assert!(!header.exists());
}

#[test]
fn test_emit_then_run_pre_serialized() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("app.js");
    fs::write(&script, "print first\ndefer print second\n").unwrap();
    let bytecode = dir.path().join("app.bc");

    let emitted = scripthost()
        .arg(&script)
        .arg("--emit-bytecode")
        .arg(&bytecode)
        .output()
        .unwrap();
    assert_eq!(emitted.status.code(), Some(0));
    assert!(emitted.stdout.is_empty());
    assert!(fs::metadata(&bytecode).unwrap().len() > 0);

    let ran = scripthost()
        .arg(&script)
        .arg("--bytecode")
        .arg(&bytecode)
        .output()
        .unwrap();
    assert_eq!(ran.status.code(), Some(0));
    assert_eq!(
        String::from_utf8_lossy(&ran.stdout).replace("\r\n", "\n"),
        "first\nsecond\n"
    );
}

#[test]
fn test_corrupt_bytecode_is_host_error() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("app.js");
    fs::write(&script, "print first\n").unwrap();
    let bytecode = dir.path().join("app.bc");
    fs::write(&bytecode, b"garbage").unwrap();

    let output = scripthost()
        .arg(&script)
        .arg("--bytecode")
        .arg(&bytecode)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("JsErrorBadSerializedScript"));
}

#[test]
fn test_serialized_mode_matches_source_mode() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("same.js");
    fs::write(&script, "defer defer print c\ndefer print b\nprint a\n").unwrap();

    let mut outputs = Vec::new();
    for mode in [InvocationMode::Source, InvocationMode::Serialized] {
        let engine = Arc::new(ReferenceEngine::new());
        let shared: Arc<dyn EngineCapability> = engine.clone();
        let outcome = run_on_worker(
            shared,
            load_script(&script).unwrap(),
            mode,
            report_faults(),
        )
        .unwrap();
        assert!(outcome.is_success());
        assert_eq!(engine.live_runtimes(), 0);
        outputs.push(engine.output().lines());
    }
    assert_eq!(outputs[0], vec!["a", "b", "c"]);
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_utf16_script_runs_from_source_only() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("wide.js");
    let mut raw = vec![0xFF, 0xFE];
    for unit in "print wide\n".encode_utf16() {
        raw.extend_from_slice(&unit.to_le_bytes());
    }
    fs::write(&script, raw).unwrap();

    let engine = Arc::new(ReferenceEngine::new());
    let outcome = run_on_worker(
        engine.clone(),
        load_script(&script).unwrap(),
        InvocationMode::Source,
        report_faults(),
    )
    .unwrap();
    assert!(outcome.is_success());
    assert_eq!(engine.output().lines(), vec!["wide"]);

    let outcome = run_on_worker(
        Arc::new(ReferenceEngine::new()),
        load_script(&script).unwrap(),
        InvocationMode::Serialized,
        report_faults(),
    )
    .unwrap();
    assert!(matches!(
        outcome,
        ExecutionOutcome::HostError(HostError::Encoding(_))
    ));
}
