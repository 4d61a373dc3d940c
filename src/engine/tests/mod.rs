//! Engine surface and reference engine tests

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use super::reference::SerializeQuirk;
use super::*;

fn url() -> &'static Path {
    Path::new("/scripts/test.js")
}

/// Runtime + context made current, the way the host sets things up.
fn entered(engine: &ReferenceEngine) -> (RuntimeHandle, ContextRef) {
    let runtime = engine
        .create_runtime(RuntimeAttributes::ALLOW_SCRIPT_INTERRUPT)
        .unwrap();
    let context = engine.create_context(runtime).unwrap();
    engine.set_current_context(Some(context)).unwrap();
    (runtime, context)
}

#[test]
fn test_error_code_values_round_trip() {
    for code in [
        ErrorCode::NoError,
        ErrorCode::InvalidArgument,
        ErrorCode::RuntimeInUse,
        ErrorCode::BadSerializedScript,
        ErrorCode::OutOfMemory,
        ErrorCode::ScriptException,
        ErrorCode::ScriptCompile,
        ErrorCode::Fatal,
    ] {
        assert_eq!(ErrorCode::from_code(code.code()), code);
    }
    assert_eq!(ErrorCode::from_code(0x1234), ErrorCode::Unknown(0x1234));
    assert_eq!(ErrorCode::Unknown(0x1234).name(), "<unknown>");
}

#[test]
fn test_error_code_display_and_category() {
    assert_eq!(
        ErrorCode::NoCurrentContext.to_string(),
        "0x10003 (JsErrorNoCurrentContext)"
    );
    assert!(ErrorCode::ScriptCompile.is_script_error());
    assert!(ErrorCode::ScriptTerminated.is_script_error());
    assert!(!ErrorCode::InvalidArgument.is_script_error());
    assert!(!ErrorCode::Fatal.is_script_error());
}

#[test]
fn test_operation_names() {
    assert_eq!(Operation::RunScript.to_string(), "JsRunScript");
    assert_eq!(
        Operation::SetContinuationCallback.name(),
        "JsSetPromiseContinuationCallback"
    );
}

#[test]
fn test_runtime_attributes_combine() {
    let attrs =
        RuntimeAttributes::ALLOW_SCRIPT_INTERRUPT | RuntimeAttributes::SERIALIZE_LIBRARY_BYTECODE;
    assert_eq!(attrs.bits(), 0x108);
    assert!(attrs.contains(RuntimeAttributes::SERIALIZE_LIBRARY_BYTECODE));
    assert!(!RuntimeAttributes::NONE.contains(RuntimeAttributes::ALLOW_SCRIPT_INTERRUPT));

    let mut grown = RuntimeAttributes::NONE;
    grown |= RuntimeAttributes::ALLOW_SCRIPT_INTERRUPT;
    assert_eq!(grown, RuntimeAttributes::ALLOW_SCRIPT_INTERRUPT);
}

#[test]
fn test_exception_display() {
    assert_eq!(ScriptException::new("boom").at(3, 1).to_string(), "(3, 1): boom");
    assert_eq!(ScriptException::new("boom").to_string(), ": boom");
}

#[test]
fn test_calls_without_current_context_fail() {
    let engine = ReferenceEngine::new();
    assert_eq!(
        engine.run_script("print x", SourceContext(0), url()),
        Err(ErrorCode::NoCurrentContext)
    );
    assert_eq!(
        engine.serialize_script("print x", None),
        Err(ErrorCode::NoCurrentContext)
    );
    assert_eq!(
        engine.set_continuation_callback(None),
        Err(ErrorCode::NoCurrentContext)
    );
}

#[test]
fn test_dispose_rules() {
    let engine = ReferenceEngine::new();
    let (runtime, _) = entered(&engine);

    assert_eq!(engine.dispose_runtime(runtime), Err(ErrorCode::RuntimeInUse));
    engine.set_current_context(None).unwrap();
    assert_eq!(engine.dispose_runtime(runtime), Ok(()));
    assert_eq!(engine.dispose_runtime(runtime), Err(ErrorCode::InvalidArgument));
    assert_eq!(engine.live_runtimes(), 0);
}

#[test]
fn test_unknown_context_is_invalid() {
    let engine = ReferenceEngine::new();
    assert_eq!(
        engine.set_current_context(Some(ContextRef(99))),
        Err(ErrorCode::InvalidArgument)
    );
    assert_eq!(
        engine.create_context(RuntimeHandle(42)),
        Err(ErrorCode::InvalidArgument)
    );
}

#[test]
fn test_print_writes_to_sink() {
    let engine = ReferenceEngine::new();
    entered(&engine);
    engine
        .run_script("# greeting\nprint hello\n\n  print world", SourceContext(1), url())
        .unwrap();
    assert_eq!(engine.output().lines(), vec!["hello", "world"]);
}

#[test]
fn test_throw_reports_location() {
    let engine = ReferenceEngine::new();
    entered(&engine);
    let result = engine.run_script("print a\n  throw bad thing", SourceContext(1), url());
    assert_eq!(result, Err(ErrorCode::ScriptException));

    let exception = engine.take_exception().unwrap();
    assert_eq!(exception.message, "bad thing");
    assert_eq!(exception.line, Some(2));
    assert_eq!(exception.column, Some(3));
    assert!(engine.take_exception().is_none());
}

#[test]
fn test_pending_exception_blocks_execution() {
    let engine = ReferenceEngine::new();
    entered(&engine);
    let _ = engine.run_script("throw first", SourceContext(1), url());
    assert_eq!(
        engine.run_script("print x", SourceContext(2), url()),
        Err(ErrorCode::InExceptionState)
    );
    engine.take_exception();
    assert!(engine.run_script("print x", SourceContext(3), url()).is_ok());
}

#[test]
fn test_parse_error_is_compile_error() {
    let engine = ReferenceEngine::new();
    entered(&engine);
    assert_eq!(
        engine.run_script("print ok\nshout no", SourceContext(1), url()),
        Err(ErrorCode::ScriptCompile)
    );
    let exception = engine.take_exception().unwrap();
    assert!(exception.message.contains("shout"));
    assert_eq!(exception.line, Some(2));
    assert!(engine.output().lines().is_empty());
}

fn deferred(depth: usize) -> String {
    format!("{}print deep", "defer ".repeat(depth))
}

#[test]
fn test_defer_chain_at_limit_round_trips() {
    let engine = ReferenceEngine::new();
    entered(&engine);
    let source = deferred(reference::MAX_DEFER_DEPTH);
    let size = engine.serialize_script(&source, None).unwrap();
    let mut buffer = vec![0u8; size];
    assert_eq!(engine.serialize_script(&source, Some(&mut buffer[..])), Ok(size));

    assert_eq!(
        engine.run_serialized_script(&source, &buffer, SourceContext(1), url()),
        Ok(())
    );
    assert!(engine.run_script(&source, SourceContext(2), url()).is_ok());
    assert!(engine.take_exception().is_none());
}

#[test]
fn test_defer_chain_past_limit_is_compile_error() {
    let engine = ReferenceEngine::new();
    entered(&engine);
    let source = format!("print ok
  {}", deferred(reference::MAX_DEFER_DEPTH + 1));

    assert_eq!(
        engine.run_script(&source, SourceContext(1), url()),
        Err(ErrorCode::ScriptCompile)
    );
    let exception = engine.take_exception().unwrap();
    assert!(exception.message.contains("nested deeper than 64"));
    assert_eq!(exception.line, Some(2));
    assert_eq!(exception.column, Some(3 + 6 * reference::MAX_DEFER_DEPTH as u32));

    assert_eq!(
        engine.serialize_script(&source, None),
        Err(ErrorCode::ScriptCompile)
    );
    assert!(engine.take_exception().is_some());
    assert!(engine.output().lines().is_empty());
}

#[test]
fn test_defer_goes_through_callback() {
    let engine = ReferenceEngine::new();
    entered(&engine);
    let seen = Arc::new(Mutex::new(Vec::<TaskRef>::new()));
    let sink = Arc::clone(&seen);
    engine
        .set_continuation_callback(Some(Box::new(move |task: TaskRef| sink.lock().push(task))))
        .unwrap();

    engine
        .run_script("defer print later\nprint now", SourceContext(1), url())
        .unwrap();
    assert_eq!(engine.output().lines(), vec!["now"]);

    let tasks = seen.lock().clone();
    assert_eq!(tasks.len(), 1);
    engine.call_task(tasks[0]).unwrap();
    assert_eq!(engine.output().lines(), vec!["now", "later"]);

    // A task is consumed by its call.
    assert_eq!(engine.call_task(tasks[0]), Err(ErrorCode::InvalidArgument));
}

#[test]
fn test_serialize_size_query_then_fill() {
    let engine = ReferenceEngine::new();
    entered(&engine);
    let source = "print a\ndefer throw b";
    let size = engine.serialize_script(source, None).unwrap();
    assert!(size > 0);

    let mut small = vec![0u8; size - 1];
    assert_eq!(
        engine.serialize_script(source, Some(&mut small[..])),
        Err(ErrorCode::InvalidArgument)
    );

    let mut buffer = vec![0u8; size];
    assert_eq!(engine.serialize_script(source, Some(&mut buffer[..])), Ok(size));
    assert_eq!(&buffer[..4], b"RFBC");
}

#[test]
fn test_serialized_script_runs_like_source() {
    let engine = ReferenceEngine::new();
    entered(&engine);
    let source = "print one\nprint two";
    let size = engine.serialize_script(source, None).unwrap();
    let mut buffer = vec![0u8; size];
    engine.serialize_script(source, Some(&mut buffer[..])).unwrap();

    engine
        .run_serialized_script(source, &buffer, SourceContext(4), url())
        .unwrap();
    assert_eq!(engine.output().lines(), vec!["one", "two"]);
    assert!(engine
        .journal()
        .contains(&"run_serialized_script(4)".to_string()));
}

#[test]
fn test_corrupt_bytecode_is_rejected() {
    let engine = ReferenceEngine::new();
    entered(&engine);
    assert_eq!(
        engine.run_serialized_script("", b"RFBC\x01\xff", SourceContext(1), url()),
        Err(ErrorCode::BadSerializedScript)
    );
    assert_eq!(
        engine.run_serialized_script("", b"nope", SourceContext(1), url()),
        Err(ErrorCode::BadSerializedScript)
    );
}

#[test]
fn test_serialize_quirks() {
    let engine = ReferenceEngine::new();
    entered(&engine);
    engine.set_serialize_quirk(SerializeQuirk::ZeroLength);
    assert_eq!(engine.serialize_script("print a", None), Ok(0));

    engine.set_serialize_quirk(SerializeQuirk::ShortFill);
    let size = engine.serialize_script("print a", None).unwrap();
    let mut buffer = vec![0u8; size];
    assert_eq!(
        engine.serialize_script("print a", Some(&mut buffer[..])),
        Ok(size - 1)
    );
}

#[test]
fn test_injected_failure() {
    let engine = ReferenceEngine::new();
    engine.inject_failure(Operation::CreateRuntime, ErrorCode::OutOfMemory);
    assert_eq!(
        engine.create_runtime(RuntimeAttributes::NONE),
        Err(ErrorCode::OutOfMemory)
    );
    assert!(engine.journal().is_empty());
}

#[test]
fn test_attributes_are_recorded() {
    let engine = ReferenceEngine::new();
    let attrs =
        RuntimeAttributes::ALLOW_SCRIPT_INTERRUPT | RuntimeAttributes::SERIALIZE_LIBRARY_BYTECODE;
    let runtime = engine.create_runtime(attrs).unwrap();
    assert_eq!(engine.runtime_attributes(runtime), Some(attrs));
    assert_eq!(engine.journal(), vec![format!("create_runtime({}, 0x108)", runtime.0)]);
}
