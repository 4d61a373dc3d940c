//! Engine capability boundary
//!
//! The scripting engine is supplied separately. The host only ever talks to it
//! through [`EngineCapability`], a narrow table of operations for creating
//! runtimes and contexts, compiling and running scripts, and surfacing
//! continuations.
//!
//! # Architecture
//!
//! ```text
//! ExecutionSupervisor
//!         |
//!         v
//!  EngineCapability  <-- ReferenceEngine (built in, also the test double)
//!         |
//!         v
//!  Runtime -> Context -> Script / Continuations
//! ```

pub mod reference;

pub use reference::{OutputSink, ReferenceEngine};

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Result of a call into the engine.
pub type EngineResult<T> = Result<T, ErrorCode>;

/// Continuation hook installed on a context.
///
/// The engine calls it once per scheduled continuation (promise reaction or
/// timer-like callback). The closure owns whatever it needs to enqueue the task.
pub type ContinuationCallback = Box<dyn Fn(TaskRef) + Send + Sync>;

/// Opaque handle to one engine runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeHandle(pub u64);

/// Opaque handle to an execution context bound to a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextRef(pub u64);

/// Opaque reference to a pending continuation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskRef(pub u64);

/// Tag attached to each compiled script so the engine can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceContext(pub u64);

impl fmt::Display for RuntimeHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Runtime({})", self.0)
    }
}

impl fmt::Display for ContextRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Context({})", self.0)
    }
}

/// Feature attributes requested when a runtime is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeAttributes(u32);

impl RuntimeAttributes {
    /// No attributes.
    pub const NONE: Self = Self(0);
    /// Allow script execution to be interrupted from outside.
    pub const ALLOW_SCRIPT_INTERRUPT: Self = Self(0x0000_0008);
    /// Serialize built-in library code to byte code as well.
    pub const SERIALIZE_LIBRARY_BYTECODE: Self = Self(0x0000_0100);

    /// Raw attribute bits.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set.
    #[inline]
    pub fn contains(
        self,
        other: Self,
    ) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RuntimeAttributes {
    type Output = Self;

    fn bitor(
        self,
        rhs: Self,
    ) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for RuntimeAttributes {
    fn bitor_assign(
        &mut self,
        rhs: Self,
    ) {
        self.0 |= rhs.0;
    }
}

/// Engine error codes.
///
/// Codes are grouped by category in the high half-word: usage (0x1xxxx),
/// engine (0x2xxxx), script (0x3xxxx) and fatal (0x4xxxx).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError,
    InvalidArgument,
    NullArgument,
    NoCurrentContext,
    InExceptionState,
    NotImplemented,
    WrongThread,
    RuntimeInUse,
    BadSerializedScript,
    InDisabledState,
    CannotDisableExecution,
    HeapEnumInProgress,
    OutOfMemory,
    ScriptException,
    ScriptCompile,
    ScriptTerminated,
    Fatal,
    /// A code this host does not know about.
    Unknown(u32),
}

impl ErrorCode {
    /// Numeric value as reported by the engine.
    pub fn code(self) -> u32 {
        match self {
            ErrorCode::NoError => 0,
            ErrorCode::InvalidArgument => 0x10001,
            ErrorCode::NullArgument => 0x10002,
            ErrorCode::NoCurrentContext => 0x10003,
            ErrorCode::InExceptionState => 0x10004,
            ErrorCode::NotImplemented => 0x10005,
            ErrorCode::WrongThread => 0x10006,
            ErrorCode::RuntimeInUse => 0x10007,
            ErrorCode::BadSerializedScript => 0x10008,
            ErrorCode::InDisabledState => 0x10009,
            ErrorCode::CannotDisableExecution => 0x1000A,
            ErrorCode::HeapEnumInProgress => 0x1000B,
            ErrorCode::OutOfMemory => 0x20001,
            ErrorCode::ScriptException => 0x30001,
            ErrorCode::ScriptCompile => 0x30002,
            ErrorCode::ScriptTerminated => 0x30003,
            ErrorCode::Fatal => 0x40001,
            ErrorCode::Unknown(code) => code,
        }
    }

    /// Decode a raw engine code.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => ErrorCode::NoError,
            0x10001 => ErrorCode::InvalidArgument,
            0x10002 => ErrorCode::NullArgument,
            0x10003 => ErrorCode::NoCurrentContext,
            0x10004 => ErrorCode::InExceptionState,
            0x10005 => ErrorCode::NotImplemented,
            0x10006 => ErrorCode::WrongThread,
            0x10007 => ErrorCode::RuntimeInUse,
            0x10008 => ErrorCode::BadSerializedScript,
            0x10009 => ErrorCode::InDisabledState,
            0x1000A => ErrorCode::CannotDisableExecution,
            0x1000B => ErrorCode::HeapEnumInProgress,
            0x20001 => ErrorCode::OutOfMemory,
            0x30001 => ErrorCode::ScriptException,
            0x30002 => ErrorCode::ScriptCompile,
            0x30003 => ErrorCode::ScriptTerminated,
            0x40001 => ErrorCode::Fatal,
            other => ErrorCode::Unknown(other),
        }
    }

    /// Symbolic name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::NoError => "JsNoError",
            ErrorCode::InvalidArgument => "JsErrorInvalidArgument",
            ErrorCode::NullArgument => "JsErrorNullArgument",
            ErrorCode::NoCurrentContext => "JsErrorNoCurrentContext",
            ErrorCode::InExceptionState => "JsErrorInExceptionState",
            ErrorCode::NotImplemented => "JsErrorNotImplemented",
            ErrorCode::WrongThread => "JsErrorWrongThread",
            ErrorCode::RuntimeInUse => "JsErrorRuntimeInUse",
            ErrorCode::BadSerializedScript => "JsErrorBadSerializedScript",
            ErrorCode::InDisabledState => "JsErrorInDisabledState",
            ErrorCode::CannotDisableExecution => "JsErrorCannotDisableExecution",
            ErrorCode::HeapEnumInProgress => "JsErrorHeapEnumInProgress",
            ErrorCode::OutOfMemory => "JsErrorOutOfMemory",
            ErrorCode::ScriptException => "JsErrorScriptException",
            ErrorCode::ScriptCompile => "JsErrorScriptCompile",
            ErrorCode::ScriptTerminated => "JsErrorScriptTerminated",
            ErrorCode::Fatal => "JsErrorFatal",
            ErrorCode::Unknown(_) => "<unknown>",
        }
    }

    /// Errors raised by the script itself rather than by misuse of the engine.
    pub fn is_script_error(self) -> bool {
        self.code() & 0xFFFF_0000 == 0x30000
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:#x} ({})", self.code(), self.name())
    }
}

/// Engine operations, named the way diagnostics report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateRuntime,
    DisposeRuntime,
    CreateContext,
    GetCurrentContext,
    SetCurrentContext,
    SerializeScript,
    RunScript,
    RunSerializedScript,
    SetContinuationCallback,
    CallTask,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::CreateRuntime => "JsCreateRuntime",
            Operation::DisposeRuntime => "JsDisposeRuntime",
            Operation::CreateContext => "JsCreateContext",
            Operation::GetCurrentContext => "JsGetCurrentContext",
            Operation::SetCurrentContext => "JsSetCurrentContext",
            Operation::SerializeScript => "JsSerializeScript",
            Operation::RunScript => "JsRunScript",
            Operation::RunSerializedScript => "JsRunSerializedScript",
            Operation::SetContinuationCallback => "JsSetPromiseContinuationCallback",
            Operation::CallTask => "JsCallFunction",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Description of a script-level exception, with the location the engine reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptException {
    pub message: String,
    /// 1-based line, if known.
    pub line: Option<u32>,
    /// 1-based column, if known.
    pub column: Option<u32>,
}

impl ScriptException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(
        mut self,
        line: u32,
        column: u32,
    ) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl fmt::Display for ScriptException {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "({}, {}): {}", line, column, self.message),
            (Some(line), None) => write!(f, "({}): {}", line, self.message),
            _ => write!(f, ": {}", self.message),
        }
    }
}

/// Capability table exposed by a scripting engine.
///
/// "Current context" is engine-global state. Calls that compile or run code
/// act on whatever context is current.
pub trait EngineCapability: Send + Sync {
    /// Create a runtime with the given attributes.
    fn create_runtime(
        &self,
        attributes: RuntimeAttributes,
    ) -> EngineResult<RuntimeHandle>;

    /// Release a runtime. Fails with `RuntimeInUse` while one of its contexts is current.
    fn dispose_runtime(
        &self,
        runtime: RuntimeHandle,
    ) -> EngineResult<()>;

    /// Create a context bound to `runtime`.
    fn create_context(
        &self,
        runtime: RuntimeHandle,
    ) -> EngineResult<ContextRef>;

    /// The currently active context, if any.
    fn current_context(&self) -> EngineResult<Option<ContextRef>>;

    /// Install `context` as current, or clear the association with `None`.
    fn set_current_context(
        &self,
        context: Option<ContextRef>,
    ) -> EngineResult<()>;

    /// Compile `source` to byte code.
    ///
    /// With `None` only the required length is reported. With a buffer, the
    /// buffer is filled and the written length is reported.
    fn serialize_script(
        &self,
        source: &str,
        buffer: Option<&mut [u8]>,
    ) -> EngineResult<usize>;

    /// Compile and run `source` in the current context.
    fn run_script(
        &self,
        source: &str,
        source_context: SourceContext,
        source_url: &Path,
    ) -> EngineResult<()>;

    /// Run previously serialized byte code in the current context.
    fn run_serialized_script(
        &self,
        source: &str,
        bytecode: &[u8],
        source_context: SourceContext,
        source_url: &Path,
    ) -> EngineResult<()>;

    /// Install (or remove) the continuation hook on the current context.
    fn set_continuation_callback(
        &self,
        callback: Option<ContinuationCallback>,
    ) -> EngineResult<()>;

    /// Invoke a scheduled continuation with an undefined receiver.
    fn call_task(
        &self,
        task: TaskRef,
    ) -> EngineResult<()>;

    /// Take the pending script exception, clearing the exception state.
    fn take_exception(&self) -> Option<ScriptException>;
}

#[cfg(test)]
mod tests;
