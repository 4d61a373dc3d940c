//! Built-in reference engine
//!
//! A small line-oriented script engine that implements [`EngineCapability`]
//! with the same runtime/context rules a production engine enforces. The host
//! binary runs scripts on it, and tests use it as the engine double.
//!
//! # Script language
//!
//! ```text
//! # comment
//! print hello          -> writes "hello" to the output sink
//! defer print later    -> schedules a continuation running `print later`
//! defer defer print x  -> continuations may schedule continuations
//! throw boom           -> raises a script exception
//! fault c0000005       -> raises a structured fault with the given hex code
//! ```
//!
//! A statement nests at most [`MAX_DEFER_DEPTH`] `defer`s; deeper chains are
//! compile errors.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use super::{
    ContextRef, ContinuationCallback, EngineCapability, EngineResult, ErrorCode, Operation,
    RuntimeAttributes, RuntimeHandle, ScriptException, SourceContext, TaskRef,
};
use crate::host::fault::raise_fault;

/// Byte code magic: "RFBC".
const BYTECODE_MAGIC: [u8; 4] = *b"RFBC";
const BYTECODE_VERSION: u8 = 1;

const TAG_PRINT: u8 = 0;
const TAG_DEFER: u8 = 1;
const TAG_THROW: u8 = 2;
const TAG_FAULT: u8 = 3;

/// Deepest `defer` chain a statement may carry, in source and byte code alike.
pub const MAX_DEFER_DEPTH: usize = 64;

/// Where `print` output goes.
///
/// Lines are always captured; echoing to stdout is optional.
#[derive(Debug, Clone, Default)]
pub struct OutputSink {
    lines: Arc<Mutex<Vec<String>>>,
    echo: bool,
}

impl OutputSink {
    /// Capture only.
    pub fn captured() -> Self {
        Self::default()
    }

    /// Capture and echo every line to stdout.
    pub fn stdout() -> Self {
        Self {
            lines: Arc::default(),
            echo: true,
        }
    }

    pub fn write_line(
        &self,
        line: &str,
    ) {
        if self.echo {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{}", line);
        }
        self.lines.lock().push(line.to_string());
    }

    /// Everything written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

/// Quirks the engine can be told to exhibit in its serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializeQuirk {
    #[default]
    None,
    /// Report a zero length from the size query.
    ZeroLength,
    /// Fill one byte less than the size query reported.
    ShortFill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StatementKind {
    Print(String),
    Defer(Box<Statement>),
    Throw(String),
    Fault(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Statement {
    kind: StatementKind,
    /// 1-based column of the keyword.
    column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Instruction {
    line: u32,
    statement: Statement,
}

struct ContextRecord {
    runtime: RuntimeHandle,
    callback: Option<ContinuationCallback>,
    /// Continuations scheduled but not yet called, with their line.
    tasks: HashMap<TaskRef, (u32, Statement)>,
}

struct EngineState {
    next_handle: u64,
    runtimes: IndexMap<RuntimeHandle, RuntimeAttributes>,
    contexts: IndexMap<ContextRef, ContextRecord>,
    current: Option<ContextRef>,
    exception: Option<ScriptException>,
    journal: Vec<String>,
    injected: HashMap<Operation, ErrorCode>,
    quirk: SerializeQuirk,
}

impl EngineState {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn check_injected(
        &self,
        operation: Operation,
    ) -> EngineResult<()> {
        match self.injected.get(&operation) {
            Some(code) => Err(*code),
            None => Ok(()),
        }
    }

    fn current_record(&mut self) -> EngineResult<&mut ContextRecord> {
        let current = self.current.ok_or(ErrorCode::NoCurrentContext)?;
        self.contexts
            .get_mut(&current)
            .ok_or(ErrorCode::NoCurrentContext)
    }
}

/// Line-oriented reference implementation of [`EngineCapability`].
pub struct ReferenceEngine {
    state: Mutex<EngineState>,
    output: OutputSink,
}

impl std::fmt::Debug for ReferenceEngine {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReferenceEngine")
            .field("runtimes", &state.runtimes.len())
            .field("contexts", &state.contexts.len())
            .field("current", &state.current)
            .finish()
    }
}

impl ReferenceEngine {
    /// Engine whose output is only captured.
    pub fn new() -> Self {
        Self::with_output(OutputSink::captured())
    }

    pub fn with_output(output: OutputSink) -> Self {
        Self {
            state: Mutex::new(EngineState {
                next_handle: 0,
                runtimes: IndexMap::new(),
                contexts: IndexMap::new(),
                current: None,
                exception: None,
                journal: Vec::new(),
                injected: HashMap::new(),
                quirk: SerializeQuirk::None,
            }),
            output,
        }
    }

    /// The sink `print` writes to.
    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    /// Make every later call of `operation` fail with `code`.
    pub fn inject_failure(
        &self,
        operation: Operation,
        code: ErrorCode,
    ) {
        self.state.lock().injected.insert(operation, code);
    }

    pub fn set_serialize_quirk(
        &self,
        quirk: SerializeQuirk,
    ) {
        self.state.lock().quirk = quirk;
    }

    /// Mutating calls in the order they were made.
    pub fn journal(&self) -> Vec<String> {
        self.state.lock().journal.clone()
    }

    /// Number of runtimes that have not been disposed.
    pub fn live_runtimes(&self) -> usize {
        self.state.lock().runtimes.len()
    }

    /// Attributes a live runtime was created with.
    pub fn runtime_attributes(
        &self,
        runtime: RuntimeHandle,
    ) -> Option<RuntimeAttributes> {
        self.state.lock().runtimes.get(&runtime).copied()
    }

    fn execute(
        &self,
        state: &mut EngineState,
        line: u32,
        statement: &Statement,
    ) -> EngineResult<()> {
        match &statement.kind {
            StatementKind::Print(text) => {
                self.output.write_line(text);
                Ok(())
            }
            StatementKind::Defer(inner) => {
                let task = TaskRef(state.next_handle());
                let record = state.current_record()?;
                record.tasks.insert(task, (line, (**inner).clone()));
                trace!("scheduled continuation {:?} at line {}", task, line);
                if let Some(callback) = record.callback.as_ref() {
                    callback(task);
                }
                Ok(())
            }
            StatementKind::Throw(message) => {
                state.exception = Some(ScriptException::new(message.clone()).at(line, statement.column));
                Err(ErrorCode::ScriptException)
            }
            StatementKind::Fault(code) => raise_fault(*code),
        }
    }

    fn execute_program(
        &self,
        state: &mut EngineState,
        program: &[Instruction],
    ) -> EngineResult<()> {
        if state.exception.is_some() {
            return Err(ErrorCode::InExceptionState);
        }
        for instruction in program {
            self.execute(state, instruction.line, &instruction.statement)?;
        }
        Ok(())
    }
}

impl Default for ReferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineCapability for ReferenceEngine {
    fn create_runtime(
        &self,
        attributes: RuntimeAttributes,
    ) -> EngineResult<RuntimeHandle> {
        let mut state = self.state.lock();
        state.check_injected(Operation::CreateRuntime)?;
        let runtime = RuntimeHandle(state.next_handle());
        state.runtimes.insert(runtime, attributes);
        state
            .journal
            .push(format!("create_runtime({}, {:#x})", runtime.0, attributes.bits()));
        Ok(runtime)
    }

    fn dispose_runtime(
        &self,
        runtime: RuntimeHandle,
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.check_injected(Operation::DisposeRuntime)?;
        if !state.runtimes.contains_key(&runtime) {
            return Err(ErrorCode::InvalidArgument);
        }
        if let Some(current) = state.current {
            if state.contexts.get(&current).map(|c| c.runtime) == Some(runtime) {
                return Err(ErrorCode::RuntimeInUse);
            }
        }
        state.runtimes.shift_remove(&runtime);
        state.contexts.retain(|_, record| record.runtime != runtime);
        state.journal.push(format!("dispose_runtime({})", runtime.0));
        Ok(())
    }

    fn create_context(
        &self,
        runtime: RuntimeHandle,
    ) -> EngineResult<ContextRef> {
        let mut state = self.state.lock();
        state.check_injected(Operation::CreateContext)?;
        if !state.runtimes.contains_key(&runtime) {
            return Err(ErrorCode::InvalidArgument);
        }
        let context = ContextRef(state.next_handle());
        state.contexts.insert(
            context,
            ContextRecord {
                runtime,
                callback: None,
                tasks: HashMap::new(),
            },
        );
        state.journal.push(format!("create_context({})", context.0));
        Ok(context)
    }

    fn current_context(&self) -> EngineResult<Option<ContextRef>> {
        let state = self.state.lock();
        state.check_injected(Operation::GetCurrentContext)?;
        Ok(state.current)
    }

    fn set_current_context(
        &self,
        context: Option<ContextRef>,
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.check_injected(Operation::SetCurrentContext)?;
        if let Some(context) = context {
            if !state.contexts.contains_key(&context) {
                return Err(ErrorCode::InvalidArgument);
            }
        }
        state.current = context;
        let entry = match context {
            Some(context) => format!("set_current_context({})", context.0),
            None => "set_current_context(none)".to_string(),
        };
        state.journal.push(entry);
        Ok(())
    }

    fn serialize_script(
        &self,
        source: &str,
        buffer: Option<&mut [u8]>,
    ) -> EngineResult<usize> {
        let mut state = self.state.lock();
        state.check_injected(Operation::SerializeScript)?;
        state.current_record()?;
        let program = match parse(source) {
            Ok(program) => program,
            Err(exception) => {
                state.exception = Some(exception);
                return Err(ErrorCode::ScriptCompile);
            }
        };
        let encoded = encode(&program);
        match buffer {
            None => {
                if state.quirk == SerializeQuirk::ZeroLength {
                    return Ok(0);
                }
                Ok(encoded.len())
            }
            Some(buffer) => {
                if buffer.len() < encoded.len() {
                    return Err(ErrorCode::InvalidArgument);
                }
                buffer[..encoded.len()].copy_from_slice(&encoded);
                if state.quirk == SerializeQuirk::ShortFill {
                    return Ok(encoded.len().saturating_sub(1));
                }
                Ok(encoded.len())
            }
        }
    }

    fn run_script(
        &self,
        source: &str,
        source_context: SourceContext,
        source_url: &Path,
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.check_injected(Operation::RunScript)?;
        state.current_record()?;
        trace!(
            "running {} as source context {}",
            source_url.display(),
            source_context.0
        );
        state.journal.push(format!("run_script({})", source_context.0));
        let program = match parse(source) {
            Ok(program) => program,
            Err(exception) => {
                state.exception = Some(exception);
                return Err(ErrorCode::ScriptCompile);
            }
        };
        self.execute_program(&mut state, &program)
    }

    fn run_serialized_script(
        &self,
        _source: &str,
        bytecode: &[u8],
        source_context: SourceContext,
        source_url: &Path,
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.check_injected(Operation::RunSerializedScript)?;
        state.current_record()?;
        trace!(
            "running serialized {} as source context {}",
            source_url.display(),
            source_context.0
        );
        state
            .journal
            .push(format!("run_serialized_script({})", source_context.0));
        let program = decode(bytecode).ok_or(ErrorCode::BadSerializedScript)?;
        self.execute_program(&mut state, &program)
    }

    fn set_continuation_callback(
        &self,
        callback: Option<ContinuationCallback>,
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.check_injected(Operation::SetContinuationCallback)?;
        state.current_record()?.callback = callback;
        Ok(())
    }

    fn call_task(
        &self,
        task: TaskRef,
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.check_injected(Operation::CallTask)?;
        if state.exception.is_some() {
            return Err(ErrorCode::InExceptionState);
        }
        let (line, statement) = state
            .current_record()?
            .tasks
            .remove(&task)
            .ok_or(ErrorCode::InvalidArgument)?;
        self.execute(&mut state, line, &statement)
    }

    fn take_exception(&self) -> Option<ScriptException> {
        self.state.lock().exception.take()
    }
}

fn parse(source: &str) -> Result<Vec<Instruction>, ScriptException> {
    let mut program = Vec::new();
    for (index, text) in source.lines().enumerate() {
        let line = index as u32 + 1;
        let trimmed = text.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let column = (text.len() - trimmed.len()) as u32 + 1;
        let statement = parse_statement(trimmed.trim_end(), line, column, 0)?;
        program.push(Instruction { line, statement });
    }
    Ok(program)
}

fn parse_statement(
    text: &str,
    line: u32,
    column: u32,
    depth: usize,
) -> Result<Statement, ScriptException> {
    let (keyword, rest) = match text.find(char::is_whitespace) {
        Some(split) => (&text[..split], &text[split..]),
        None => (text, ""),
    };
    let argument = rest.trim_start();
    let argument_column = column + (text.len() - argument.len()) as u32;
    let kind = match keyword {
        "print" => StatementKind::Print(argument.to_string()),
        "throw" => StatementKind::Throw(argument.to_string()),
        "defer" => {
            if argument.is_empty() {
                return Err(ScriptException::new("defer needs a statement").at(line, column));
            }
            if depth >= MAX_DEFER_DEPTH {
                return Err(ScriptException::new(format!(
                    "defer nested deeper than {}",
                    MAX_DEFER_DEPTH
                ))
                .at(line, column));
            }
            StatementKind::Defer(Box::new(parse_statement(
                argument,
                line,
                argument_column,
                depth + 1,
            )?))
        }
        "fault" => {
            let code = u32::from_str_radix(argument.trim_start_matches("0x"), 16).map_err(|_| {
                ScriptException::new(format!("invalid fault code '{}'", argument))
                    .at(line, argument_column)
            })?;
            StatementKind::Fault(code)
        }
        other => {
            return Err(ScriptException::new(format!("unknown statement '{}'", other)).at(line, column));
        }
    };
    Ok(Statement { kind, column })
}

fn encode(program: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + program.len() * 16);
    out.extend_from_slice(&BYTECODE_MAGIC);
    out.push(BYTECODE_VERSION);
    out.extend_from_slice(&(program.len() as u32).to_le_bytes());
    for instruction in program {
        out.extend_from_slice(&instruction.line.to_le_bytes());
        encode_statement(&mut out, &instruction.statement);
    }
    out
}

fn encode_statement(
    out: &mut Vec<u8>,
    statement: &Statement,
) {
    out.extend_from_slice(&statement.column.to_le_bytes());
    match &statement.kind {
        StatementKind::Print(text) => {
            out.push(TAG_PRINT);
            encode_str(out, text);
        }
        StatementKind::Defer(inner) => {
            out.push(TAG_DEFER);
            encode_statement(out, inner);
        }
        StatementKind::Throw(text) => {
            out.push(TAG_THROW);
            encode_str(out, text);
        }
        StatementKind::Fault(code) => {
            out.push(TAG_FAULT);
            out.extend_from_slice(&code.to_le_bytes());
        }
    }
}

fn encode_str(
    out: &mut Vec<u8>,
    text: &str,
) {
    out.extend_from_slice(&(text.len() as u32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
}

/// Cursor over a byte code blob.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(
        &mut self,
        len: usize,
    ) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        let raw = self.take(4)?;
        Some(u32::from_le_bytes(raw.try_into().ok()?))
    }

    fn string(&mut self) -> Option<String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).ok()
    }
}

fn decode(bytes: &[u8]) -> Option<Vec<Instruction>> {
    let mut reader = Reader { bytes, pos: 0 };
    if reader.take(4)? != BYTECODE_MAGIC || reader.u8()? != BYTECODE_VERSION {
        return None;
    }
    let count = reader.u32()? as usize;
    let mut program = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let line = reader.u32()?;
        let statement = decode_statement(&mut reader, 0)?;
        program.push(Instruction { line, statement });
    }
    if reader.pos != bytes.len() {
        return None;
    }
    Some(program)
}

fn decode_statement(
    reader: &mut Reader<'_>,
    depth: usize,
) -> Option<Statement> {
    if depth > MAX_DEFER_DEPTH {
        return None;
    }
    let column = reader.u32()?;
    let kind = match reader.u8()? {
        TAG_PRINT => StatementKind::Print(reader.string()?),
        TAG_DEFER => StatementKind::Defer(Box::new(decode_statement(reader, depth + 1)?)),
        TAG_THROW => StatementKind::Throw(reader.string()?),
        TAG_FAULT => StatementKind::Fault(reader.u32()?),
        _ => return None,
    };
    Some(Statement { kind, column })
}
