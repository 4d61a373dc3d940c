//! Execution supervisor
//!
//! Runs one script to quiescence:
//!
//! ```text
//! Idle -> RuntimeReady -> ContextEntered -+-> Compiling -> Finished      (emit header / byte code)
//!                                         |      `------> Running         (transient: fresh runtime)
//!                                         `-> Running -> Draining -> Finished
//!
//! any non-Idle state --(structured fault)--> Faulted
//! ```
//!
//! Leaving `ContextEntered`, `Running` or `Draining` always exits the context
//! and then disposes the runtime, except after a fault.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::bytecode::{BytecodeBuffer, BytecodeCache};
use super::check;
use super::context::RuntimeContextManager;
use super::fault::StructuredFault;
use super::queue::TaskQueue;
use super::script::{next_source_context, ScriptSource};
use crate::engine::{EngineCapability, Operation, RuntimeAttributes};
use crate::error::{ExecutionOutcome, HostError, HostResult, OutcomeKind};

/// How the script is to be handled. Exactly one per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InvocationMode {
    /// Compile and run the source text.
    #[default]
    Source,
    /// Run byte code serialized earlier.
    PreSerialized { bytecode: PathBuf },
    /// Serialize, then run the byte code in a second, fresh runtime.
    Serialized,
    /// Serialize and write a generated header. The script is not run.
    EmitHeader { output: PathBuf },
    /// Serialize and write the raw byte code. The script is not run.
    EmitBytecode { output: PathBuf },
}

impl InvocationMode {
    /// Attributes for runtimes created in this mode.
    pub fn runtime_attributes(&self) -> RuntimeAttributes {
        match self {
            InvocationMode::EmitHeader { .. } => {
                RuntimeAttributes::ALLOW_SCRIPT_INTERRUPT
                    | RuntimeAttributes::SERIALIZE_LIBRARY_BYTECODE
            }
            _ => RuntimeAttributes::ALLOW_SCRIPT_INTERRUPT,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InvocationMode::Source => "source",
            InvocationMode::PreSerialized { .. } => "pre-serialized",
            InvocationMode::Serialized => "serialized",
            InvocationMode::EmitHeader { .. } => "emit-header",
            InvocationMode::EmitBytecode { .. } => "emit-bytecode",
        }
    }
}

/// Supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    RuntimeReady,
    ContextEntered,
    Compiling,
    Running,
    Draining,
    Finished(OutcomeKind),
    Faulted,
}

/// Drives one script run through the engine.
pub struct ExecutionSupervisor<'e> {
    engine: &'e dyn EngineCapability,
    mode: InvocationMode,
    state: SupervisorState,
    history: Vec<SupervisorState>,
    tasks_invoked: usize,
    drain_passes: usize,
}

impl<'e> ExecutionSupervisor<'e> {
    pub fn new(
        engine: &'e dyn EngineCapability,
        mode: InvocationMode,
    ) -> Self {
        Self {
            engine,
            mode,
            state: SupervisorState::Idle,
            history: vec![SupervisorState::Idle],
            tasks_invoked: 0,
            drain_passes: 0,
        }
    }

    pub fn mode(&self) -> &InvocationMode {
        &self.mode
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Every state visited, in order.
    pub fn history(&self) -> &[SupervisorState] {
        &self.history
    }

    /// Continuations invoked while draining.
    pub fn tasks_invoked(&self) -> usize {
        self.tasks_invoked
    }

    /// Full drain passes made before the queue settled.
    pub fn drain_passes(&self) -> usize {
        self.drain_passes
    }

    /// Run `script` and report the outcome.
    ///
    /// A structured fault raised by the engine unwinds out of this call; the
    /// worker boundary catches it and calls [`mark_faulted`](Self::mark_faulted).
    pub fn run(
        &mut self,
        script: &ScriptSource,
    ) -> ExecutionOutcome {
        let result = if self.state == SupervisorState::Idle {
            self.execute(script)
        } else {
            Err(HostError::invariant(format!(
                "supervisor started from {:?}",
                self.state
            )))
        };
        let outcome = ExecutionOutcome::from(result);
        self.transition(SupervisorState::Finished(outcome.kind()));
        info!("{} finished: {:?}", script.display_name(), outcome.kind());
        outcome
    }

    /// Record a fault caught at the boundary. Terminal.
    pub fn mark_faulted(
        &mut self,
        fault: StructuredFault,
    ) -> ExecutionOutcome {
        self.transition(SupervisorState::Faulted);
        ExecutionOutcome::Fault { code: fault.code }
    }

    fn transition(
        &mut self,
        next: SupervisorState,
    ) {
        debug!("supervisor {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn execute(
        &mut self,
        script: &ScriptSource,
    ) -> HostResult<()> {
        let manager = RuntimeContextManager::new(self.engine);
        let attributes = self.mode.runtime_attributes();

        let runtime = manager.create_runtime(attributes)?;
        self.transition(SupervisorState::RuntimeReady);
        let context = manager.create_context(&runtime)?;
        let scope = manager.enter_context(context)?;
        self.transition(SupervisorState::ContextEntered);

        let result = self.dispatch(script);

        let exited = scope.exit();
        let disposed = runtime.dispose();
        result.and(exited).and(disposed)
    }

    fn dispatch(
        &mut self,
        script: &ScriptSource,
    ) -> HostResult<()> {
        let full_path = script.full_path()?;
        let cache = BytecodeCache::new(self.engine);

        match self.mode.clone() {
            InvocationMode::Source => self.run_script(script, &full_path, None),
            InvocationMode::PreSerialized { bytecode } => {
                script.require_utf8("Pre-serialized byte code")?;
                let buffer = BytecodeBuffer::read_from(&bytecode)?;
                self.run_script(script, &full_path, Some(&buffer))
            }
            InvocationMode::Serialized => {
                script.require_utf8("Serialized flag")?;
                self.transition(SupervisorState::Compiling);
                let buffer = cache.serialize(&script.text)?;
                self.run_in_fresh_runtime(script, &full_path, &buffer)
            }
            InvocationMode::EmitHeader { output } => {
                script.require_utf8("GenerateLibraryByteCodeHeader flag")?;
                let symbol = script.library_name()?;
                self.transition(SupervisorState::Compiling);
                cache.emit_header(script, &output, &symbol)
            }
            InvocationMode::EmitBytecode { output } => {
                script.require_utf8("Byte code emission")?;
                self.transition(SupervisorState::Compiling);
                cache.emit_bytecode(&script.text, &output)
            }
        }
    }

    /// Byte code compiled in one runtime runs in another.
    fn run_in_fresh_runtime(
        &mut self,
        script: &ScriptSource,
        full_path: &Path,
        buffer: &BytecodeBuffer,
    ) -> HostResult<()> {
        let manager = RuntimeContextManager::new(self.engine);
        let active = manager.open(self.mode.runtime_attributes())?;
        debug!(
            "running serialized byte code in {} / {}",
            active.runtime(),
            active.context()
        );
        let result = self.run_script(script, full_path, Some(buffer));
        result.and(active.close())
    }

    /// Run from source or byte code, then drain continuations.
    ///
    /// Draining happens even when the run itself failed; the run's error
    /// takes precedence over any drain error.
    fn run_script(
        &mut self,
        script: &ScriptSource,
        full_path: &Path,
        bytecode: Option<&BytecodeBuffer>,
    ) -> HostResult<()> {
        let queue = TaskQueue::new();
        check(
            self.engine,
            Operation::SetContinuationCallback,
            self.engine
                .set_continuation_callback(Some(queue.continuation_callback())),
        )?;

        self.transition(SupervisorState::Running);
        let source_context = next_source_context();
        let ran = match bytecode {
            Some(buffer) => check(
                self.engine,
                Operation::RunSerializedScript,
                self.engine.run_serialized_script(
                    &script.text,
                    buffer.as_bytes(),
                    source_context,
                    full_path,
                ),
            ),
            None => check(
                self.engine,
                Operation::RunScript,
                self.engine
                    .run_script(&script.text, source_context, full_path),
            ),
        };
        if let Err(err) = &ran {
            debug!("{}: {}", script.display_name(), err);
        }

        self.transition(SupervisorState::Draining);
        let drained = self.drain(&queue);
        if let Err(err) = &drained {
            debug!("{}: draining stopped: {}", script.display_name(), err);
        }

        if let Err(code) = self.engine.set_continuation_callback(None) {
            debug!("clearing continuation callback failed. JsErrorCode={}", code);
        }
        if !queue.is_empty() {
            debug!("{} continuation(s) left undrained", queue.len());
        }

        ran.and(drained)
    }

    /// Process everything, then check for emptiness, until a pass adds nothing.
    fn drain(
        &mut self,
        queue: &TaskQueue,
    ) -> HostResult<()> {
        let engine = self.engine;
        loop {
            self.drain_passes += 1;
            let mut invoked = 0;
            let pass: HostResult<usize> = queue.drain_once(|task| {
                check(engine, Operation::CallTask, engine.call_task(task.callback()))?;
                invoked += 1;
                Ok(())
            });
            self.tasks_invoked += invoked;
            pass?;
            if queue.is_empty() {
                return Ok(());
            }
        }
    }
}
