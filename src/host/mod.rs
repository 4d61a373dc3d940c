//! Script execution host
//!
//! Drives one script through the engine: runtime/context lifetime, optional
//! byte-code production, the run itself, and draining continuations until the
//! program is quiescent.
//!
//! # Architecture
//!
//! ```text
//!  main thread              worker thread
//!  -----------              -------------
//!  EngineLock::acquire
//!  run_on_worker  ------>   fault::contain
//!      | (join)                 |
//!      |                    ExecutionSupervisor
//!      |                     |-- RuntimeContextManager (runtime + context guards)
//!      |                     |-- BytecodeCache          (size query, fill, render)
//!      |                     `-- TaskQueue              (continuations, drain)
//!      v
//!  ExecutionOutcome
//! ```

pub mod bytecode;
pub mod context;
pub mod fault;
pub mod lock;
pub mod queue;
pub mod script;
pub mod supervisor;
pub mod worker;

pub use bytecode::{render_embeddable_source, write_embeddable_source, BytecodeBuffer, BytecodeCache};
pub use context::{ActiveContext, ContextScope, RuntimeContextManager, RuntimeGuard};
pub use fault::{raise_fault, FaultPolicy, StructuredFault};
pub use lock::{EngineLock, EngineLockGuard};
pub use queue::{Task, TaskQueue, TaskSource};
pub use script::{next_source_context, ScriptSource};
pub use supervisor::{ExecutionSupervisor, InvocationMode, SupervisorState};
pub use worker::{run_on_worker, WorkerOptions};

use tracing::debug;

use crate::engine::{EngineCapability, EngineResult, Operation};
use crate::error::{HostError, HostResult};

/// Host identity used in fatal diagnostics.
pub const HOST_NAME: &str = "scripthost";

/// Convert an engine result into a host result, logging failures by name.
///
/// Script-category codes pick up the engine's pending exception so the
/// caller can report it with its location.
pub(crate) fn check<T>(
    engine: &dyn EngineCapability,
    operation: Operation,
    result: EngineResult<T>,
) -> HostResult<T> {
    result.map_err(|code| {
        debug!(
            "{} failed. JsErrorCode={:#x} ({})",
            operation,
            code.code(),
            code.name()
        );
        if code.is_script_error() {
            HostError::Script {
                operation,
                code,
                exception: engine.take_exception(),
            }
        } else {
            HostError::Engine { operation, code }
        }
    })
}
