//! Dedicated worker thread
//!
//! The whole engine sequence runs on one worker thread; the caller blocks on
//! it with no timeout. The fault boundary sits at the worker entry point.

use std::io::Write;
use std::panic;
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::fault::{self, FaultPolicy};
use super::script::ScriptSource;
use super::supervisor::{ExecutionSupervisor, InvocationMode};
use crate::engine::EngineCapability;
use crate::error::{ExecutionOutcome, HostError, HostResult};

/// Worker thread name.
pub const WORKER_NAME: &str = "scripthost-worker";

/// Default worker stack size (8 MiB).
pub const DEFAULT_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Worker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOptions {
    pub stack_size: usize,
    pub fault_policy: FaultPolicy,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            fault_policy: FaultPolicy::Terminate,
        }
    }
}

/// Run `script` on a fresh worker thread and wait for its outcome.
///
/// With [`FaultPolicy::Terminate`] a structured fault never returns here:
/// the process exits with the fault code.
pub fn run_on_worker(
    engine: Arc<dyn EngineCapability>,
    script: ScriptSource,
    mode: InvocationMode,
    options: WorkerOptions,
) -> HostResult<ExecutionOutcome> {
    debug!(
        "starting {} for {} in {} mode",
        WORKER_NAME,
        script.display_name(),
        mode.name()
    );
    let handle = thread::Builder::new()
        .name(WORKER_NAME.to_string())
        .stack_size(options.stack_size)
        .spawn(move || worker_main(engine.as_ref(), &script, mode, options.fault_policy))
        .map_err(|err| {
            debug!("failed to create worker thread: {}", err);
            HostError::io("failed to create worker thread", err)
        })?;

    match handle.join() {
        Ok(outcome) => Ok(outcome),
        Err(payload) => panic::resume_unwind(payload),
    }
}

fn worker_main(
    engine: &dyn EngineCapability,
    script: &ScriptSource,
    mode: InvocationMode,
    policy: FaultPolicy,
) -> ExecutionOutcome {
    let mut supervisor = ExecutionSupervisor::new(engine, mode);

    let outcome = match policy {
        FaultPolicy::Propagate => supervisor.run(script),
        FaultPolicy::Terminate | FaultPolicy::Report => {
            match fault::contain(|| supervisor.run(script)) {
                Ok(outcome) => outcome,
                Err(fault) => {
                    debug!("{} faulted in {:?}", WORKER_NAME, supervisor.state());
                    fault::report(fault);
                    if policy == FaultPolicy::Terminate {
                        fault::terminate(fault);
                    }
                    supervisor.mark_faulted(fault)
                }
            }
        }
    };

    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    outcome
}
