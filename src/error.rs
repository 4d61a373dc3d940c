//! Host errors and the externally observable run outcome

use thiserror::Error;

use crate::engine::{ErrorCode, Operation, ScriptException};

/// Host result
pub type HostResult<T> = Result<T, HostError>;

/// Exit code for missing or invalid invocation arguments.
pub const EXIT_USAGE: i32 = 1;
/// Exit code for engine, invariant and I/O failures.
pub const EXIT_HOST_ERROR: i32 = 2;
/// Exit code for a script that raised an exception.
pub const EXIT_SCRIPT_ERROR: i32 = 3;

/// Host errors
#[derive(Debug, Error)]
pub enum HostError {
    /// An engine call returned something other than success.
    #[error("{operation} failed. JsErrorCode={code}")]
    Engine { operation: Operation, code: ErrorCode },

    /// An internal contract was broken. This is a defect, never a user error.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Encoding(String),

    /// The script raised an exception (compile or run time).
    #[error("{operation} failed. JsErrorCode={code}")]
    Script {
        operation: Operation,
        code: ErrorCode,
        exception: Option<ScriptException>,
    },

    #[error("Engine lock '{0}' is already held")]
    Lock(String),
}

impl HostError {
    pub fn io(
        context: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        HostError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        HostError::InvariantViolation(message.into())
    }
}

/// Which kind of outcome a run produced, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    ScriptError,
    HostError,
    Fault,
}

/// Result of one script run.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Success,
    ScriptError {
        operation: Operation,
        code: ErrorCode,
        exception: Option<ScriptException>,
    },
    HostError(HostError),
    /// An uncaught structured fault. The process must terminate with `code`.
    Fault { code: u32 },
}

impl ExecutionOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            ExecutionOutcome::Success => OutcomeKind::Success,
            ExecutionOutcome::ScriptError { .. } => OutcomeKind::ScriptError,
            ExecutionOutcome::HostError(_) => OutcomeKind::HostError,
            ExecutionOutcome::Fault { .. } => OutcomeKind::Fault,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionOutcome::Success => 0,
            ExecutionOutcome::ScriptError { .. } => EXIT_SCRIPT_ERROR,
            ExecutionOutcome::HostError(_) => EXIT_HOST_ERROR,
            ExecutionOutcome::Fault { code } => *code as i32,
        }
    }

    /// The single diagnostic line for a non-fatal failure.
    ///
    /// Script errors read `ERROR: <operation> failed: <script>(<line>, <column>): <message> [<name>]`.
    pub fn diagnostic(
        &self,
        script: &str,
    ) -> Option<String> {
        match self {
            ExecutionOutcome::Success | ExecutionOutcome::Fault { .. } => None,
            ExecutionOutcome::ScriptError {
                operation,
                code,
                exception: Some(exception),
            } => Some(format!(
                "ERROR: {} failed: {}{} [{}]",
                operation,
                script,
                exception,
                code.name()
            )),
            ExecutionOutcome::ScriptError {
                operation,
                code,
                exception: None,
            } => Some(format!("ERROR: {} failed: {} [{}]", operation, script, code.name())),
            ExecutionOutcome::HostError(err) => Some(format!("ERROR: {}", err)),
        }
    }
}

impl From<HostError> for ExecutionOutcome {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Script {
                operation,
                code,
                exception,
            } => ExecutionOutcome::ScriptError {
                operation,
                code,
                exception,
            },
            other => ExecutionOutcome::HostError(other),
        }
    }
}

impl From<HostResult<()>> for ExecutionOutcome {
    fn from(result: HostResult<()>) -> Self {
        match result {
            Ok(()) => ExecutionOutcome::Success,
            Err(err) => err.into(),
        }
    }
}
