//! Host configuration
//!
//! Resolved once, before any engine resource is touched.
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high -> low):
//! 1. CLI arguments
//! 2. Environment variables (SCRIPTHOST_LOG, SCRIPTHOST_WORKER_STACK)
//! 3. Default values
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::lock::DEFAULT_LOCK_NAME;
use crate::host::worker::{WorkerOptions, DEFAULT_STACK_SIZE};
use crate::host::{FaultPolicy, InvocationMode};
use crate::util::logger::LogLevel;

/// Log level override.
pub const ENV_LOG: &str = "SCRIPTHOST_LOG";
/// Worker stack size override, in bytes.
pub const ENV_WORKER_STACK: &str = "SCRIPTHOST_WORKER_STACK";

/// Fully resolved configuration for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub script: PathBuf,
    #[serde(default)]
    pub mode: InvocationMode,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub worker: WorkerOptions,
    #[serde(default = "default_lock_name")]
    pub lock_name: String,
}

fn default_lock_name() -> String {
    DEFAULT_LOCK_NAME.to_string()
}

/// What the command line asked for. Unset fields fall through to the
/// environment and then the defaults.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub script: PathBuf,
    pub serialized: bool,
    pub bytecode: Option<PathBuf>,
    pub header: Option<PathBuf>,
    pub emit_bytecode: Option<PathBuf>,
    pub verbose: bool,
    pub log_level: Option<LogLevel>,
    pub worker_stack_size: Option<usize>,
    pub crash_on_fault: bool,
}

/// Configuration errors. All of them are usage errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} cannot be combined with {1}")]
    ConflictingModes(&'static str, &'static str),

    #[error("{0} requires a non-empty path")]
    EmptyPath(&'static str),

    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: &'static str, value: String },
}

impl HostConfig {
    /// Resolve from the command line and the process environment.
    pub fn from_env(cli: &CliOverrides) -> Result<Self, ConfigError> {
        Self::resolve(cli, |key| std::env::var(key).ok())
    }

    /// Resolve from the command line and an environment lookup.
    pub fn resolve(
        cli: &CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if cli.script.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("FILE"));
        }

        Ok(Self {
            script: cli.script.clone(),
            mode: resolve_mode(cli)?,
            log_level: resolve_log_level(cli, &env)?,
            worker: WorkerOptions {
                stack_size: resolve_stack_size(cli, &env)?,
                fault_policy: if cli.crash_on_fault {
                    FaultPolicy::Propagate
                } else {
                    FaultPolicy::Terminate
                },
            },
            lock_name: default_lock_name(),
        })
    }

    /// Pretty JSON, as printed by `--print-config`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn resolve_mode(cli: &CliOverrides) -> Result<InvocationMode, ConfigError> {
    let mut selected: Vec<(&'static str, InvocationMode)> = Vec::new();

    if cli.serialized {
        selected.push(("--serialized", InvocationMode::Serialized));
    }
    if let Some(path) = &cli.bytecode {
        let bytecode = non_empty("--bytecode", path)?;
        selected.push(("--bytecode", InvocationMode::PreSerialized { bytecode }));
    }
    if let Some(path) = &cli.header {
        let output = non_empty("--generate-library-bytecode-header", path)?;
        selected.push((
            "--generate-library-bytecode-header",
            InvocationMode::EmitHeader { output },
        ));
    }
    if let Some(path) = &cli.emit_bytecode {
        let output = non_empty("--emit-bytecode", path)?;
        selected.push(("--emit-bytecode", InvocationMode::EmitBytecode { output }));
    }

    match selected.len() {
        0 => Ok(InvocationMode::Source),
        1 => Ok(selected.remove(0).1),
        _ => Err(ConfigError::ConflictingModes(selected[0].0, selected[1].0)),
    }
}

fn non_empty(
    flag: &'static str,
    path: &Path,
) -> Result<PathBuf, ConfigError> {
    if path.as_os_str().is_empty() {
        Err(ConfigError::EmptyPath(flag))
    } else {
        Ok(path.to_path_buf())
    }
}

fn resolve_log_level(
    cli: &CliOverrides,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<LogLevel, ConfigError> {
    if let Some(level) = cli.log_level {
        return Ok(level);
    }
    if cli.verbose {
        return Ok(LogLevel::Debug);
    }
    match env(ENV_LOG) {
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name: ENV_LOG,
            value,
        }),
        None => Ok(LogLevel::default()),
    }
}

fn resolve_stack_size(
    cli: &CliOverrides,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<usize, ConfigError> {
    if let Some(size) = cli.worker_stack_size {
        return positive("--worker-stack-size", size.to_string());
    }
    match env(ENV_WORKER_STACK) {
        Some(value) => positive(ENV_WORKER_STACK, value),
        None => Ok(DEFAULT_STACK_SIZE),
    }
}

fn positive(
    name: &'static str,
    value: String,
) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(ConfigError::InvalidValue { name, value }),
    }
}
