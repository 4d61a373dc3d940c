//! scripthost - CLI

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use scripthost::engine::EngineCapability;
use scripthost::error::{EXIT_HOST_ERROR, EXIT_USAGE};
use scripthost::host::{run_on_worker, EngineLock};
use scripthost::util::logger::{self, LogLevel};
use scripthost::{
    load_script, CliOverrides, ExecutionOutcome, HostConfig, OutputSink, ReferenceEngine, NAME,
    VERSION,
};
use tracing::debug;

/// Run a script in an embedded engine, or compile it to byte code
#[derive(Parser, Debug)]
#[command(name = "scripthost")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    /// Script file
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Serialize the script, then run the byte code in a fresh runtime
    #[arg(long)]
    serialized: bool,

    /// Run byte code serialized earlier from FILE's source
    #[arg(long, value_name = "BYTECODE")]
    bytecode: Option<PathBuf>,

    /// Write a C++ header embedding the script's byte code; do not run it
    #[arg(long, value_name = "PATH")]
    generate_library_bytecode_header: Option<PathBuf>,

    /// Write the script's raw byte code; do not run it
    #[arg(long, value_name = "PATH")]
    emit_bytecode: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Log level (debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Worker thread stack size in bytes
    #[arg(long, value_name = "BYTES")]
    worker_stack_size: Option<usize>,

    /// Let structured faults crash the process instead of containing them
    #[arg(long)]
    crash_on_fault: bool,

    /// Print the resolved configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            script: self.file.clone(),
            serialized: self.serialized,
            bytecode: self.bytecode.clone(),
            header: self.generate_library_bytecode_header.clone(),
            emit_bytecode: self.emit_bytecode.clone(),
            verbose: self.verbose,
            log_level: self.log_level,
            worker_stack_size: self.worker_stack_size,
            crash_on_fault: self.crash_on_fault,
        }
    }
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            std::process::exit(if err.use_stderr() { EXIT_USAGE } else { 0 });
        }
    };

    let code = match run(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ERROR: {:#}", err);
            EXIT_HOST_ERROR
        }
    };
    std::process::exit(code);
}

fn run(args: &Args) -> Result<i32> {
    let config = match HostConfig::from_env(&args.overrides()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ERROR: {}", err);
            return Ok(EXIT_USAGE);
        }
    };

    if args.print_config {
        println!("{}", config.to_json().context("Failed to print configuration")?);
        return Ok(0);
    }

    logger::init_with_level(config.log_level);
    debug!("{} version: {}", NAME, VERSION);
    debug!("Host: {}", std::env::consts::OS);

    let _lock = EngineLock::acquire(&config.lock_name)
        .with_context(|| format!("Failed to acquire {}", config.lock_name))?;

    let script = match load_script(&config.script) {
        Ok(script) => script,
        Err(err) => {
            let outcome = ExecutionOutcome::HostError(err.into());
            return Ok(finish(&config.script.display().to_string(), &outcome));
        }
    };
    let name = script.display_name();

    let engine: Arc<dyn EngineCapability> =
        Arc::new(ReferenceEngine::with_output(OutputSink::stdout()));
    let outcome = run_on_worker(engine, script, config.mode.clone(), config.worker)?;
    Ok(finish(&name, &outcome))
}

fn finish(
    script: &str,
    outcome: &ExecutionOutcome,
) -> i32 {
    if let Some(line) = outcome.diagnostic(script) {
        eprintln!("{}", line);
    }
    outcome.exit_code()
}
