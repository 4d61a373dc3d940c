//! scripthost
//!
//! A command-line host for an embedded scripting engine. The host owns the
//! engine runtime and context lifecycle, runs a script from source or from
//! serialized byte code, drains the engine's continuation tasks until the
//! program settles, and can emit compiled byte code as an embeddable C++
//! header.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use scripthost::host::{run_on_worker, InvocationMode, WorkerOptions};
//! use scripthost::{load_script, ReferenceEngine};
//!
//! let script = load_script(Path::new("hello.js")).unwrap();
//! let outcome = run_on_worker(
//!     Arc::new(ReferenceEngine::new()),
//!     script,
//!     InvocationMode::Source,
//!     WorkerOptions::default(),
//! )
//! .unwrap();
//! assert!(outcome.is_success());
//! ```

#![doc(html_root_url = "https://docs.rs/scripthost")]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod loader;

// Utility modules
pub mod util;

// Re-exports
pub use config::{CliOverrides, ConfigError, HostConfig};
pub use engine::{EngineCapability, ErrorCode, OutputSink, ReferenceEngine};
pub use error::{ExecutionOutcome, HostError, HostResult};
pub use loader::load_script;

/// Host version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Host name
pub const NAME: &str = host::HOST_NAME;
