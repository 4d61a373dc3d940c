//! Structured fault boundary
//!
//! A structured fault is an abnormal condition raised from inside an engine
//! call, distinct from an error return. It unwinds as a panic carrying a
//! [`StructuredFault`] payload and is caught once, at the worker entry point.
//! Nothing resumes after a fault: the outcome is terminal and the process
//! exits with the fault code.

use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::HOST_NAME;

/// Code reported for panics that carry no fault code.
pub const UNCATEGORIZED_FAULT_CODE: u32 = 0xE000_0001;

/// A fault with its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructuredFault {
    pub code: u32,
}

impl std::fmt::Display for StructuredFault {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "structured fault {:#x}", self.code)
    }
}

/// What the boundary does with a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultPolicy {
    /// Report it and terminate the process with the fault code.
    #[default]
    Terminate,
    /// Report it and hand back a `Fault` outcome. Used when embedding the host.
    Report,
    /// Do not intercept; let the fault crash the process.
    Propagate,
}

/// Raise a structured fault from inside an engine call.
pub fn raise_fault(code: u32) -> ! {
    install_hook();
    panic::panic_any(StructuredFault { code })
}

/// Keep the default panic report quiet for structured faults; they are
/// reported once by the boundary.
pub fn install_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<StructuredFault>().is_none() {
                previous(info);
            }
        }));
    });
}

/// Run `body`, converting any fault it raises into an `Err`.
pub fn contain<T>(body: impl FnOnce() -> T) -> Result<T, StructuredFault> {
    install_hook();
    panic::catch_unwind(AssertUnwindSafe(body)).map_err(categorize)
}

fn categorize(payload: Box<dyn Any + Send>) -> StructuredFault {
    if let Some(fault) = payload.downcast_ref::<StructuredFault>() {
        return *fault;
    }
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    debug!("uncategorized fault: {}", message);
    StructuredFault {
        code: UNCATEGORIZED_FAULT_CODE,
    }
}

/// Print the fatal diagnostic for `fault` and flush the standard streams.
pub fn report(fault: StructuredFault) {
    let _ = std::io::stdout().flush();
    let mut err = std::io::stderr().lock();
    let _ = writeln!(
        err,
        "FATAL ERROR: {} failed due to fault code {:x}",
        HOST_NAME, fault.code
    );
    let _ = err.flush();
}

/// End the process with the fault code, skipping all remaining teardown.
pub fn terminate(fault: StructuredFault) -> ! {
    std::process::exit(fault.code as i32)
}
