//! Process-wide engine exclusivity token
//!
//! Only one holder may own the engine lock at a time. The binary acquires it
//! at startup and keeps it until exit.
//!
//! The token lives in this process's memory, so it excludes holders within
//! one process only. Separate `scripthost` processes do not see each other's
//! lock and may run side by side.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{HostError, HostResult};

/// Name used by the binary.
pub const DEFAULT_LOCK_NAME: &str = "scripthost.engine";

static ENGINE_LOCK: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// The global engine lock.
pub struct EngineLock;

impl EngineLock {
    /// Take the lock under `name`. Fails if anyone already holds it.
    pub fn acquire(name: &str) -> HostResult<EngineLockGuard> {
        let mut holder = ENGINE_LOCK.lock();
        if let Some(current) = holder.as_ref() {
            return Err(HostError::Lock(current.clone()));
        }
        *holder = Some(name.to_string());
        debug!("acquired engine lock '{}'", name);
        Ok(EngineLockGuard {
            name: name.to_string(),
            released: false,
        })
    }

    /// Name of the current holder, if any.
    pub fn holder() -> Option<String> {
        ENGINE_LOCK.lock().clone()
    }
}

/// Releases the engine lock when dropped.
#[derive(Debug)]
pub struct EngineLockGuard {
    name: String,
    released: bool,
}

impl EngineLockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release explicitly.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        *ENGINE_LOCK.lock() = None;
        debug!("released engine lock '{}'", self.name);
    }
}

impl Drop for EngineLockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
