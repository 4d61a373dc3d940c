//! Runtime and context lifetime
//!
//! Every acquisition is a guard: dropping a [`RuntimeGuard`] disposes the
//! runtime and dropping a [`ContextScope`] restores whichever context was
//! current before it was entered. Declare the runtime guard before the scope so
//! the context is always exited first.
//!
//! While the thread is unwinding from a structured fault the guards leave the
//! engine alone; the process is about to terminate and the engine state is
//! not trusted.

use std::thread;

use tracing::debug;

use super::check;
use crate::engine::{ContextRef, EngineCapability, Operation, RuntimeAttributes, RuntimeHandle};
use crate::error::HostResult;

/// Owns one runtime. Disposes it on drop unless already disposed.
pub struct RuntimeGuard<'e> {
    engine: &'e dyn EngineCapability,
    handle: RuntimeHandle,
    disposed: bool,
}

impl<'e> RuntimeGuard<'e> {
    pub fn handle(&self) -> RuntimeHandle {
        self.handle
    }

    /// Dispose now, surfacing the engine's answer.
    pub fn dispose(mut self) -> HostResult<()> {
        self.disposed = true;
        debug!("disposing {}", self.handle);
        check(
            self.engine,
            Operation::DisposeRuntime,
            self.engine.dispose_runtime(self.handle),
        )
    }
}

impl Drop for RuntimeGuard<'_> {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let handle = self.handle;
        if thread::panicking() {
            debug!("leaving {} undisposed while unwinding", handle);
            return;
        }
        if let Err(code) = self.engine.dispose_runtime(handle) {
            debug!("JsDisposeRuntime failed for {}. JsErrorCode={}", handle, code);
        }
    }
}

impl std::fmt::Debug for RuntimeGuard<'_> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RuntimeGuard")
            .field("handle", &self.handle)
            .field("disposed", &self.disposed)
            .finish()
    }
}

/// A context made current, remembering what was current before.
pub struct ContextScope<'e> {
    engine: &'e dyn EngineCapability,
    context: ContextRef,
    previous: Option<ContextRef>,
    active: bool,
}

impl<'e> ContextScope<'e> {
    pub fn context(&self) -> ContextRef {
        self.context
    }

    /// The context that was current when this scope was entered.
    pub fn previous(&self) -> Option<ContextRef> {
        self.previous
    }

    /// Restore the previous context now.
    pub fn exit(mut self) -> HostResult<()> {
        self.active = false;
        debug!("leaving {}, restoring {:?}", self.context, self.previous);
        check(
            self.engine,
            Operation::SetCurrentContext,
            self.engine.set_current_context(self.previous),
        )
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if thread::panicking() {
            debug!("leaving {} current while unwinding", self.context);
            return;
        }
        if let Err(code) = self.engine.set_current_context(self.previous) {
            debug!("JsSetCurrentContext failed restoring {:?}. JsErrorCode={}", self.previous, code);
        }
    }
}

impl std::fmt::Debug for ContextScope<'_> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ContextScope")
            .field("context", &self.context)
            .field("previous", &self.previous)
            .field("active", &self.active)
            .finish()
    }
}

/// A runtime with one context entered.
///
/// Field order matters: the scope drops before the runtime.
#[derive(Debug)]
pub struct ActiveContext<'e> {
    scope: ContextScope<'e>,
    runtime: RuntimeGuard<'e>,
}

impl<'e> ActiveContext<'e> {
    pub fn runtime(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn context(&self) -> ContextRef {
        self.scope.context()
    }

    /// Exit the context, then dispose the runtime. The first failure wins,
    /// but both steps always run.
    pub fn close(self) -> HostResult<()> {
        let ActiveContext { scope, runtime } = self;
        let exited = scope.exit();
        let disposed = runtime.dispose();
        exited.and(disposed)
    }
}

/// Creates runtimes and contexts and manages the current-context association.
#[derive(Clone, Copy)]
pub struct RuntimeContextManager<'e> {
    engine: &'e dyn EngineCapability,
}

impl<'e> RuntimeContextManager<'e> {
    pub fn new(engine: &'e dyn EngineCapability) -> Self {
        Self { engine }
    }

    pub fn create_runtime(
        &self,
        attributes: RuntimeAttributes,
    ) -> HostResult<RuntimeGuard<'e>> {
        let handle = check(
            self.engine,
            Operation::CreateRuntime,
            self.engine.create_runtime(attributes),
        )?;
        debug!("created {} with attributes {:#x}", handle, attributes.bits());
        Ok(RuntimeGuard {
            engine: self.engine,
            handle,
            disposed: false,
        })
    }

    pub fn create_context(
        &self,
        runtime: &RuntimeGuard<'_>,
    ) -> HostResult<ContextRef> {
        check(
            self.engine,
            Operation::CreateContext,
            self.engine.create_context(runtime.handle()),
        )
    }

    /// Make `context` current, capturing the previous one (possibly none).
    pub fn enter_context(
        &self,
        context: ContextRef,
    ) -> HostResult<ContextScope<'e>> {
        let previous = check(
            self.engine,
            Operation::GetCurrentContext,
            self.engine.current_context(),
        )?;
        check(
            self.engine,
            Operation::SetCurrentContext,
            self.engine.set_current_context(Some(context)),
        )?;
        debug!("entered {}, previous {:?}", context, previous);
        Ok(ContextScope {
            engine: self.engine,
            context,
            previous,
            active: true,
        })
    }

    pub fn exit_context(
        &self,
        scope: ContextScope<'e>,
    ) -> HostResult<()> {
        scope.exit()
    }

    pub fn dispose_runtime(
        &self,
        runtime: RuntimeGuard<'e>,
    ) -> HostResult<()> {
        runtime.dispose()
    }

    /// Create a runtime and a context and enter it.
    pub fn open(
        &self,
        attributes: RuntimeAttributes,
    ) -> HostResult<ActiveContext<'e>> {
        let runtime = self.create_runtime(attributes)?;
        let context = self.create_context(&runtime)?;
        let scope = self.enter_context(context)?;
        Ok(ActiveContext { scope, runtime })
    }
}
