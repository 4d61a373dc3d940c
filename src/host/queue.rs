//! Continuation queue
//!
//! FIFO queue of deferred callbacks. The engine's continuation hook pushes
//! into it while tasks are being drained, so the lock is never held across a
//! task invocation.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::engine::{ContinuationCallback, TaskRef};

/// Where a task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum TaskSource {
    /// Promise reactions and other engine continuations.
    #[default]
    Continuation = 0,
}

impl TaskSource {
    #[inline]
    pub fn value(self) -> u32 {
        self as u32
    }
}

/// One pending continuation. Consumed exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    callback: TaskRef,
    source: TaskSource,
    sequence: u64,
}

impl Task {
    /// The engine function to call.
    #[inline]
    pub fn callback(&self) -> TaskRef {
        self.callback
    }

    #[inline]
    pub fn source(&self) -> TaskSource {
        self.source
    }

    /// Position in push order, starting at 0 for each queue.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    next_sequence: u64,
}

/// Shared FIFO of pending tasks.
///
/// Clones share the same queue, which is how the continuation hook and the
/// supervisor see the same tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    inner: Arc<Mutex<QueueState>>,
}

impl TaskQueue {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task for `callback`. Returns its sequence tag.
    pub fn push(
        &self,
        callback: TaskRef,
        source: TaskSource,
    ) -> u64 {
        let mut state = self.inner.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.tasks.push_back(Task {
            callback,
            source,
            sequence,
        });
        trace!("queued {:?} as task #{}", callback, sequence);
        sequence
    }

    /// Remove and return the oldest task.
    #[inline]
    pub fn pop_front(&self) -> Option<Task> {
        self.inner.lock().tasks.pop_front()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().tasks.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Invoke tasks in order until the queue is empty, including tasks pushed
    /// by the tasks themselves. Returns how many were invoked.
    ///
    /// The first error stops the drain; tasks behind the failing one stay queued.
    pub fn drain_once<E>(
        &self,
        mut invoke: impl FnMut(Task) -> Result<(), E>,
    ) -> Result<usize, E> {
        let mut invoked = 0;
        while let Some(task) = self.pop_front() {
            invoke(task)?;
            invoked += 1;
        }
        Ok(invoked)
    }

    /// A continuation hook that feeds this queue.
    pub fn continuation_callback(&self) -> ContinuationCallback {
        let queue = self.clone();
        Box::new(move |task| {
            queue.push(task, TaskSource::Continuation);
        })
    }
}
