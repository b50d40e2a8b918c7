//! Host Execution Contexts
//!
//! The scheduler never runs work itself. For each accepted request it hands
//! a [`Dispatch`] to the host that owns the target context, and the host runs
//! it on that context's thread. Hosts are the only boundary between the core
//! and whatever thread-queue primitives the embedding framework provides.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use super::{ContextKind, Scheduler, Shared};

/// Returned by a host that can no longer accept work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("execution context is closed")]
pub struct HostClosed;

/// A single-threaded execution context that can run dispatches.
///
/// Implementations must run every accepted dispatch exactly once, on the
/// context's own thread, and must not run it inline inside `post`.
pub trait ExecutionContext: Send + Sync {
    /// Queue `dispatch` to run on this context.
    fn post(&self, dispatch: Dispatch) -> Result<(), HostClosed>;
}

/// One accepted trigger request.
///
/// Running it invokes the matching trigger on the scheduler. A dispatch
/// that outlives its scheduler, or whose host was detached after it was
/// posted, does nothing.
pub struct Dispatch {
    scheduler: Weak<Shared>,
    kind: ContextKind,
    epoch: u64,
}

impl Dispatch {
    pub(super) fn new(shared: &Arc<Shared>, kind: ContextKind, epoch: u64) -> Self {
        Self {
            scheduler: Arc::downgrade(shared),
            kind,
            epoch,
        }
    }

    /// The context this dispatch targets.
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Run the trigger. Call this on the target context's thread.
    pub fn run(self) {
        match self.scheduler.upgrade() {
            Some(shared) => Scheduler::from_shared(shared).trigger_dispatch(self.kind, self.epoch),
            None => trace!(context = %self.kind, "scheduler dropped, discarding dispatch"),
        }
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("kind", &self.kind)
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// A host that queues dispatches until its owner pumps them.
///
/// Useful for embedding into an existing event loop (call
/// [`ManualContext::run_pending`] once per loop iteration) and for tests.
#[derive(Debug, Default)]
pub struct ManualContext {
    queue: Mutex<VecDeque<Dispatch>>,
    closed: AtomicBool,
}

impl ManualContext {
    /// Create an open context.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of dispatches waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run the dispatches queued at the time of the call, in order.
    ///
    /// Dispatches posted while these run are left for the next call.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let count = self.pending();
        for _ in 0..count {
            // Pop one at a time so the lock is not held while the trigger runs.
            let Some(dispatch) = self.queue.lock().pop_front() else {
                return count;
            };
            dispatch.run();
        }
        count
    }

    /// Stop accepting dispatches and drop the queued ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.queue.lock().clear();
    }

    /// Whether [`ManualContext::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl ExecutionContext for ManualContext {
    fn post(&self, dispatch: Dispatch) -> Result<(), HostClosed> {
        if self.is_closed() {
            return Err(HostClosed);
        }
        self.queue.lock().push_back(dispatch);
        Ok(())
    }
}
