//! Cross-Context Scheduler
//!
//! The scheduler marshals work between exactly two single-threaded
//! execution contexts, [`ContextKind::Control`] and [`ContextKind::Render`],
//! and coalesces requests so each context's trigger runs at most once per
//! coalescing window.
//!
//! # How It Works
//!
//! 1. A caller on any thread asks for a context's trigger to run
//!    ([`Scheduler::schedule_on_render`]), optionally queueing a one-shot job
//!    first ([`Scheduler::run_on_render`]).
//!
//! 2. If no dispatch is pending for that context, one is posted to the
//!    context's host. Otherwise the request is merged into the pending one.
//!
//! 3. The host runs the dispatch on its own thread. The pass drains the
//!    job queue in submission order, then calls the context's trigger.
//!
//! 4. When the pass finishes the pending flag is cleared. A request that
//!    arrived during the pass causes exactly one follow-up dispatch, so no
//!    work submitted mid-pass is lost.
//!
//! # Availability
//!
//! Hosts are attached per context. Scheduling against a context with no
//! host, or a host that refuses the dispatch, drops the request and its
//! queued jobs and returns [`GraphError::SchedulingUnavailable`].

mod host;
mod lane;
mod tokio_host;

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::{debug, trace, warn};

pub use host::{Dispatch, ExecutionContext, HostClosed, ManualContext};
pub use lane::{Job, Scheduled};
pub use tokio_host::TokioContext;

use lane::{Claim, Lane, PassGuard};

use crate::error::{GraphError, Result};

/// One of the two execution contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// Issues declarative updates, e.g. in response to external input.
    Control,

    /// Performs per-frame graph evaluation and owns graph mutation.
    Render,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContextKind::Control => "control",
            ContextKind::Render => "render",
        })
    }
}

pub(crate) struct Shared {
    control: Lane,
    render: Lane,
}

/// Coalescing dispatcher for the control and render contexts.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler with no hosts attached.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                control: Lane::new(),
                render: Lane::new(),
            }),
        }
    }

    fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// A handle that does not keep the scheduler alive.
    ///
    /// Triggers that need to schedule work should hold one of these, since
    /// the scheduler owns its triggers.
    pub fn downgrade(&self) -> WeakScheduler {
        WeakScheduler {
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn lane(&self, kind: ContextKind) -> &Lane {
        match kind {
            ContextKind::Control => &self.shared.control,
            ContextKind::Render => &self.shared.render,
        }
    }

    /// Attach the host that runs `kind`'s dispatches, returning the previous
    /// one.
    ///
    /// Dispatches posted to a previous host are discarded when they run.
    /// A request accepted but not yet run, and any jobs still queued, are
    /// carried over to the new host.
    pub fn attach(
        &self,
        kind: ContextKind,
        host: Arc<dyn ExecutionContext>,
    ) -> Option<Arc<dyn ExecutionContext>> {
        let lane = self.lane(kind);
        let previous = lane.replace_host(Some(host));
        debug!(context = %kind, replaced = previous.is_some(), "attached host");

        // A running pass is left to finish on the old host; its rerun, if
        // any, is posted to the new one.
        if previous.is_some() {
            if lane.is_awaiting_dispatch() {
                // The old host's dispatch is stale now. Failures are logged
                // and the request dropped by `post`.
                let _ = self.post(kind);
            } else if lane.has_jobs() {
                let _ = self.schedule(kind);
            }
        }
        previous
    }

    /// Tear down `kind`'s host. The pending request and queued jobs are
    /// dropped; later requests fail until a host is attached again. A pass
    /// already running still finishes.
    pub fn detach(&self, kind: ContextKind) -> Option<Arc<dyn ExecutionContext>> {
        let lane = self.lane(kind);
        let previous = lane.replace_host(None);
        let dropped = lane.abandon();
        debug!(context = %kind, dropped_jobs = dropped, "detached host");
        previous
    }

    /// Install the callback run once per pass on `kind`, after queued jobs.
    pub fn set_trigger<F>(&self, kind: ContextKind, trigger: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.lane(kind).set_trigger(Arc::new(trigger));
    }

    /// Request that `kind`'s trigger run.
    ///
    /// Idempotent while a dispatch is pending. Callable from any thread.
    pub fn schedule(&self, kind: ContextKind) -> Result<Scheduled> {
        match self.lane(kind).claim() {
            Claim::Post => self.post(kind).map(|()| Scheduled::Dispatched),
            Claim::Done(outcome) => {
                trace!(context = %kind, ?outcome, "request coalesced");
                Ok(outcome)
            }
        }
    }

    /// Request that the render trigger run.
    pub fn schedule_on_render(&self) -> Result<Scheduled> {
        self.schedule(ContextKind::Render)
    }

    /// Request that the control trigger run.
    pub fn schedule_on_control(&self) -> Result<Scheduled> {
        self.schedule(ContextKind::Control)
    }

    /// Queue `job` to run at the start of `kind`'s next pass and schedule
    /// that pass.
    pub fn run_on<F>(&self, kind: ContextKind, job: F) -> Result<Scheduled>
    where
        F: FnOnce() + Send + 'static,
    {
        self.lane(kind).push_job(Box::new(job));
        self.schedule(kind)
    }

    /// Queue `job` onto the render context.
    pub fn run_on_render<F>(&self, job: F) -> Result<Scheduled>
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_on(ContextKind::Render, job)
    }

    /// Queue `job` onto the control context.
    pub fn run_on_control<F>(&self, job: F) -> Result<Scheduled>
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_on(ContextKind::Control, job)
    }

    /// Entry point the render host invokes for an accepted request.
    pub fn trigger_render(&self) {
        self.trigger(ContextKind::Render);
    }

    /// Entry point the control host invokes for an accepted request.
    pub fn trigger_control(&self) {
        self.trigger(ContextKind::Control);
    }

    /// Whether a pass is pending or running on `kind`.
    pub fn is_pending(&self, kind: ContextKind) -> bool {
        self.lane(kind).is_pending()
    }

    /// Number of dispatches handed to `kind`'s host so far.
    pub fn dispatches(&self, kind: ContextKind) -> u64 {
        self.lane(kind).dispatched()
    }

    /// Number of completed passes on `kind`.
    pub fn passes(&self, kind: ContextKind) -> u64 {
        self.lane(kind).passes()
    }

    fn trigger_dispatch(&self, kind: ContextKind, epoch: u64) {
        if epoch != self.lane(kind).epoch() {
            trace!(context = %kind, epoch, "discarding dispatch from a previous host");
            return;
        }
        self.trigger(kind);
    }

    fn trigger(&self, kind: ContextKind) {
        let lane = self.lane(kind);
        if !lane.begin_pass() {
            debug!(context = %kind, "trigger without a pending dispatch, ignoring");
            return;
        }

        let guard = PassGuard::new(lane);
        let jobs = lane.take_jobs();
        trace!(context = %kind, jobs = jobs.len(), "running pass");
        for job in jobs {
            job();
        }
        if let Some(callback) = lane.trigger() {
            callback();
        }
        guard.disarm();

        if lane.end_pass() {
            trace!(context = %kind, "request arrived during pass, dispatching again");
            // A failure is logged and the request dropped by `post`.
            let _ = self.post(kind);
        }
    }

    fn post(&self, kind: ContextKind) -> Result<()> {
        let lane = self.lane(kind);
        let (host, epoch) = lane.host();
        let posted = match host {
            Some(host) => host.post(Dispatch::new(&self.shared, kind, epoch)).is_ok(),
            None => false,
        };

        if posted {
            lane.record_dispatch();
            trace!(context = %kind, epoch, "posted dispatch");
            Ok(())
        } else {
            let dropped = lane.abandon();
            warn!(context = %kind, dropped_jobs = dropped, "context unavailable, dropping request");
            Err(GraphError::SchedulingUnavailable(kind))
        }
    }
}

/// Non-owning handle to a [`Scheduler`].
#[derive(Debug, Clone)]
pub struct WeakScheduler {
    shared: Weak<Shared>,
}

impl WeakScheduler {
    /// The scheduler, if it is still alive.
    pub fn upgrade(&self) -> Option<Scheduler> {
        self.shared.upgrade().map(Scheduler::from_shared)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("control_pending", &self.is_pending(ContextKind::Control))
            .field("render_pending", &self.is_pending(ContextKind::Render))
            .field("control_passes", &self.passes(ContextKind::Control))
            .field("render_passes", &self.passes(ContextKind::Render))
            .finish()
    }
}
