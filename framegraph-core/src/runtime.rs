//! Frame Runtime
//!
//! The runtime connects the node graph to the scheduler. It is constructed
//! once by the process owner and handed by reference to everything that
//! needs to touch the graph.
//!
//! # How It Works
//!
//! 1. Control-side writers never touch nodes. [`FrameGraph::set_value`] and
//!    [`FrameGraph::with_graph`] queue a job onto the render context.
//!
//! 2. The render pass runs the queued jobs, settles every dirty node and
//!    publishes the values that changed into a snapshot.
//!
//! 3. The pass then hands a [`FrameReport`] to the control context, whose
//!    pass delivers it to every listener registered with
//!    [`FrameGraph::on_settled`].
//!
//! Control reads go through the snapshot ([`FrameGraph::settled`]), so they
//! only ever observe values produced by a completed render pass.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::error::{GraphError, Result};
use crate::graph::{NodeGraph, NodeId, Value};
use crate::scheduler::{ContextKind, Scheduled, Scheduler, WeakScheduler};

/// What one render pass settled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Render pass number, starting at 1.
    pub frame: u64,

    /// Nodes whose published value changed, with the new value.
    pub values: Vec<(NodeId, Value)>,

    /// Nodes dropped from the snapshot: removed, or left dirty by a failure.
    pub withdrawn: Vec<NodeId>,

    /// Errors raised by queued jobs and by evaluation during the pass.
    pub failures: Vec<GraphError>,
}

impl FrameReport {
    /// Returns `true` if the pass changed nothing and nothing failed.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.withdrawn.is_empty() && self.failures.is_empty()
    }
}

type Listener = Arc<dyn Fn(&FrameReport) + Send + Sync>;

struct Inner {
    /// Only locked on the render context.
    graph: Mutex<NodeGraph>,

    /// Values published by the last completed render pass.
    settled: RwLock<IndexMap<NodeId, Value>>,

    /// Errors raised by render jobs, reported with the next frame.
    job_failures: Mutex<Vec<GraphError>>,

    /// Reports waiting for the control pass.
    outbox: Mutex<VecDeque<FrameReport>>,

    listeners: RwLock<Vec<Listener>>,
    frames: AtomicU64,
}

/// Handle to the graph and its scheduler.
///
/// Cloning yields another handle to the same runtime.
#[derive(Clone)]
pub struct FrameGraph {
    scheduler: Scheduler,
    inner: Arc<Inner>,
}

impl FrameGraph {
    /// Take ownership of `graph` and install the render and control
    /// triggers on `scheduler`.
    pub fn new(scheduler: Scheduler, graph: NodeGraph) -> Self {
        let inner = Arc::new(Inner {
            graph: Mutex::new(graph),
            settled: RwLock::new(IndexMap::new()),
            job_failures: Mutex::new(Vec::new()),
            outbox: Mutex::new(VecDeque::new()),
            listeners: RwLock::new(Vec::new()),
            frames: AtomicU64::new(0),
        });

        let render_inner = Arc::downgrade(&inner);
        let render_scheduler = scheduler.downgrade();
        scheduler.set_trigger(ContextKind::Render, move || {
            render_pass(&render_inner, &render_scheduler);
        });

        let control_inner = Arc::downgrade(&inner);
        scheduler.set_trigger(ContextKind::Control, move || {
            control_pass(&control_inner);
        });

        Self { scheduler, inner }
    }

    /// The scheduler driving this runtime.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Set a leaf's value on the render context.
    ///
    /// The write and the invalidation of its dependents happen at the start
    /// of the next render pass. A missing or non-leaf node is reported in
    /// that pass's [`FrameReport::failures`].
    pub fn set_value(&self, id: NodeId, value: impl Into<Value>) -> Result<Scheduled> {
        let value = value.into();
        self.with_graph(move |graph| graph.set_value(id, value))
    }

    /// Run `job` against the graph on the render context.
    ///
    /// Use this for structural changes (creating, connecting and removing
    /// nodes). An error returned by `job` is reported with the next frame.
    pub fn with_graph<F>(&self, job: F) -> Result<Scheduled>
    where
        F: FnOnce(&mut NodeGraph) -> Result<()> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.scheduler.run_on_render(move || {
            let result = job(&mut inner.graph.lock());
            if let Err(err) = result {
                warn!(error = %err, "render job failed");
                inner.job_failures.lock().push(err);
            }
        })
    }

    /// Ask for a render pass without queueing any work.
    pub fn request_frame(&self) -> Result<Scheduled> {
        self.scheduler.schedule_on_render()
    }

    /// Value of `id` as of the last completed render pass.
    ///
    /// Fails with [`GraphError::NotSettled`] if no pass has published the
    /// node: it is unknown, removed, or still dirty after a failure.
    pub fn settled(&self, id: NodeId) -> Result<Value> {
        self.inner
            .settled
            .read()
            .get(&id)
            .copied()
            .ok_or(GraphError::NotSettled(id))
    }

    /// Every published value as of the last completed render pass.
    pub fn snapshot(&self) -> IndexMap<NodeId, Value> {
        self.inner.settled.read().clone()
    }

    /// Register a listener called on the control context for each frame
    /// report.
    pub fn on_settled<F>(&self, listener: F)
    where
        F: Fn(&FrameReport) + Send + Sync + 'static,
    {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    /// Number of completed render passes.
    pub fn frame(&self) -> u64 {
        self.inner.frames.load(Ordering::Acquire)
    }

    /// Borrow the graph directly.
    ///
    /// Only call this on the render context, or while no render pass can
    /// run; otherwise it blocks on the pass in progress.
    pub fn inspect<R>(&self, f: impl FnOnce(&NodeGraph) -> R) -> R {
        f(&self.inner.graph.lock())
    }
}

impl fmt::Debug for FrameGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameGraph")
            .field("frame", &self.frame())
            .field("published", &self.inner.settled.read().len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

fn render_pass(inner: &Weak<Inner>, scheduler: &WeakScheduler) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let mut report = FrameReport {
        failures: std::mem::take(&mut *inner.job_failures.lock()),
        ..FrameReport::default()
    };

    {
        let mut graph = inner.graph.lock();
        let settlement = graph.settle();
        report.failures.extend(settlement.failures);

        let mut settled = inner.settled.write();
        for id in graph.take_changes() {
            match graph.peek(id) {
                Ok(Some(value)) => {
                    if settled.insert(id, value) != Some(value) {
                        report.values.push((id, value));
                    }
                }
                // Removed, or dirty after a failed evaluation.
                Ok(None) | Err(_) => {
                    if settled.shift_remove(&id).is_some() {
                        report.withdrawn.push(id);
                    }
                }
            }
        }
        for id in graph.dirty_nodes() {
            if settled.shift_remove(&id).is_some() {
                report.withdrawn.push(id);
            }
        }
    }

    report.frame = inner.frames.fetch_add(1, Ordering::AcqRel) + 1;
    debug!(
        frame = report.frame,
        changed = report.values.len(),
        withdrawn = report.withdrawn.len(),
        failed = report.failures.len(),
        "render pass complete"
    );

    if report.is_empty() {
        return;
    }
    inner.outbox.lock().push_back(report);

    let Some(scheduler) = scheduler.upgrade() else {
        return;
    };
    if scheduler.schedule_on_control().is_err() {
        // Nobody left to deliver to.
        inner.outbox.lock().clear();
    }
}

fn control_pass(inner: &Weak<Inner>) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let reports: Vec<FrameReport> = inner.outbox.lock().drain(..).collect();
    let listeners: Vec<Listener> = inner.listeners.read().clone();
    trace!(reports = reports.len(), listeners = listeners.len(), "control pass");

    for report in &reports {
        for listener in &listeners {
            listener(report);
        }
    }
}
