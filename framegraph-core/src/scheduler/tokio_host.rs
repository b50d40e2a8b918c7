//! Tokio Host
//!
//! Runs one context as a single tokio task fed over an unbounded channel.
//! The task processes dispatches one at a time, so the context stays
//! single-threaded even on a multi-threaded runtime.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::host::{Dispatch, ExecutionContext, HostClosed};

/// An execution context backed by a tokio task.
///
/// The context shuts down when the task is aborted or the last handle to
/// the context is dropped; later posts fail with [`HostClosed`].
#[derive(Debug)]
pub struct TokioContext {
    sender: mpsc::UnboundedSender<Dispatch>,
}

impl TokioContext {
    /// Spawn the context's task on `handle`.
    pub fn spawn(handle: &Handle, name: &'static str) -> (Arc<Self>, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Dispatch>();

        let task = handle.spawn(async move {
            debug!(context = name, "context task started");
            while let Some(dispatch) = receiver.recv().await {
                dispatch.run();
            }
            debug!(context = name, "context task stopped");
        });

        (Arc::new(Self { sender }), task)
    }

    /// Whether the context's task is gone.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl ExecutionContext for TokioContext {
    fn post(&self, dispatch: Dispatch) -> Result<(), HostClosed> {
        self.sender.send(dispatch).map_err(|_| HostClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ContextKind, Scheduler};
    use crate::GraphError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[tokio::test]
    async fn runs_dispatches_on_the_task() {
        let scheduler = Scheduler::new();
        let (render, _task) = TokioContext::spawn(&Handle::current(), "render");
        scheduler.attach(ContextKind::Render, render);

        let runs = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(Notify::new());
        {
            let runs = runs.clone();
            let done = done.clone();
            scheduler.set_trigger(ContextKind::Render, move || {
                runs.fetch_add(1, Ordering::SeqCst);
                done.notify_one();
            });
        }

        for _ in 0..16 {
            scheduler.schedule_on_render().unwrap();
        }
        done.notified().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.dispatches(ContextKind::Render), 1);
    }

    #[tokio::test]
    async fn aborted_task_makes_the_context_unavailable() {
        let scheduler = Scheduler::new();
        let (render, task) = TokioContext::spawn(&Handle::current(), "render");
        scheduler.attach(ContextKind::Render, render.clone());

        task.abort();
        let _ = task.await;
        assert!(render.is_closed());

        assert_eq!(
            scheduler.schedule_on_render(),
            Err(GraphError::SchedulingUnavailable(ContextKind::Render))
        );
        assert!(!scheduler.is_pending(ContextKind::Render));
    }
}
