//! Per-context scheduling state.
//!
//! Each context owns one lane. The lane state moves through
//!
//! ```text
//!   Idle --schedule--> Pending --trigger--> Running --pass done--> Idle
//!                                              |
//!                                          schedule
//!                                              v
//!                                         RunningRerun --pass done--> Pending
//! ```
//!
//! All transitions are compare-and-swap on a single atomic, so requests from
//! any thread race safely with a pass in progress.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::host::ExecutionContext;

/// A one-shot unit of work queued onto a context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The fixed per-context pass callback.
pub(super) type Trigger = Arc<dyn Fn() + Send + Sync + 'static>;

const IDLE: u8 = 0;
const PENDING: u8 = 1;
const RUNNING: u8 = 2;
const RUNNING_RERUN: u8 = 3;

/// What happened to a schedule request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// A new dispatch was posted to the host.
    Dispatched,

    /// A dispatch was already pending; this request rides along with it.
    Coalesced,

    /// A pass is running; one more dispatch follows when it finishes.
    AfterCurrentPass,
}

/// Outcome of trying to move a lane into a new state.
pub(super) enum Claim {
    /// The caller must post a dispatch.
    Post,
    /// Nothing to post.
    Done(Scheduled),
}

pub(super) struct Lane {
    state: AtomicU8,
    epoch: AtomicU64,
    dispatched: AtomicU64,
    passes: AtomicU64,
    jobs: Mutex<VecDeque<Job>>,
    host: RwLock<Option<Arc<dyn ExecutionContext>>>,
    trigger: RwLock<Option<Trigger>>,
}

impl Lane {
    pub(super) fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            epoch: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            passes: AtomicU64::new(0),
            jobs: Mutex::new(VecDeque::new()),
            host: RwLock::new(None),
            trigger: RwLock::new(None),
        }
    }

    /// Record a request.
    pub(super) fn claim(&self) -> Claim {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (next, outcome) = match current {
                IDLE => (PENDING, Claim::Post),
                RUNNING => (RUNNING_RERUN, Claim::Done(Scheduled::AfterCurrentPass)),
                _ => return Claim::Done(Scheduled::Coalesced),
            };
            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return outcome,
                Err(actual) => current = actual,
            }
        }
    }

    /// Move a pending lane to running. Fails if nothing is pending.
    pub(super) fn begin_pass(&self) -> bool {
        self.state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Leave the running state. Returns `true` if a rerun was requested, in
    /// which case the lane is left pending and the caller must post.
    pub(super) fn end_pass(&self) -> bool {
        self.passes.fetch_add(1, Ordering::Relaxed);
        match self
            .state
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => false,
            Err(RUNNING_RERUN) => {
                self.state.store(PENDING, Ordering::Release);
                true
            }
            Err(_) => false,
        }
    }

    /// Returns `true` if a dispatch is accepted but no pass has started.
    pub(super) fn is_awaiting_dispatch(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    /// Drop the pending request and every queued job.
    ///
    /// A running pass keeps the lane: it finishes and returns the lane to
    /// idle itself, so no second pass can start alongside it.
    pub(super) fn abandon(&self) -> usize {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                PENDING => IDLE,
                RUNNING_RERUN => RUNNING,
                _ => break,
            };
            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.clear_jobs()
    }

    /// Return the lane to idle after a pass unwound, dropping queued jobs.
    fn release(&self) -> usize {
        self.state.store(IDLE, Ordering::Release);
        self.clear_jobs()
    }

    fn clear_jobs(&self) -> usize {
        let mut jobs = self.jobs.lock();
        let dropped = jobs.len();
        jobs.clear();
        dropped
    }

    pub(super) fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }

    pub(super) fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub(super) fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub(super) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(super) fn push_job(&self, job: Job) {
        self.jobs.lock().push_back(job);
    }

    pub(super) fn take_jobs(&self) -> VecDeque<Job> {
        std::mem::take(&mut *self.jobs.lock())
    }

    pub(super) fn has_jobs(&self) -> bool {
        !self.jobs.lock().is_empty()
    }

    /// The current host and the epoch dispatches posted to it must carry.
    pub(super) fn host(&self) -> (Option<Arc<dyn ExecutionContext>>, u64) {
        let slot = self.host.read();
        (slot.clone(), self.epoch())
    }

    /// Swap the host. Dispatches posted to the previous host become stale.
    pub(super) fn replace_host(
        &self,
        host: Option<Arc<dyn ExecutionContext>>,
    ) -> Option<Arc<dyn ExecutionContext>> {
        let mut slot = self.host.write();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        std::mem::replace(&mut *slot, host)
    }

    pub(super) fn trigger(&self) -> Option<Trigger> {
        self.trigger.read().clone()
    }

    pub(super) fn set_trigger(&self, trigger: Trigger) {
        *self.trigger.write() = Some(trigger);
    }
}

/// Returns a lane to idle if a pass unwinds.
pub(super) struct PassGuard<'a> {
    lane: &'a Lane,
    armed: bool,
}

impl<'a> PassGuard<'a> {
    pub(super) fn new(lane: &'a Lane) -> Self {
        Self { lane, armed: true }
    }

    pub(super) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.lane.release();
        }
    }
}
