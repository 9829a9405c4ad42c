//! Update Scheduler
//!
//! The scheduler batches deferred work into flush passes.
//!
//! # Algorithm
//!
//! 1. [`Runtime::queue_job`] inserts a job into the main queue, keeping it
//!    sorted by job ID, unless the same job is already waiting.
//! 2. Queueing requests a flush. At most one flush is pending at a time; the
//!    host learns about it through the flush hook, or simply awaits
//!    [`Runtime::next_tick`].
//! 3. A flush walks the queue by index in ascending ID order. Jobs queued
//!    while the pass is running land after the current position, so they
//!    still run in this pass. Inactive jobs are skipped at dequeue time.
//! 4. After the main queue drains, post-flush callbacks run once each,
//!    sorted by ID.
//! 5. If either queue refilled, the pass repeats.
//!
//! A job that keeps re-queueing itself is cut off after
//! [`RuntimeConfig::recursion_limit`](crate::RuntimeConfig::recursion_limit)
//! runs within one top-level flush.

mod job;
mod tick;

use std::collections::HashMap;
use std::rc::Rc;
use std::task::Waker;

use tracing::{debug, trace};

pub use job::Job;
pub use tick::NextTick;

use crate::error::ReactiveError;
use crate::reactive::Runtime;

/// Per-flush execution counts, keyed by job identity.
type RecursionCounts = HashMap<usize, (Job, usize)>;

/// Queue state owned by a runtime.
#[derive(Default)]
pub(crate) struct SchedulerState {
    queue: Vec<Job>,
    flush_index: usize,
    pending_post: Vec<Job>,
    active_post: Option<Vec<Job>>,
    post_index: usize,
    flushing: bool,
    flush_pending: bool,
    waiters: Vec<Waker>,
    flush_hook: Option<Rc<dyn Fn(&Runtime)>>,
}

impl SchedulerState {
    /// Lower-bound position for `key`, never before the running job.
    fn find_insertion_index(&self, key: u64) -> usize {
        let mut start = if self.flushing { self.flush_index + 1 } else { 0 };
        start = start.min(self.queue.len());
        let mut end = self.queue.len();
        while start < end {
            let middle = (start + end) / 2;
            if self.queue[middle].order_key() < key {
                start = middle + 1;
            } else {
                end = middle;
            }
        }
        start
    }

    fn is_queued(&self, job: &Job) -> bool {
        let mut start = if self.flushing { self.flush_index } else { 0 };
        if self.flushing && job.allows_recurse() {
            start += 1;
        }
        self.queue
            .get(start.min(self.queue.len())..)
            .is_some_and(|rest| rest.iter().any(|queued| queued.ptr_eq(job)))
    }

    fn is_post_active(&self, job: &Job) -> bool {
        let Some(active) = &self.active_post else {
            return false;
        };
        let start = if job.allows_recurse() {
            self.post_index + 1
        } else {
            self.post_index
        };
        active
            .get(start.min(active.len())..)
            .is_some_and(|rest| rest.iter().any(|queued| queued.ptr_eq(job)))
    }

    /// Drop everything queued. Returns the jobs and waiters for the caller to
    /// release outside the borrow.
    pub(crate) fn reset(&mut self) -> (Vec<Job>, Vec<Waker>) {
        let mut dropped = std::mem::take(&mut self.queue);
        dropped.append(&mut self.pending_post);
        self.flush_pending = false;
        (dropped, std::mem::take(&mut self.waiters))
    }
}

impl Runtime {
    /// Queue a job for the next flush.
    ///
    /// A job already waiting in the queue is not added twice. While a flush
    /// is running, the job is inserted after the current position so that it
    /// runs in the same pass.
    pub fn queue_job(&self, job: Job) {
        {
            let mut state = self.inner.scheduler.borrow_mut();
            if state.is_queued(&job) {
                return;
            }
            if job.id().is_none() {
                state.queue.push(job);
            } else {
                let index = state.find_insertion_index(job.order_key());
                state.queue.insert(index, job);
            }
        }
        self.queue_flush();
    }

    /// Queue a callback to run after the main queue of the next flush.
    pub fn queue_post_flush_cb(&self, job: Job) {
        {
            let mut state = self.inner.scheduler.borrow_mut();
            if state.is_post_active(&job) {
                return;
            }
            state.pending_post.push(job);
        }
        self.queue_flush();
    }

    /// Install a callback invoked whenever a flush becomes pending.
    ///
    /// Hosts with their own event loop use this to schedule a call to
    /// [`flush_pending`](Runtime::flush_pending).
    pub fn set_flush_hook(&self, hook: impl Fn(&Runtime) + 'static) {
        self.inner.scheduler.borrow_mut().flush_hook = Some(Rc::new(hook));
    }

    /// Whether a flush pass is running right now.
    pub fn is_flushing(&self) -> bool {
        self.inner.scheduler.borrow().flushing
    }

    /// Whether a flush has been requested and not yet started.
    pub fn has_pending_flush(&self) -> bool {
        self.inner.scheduler.borrow().flush_pending
    }

    /// Number of jobs waiting in the main queue.
    pub fn queued_jobs(&self) -> usize {
        self.inner.scheduler.borrow().queue.len()
    }

    /// Run the pending flush now. Returns `false` if nothing was pending or
    /// a flush is already running.
    pub fn flush_pending(&self) -> bool {
        {
            let state = self.inner.scheduler.borrow();
            if state.flushing || !state.flush_pending {
                return false;
            }
        }
        let mut seen = RecursionCounts::new();
        self.flush_jobs(&mut seen);
        true
    }

    /// A future that resolves once the pending or running flush is done.
    pub fn next_tick(&self) -> NextTick {
        NextTick::new(self.clone())
    }

    /// Run `f` after the pending flush and resolve to its result.
    pub async fn next_tick_then<R>(&self, f: impl FnOnce() -> R) -> R {
        self.next_tick().await;
        f()
    }

    fn queue_flush(&self) {
        let hook = {
            let mut state = self.inner.scheduler.borrow_mut();
            if state.flushing || state.flush_pending {
                return;
            }
            state.flush_pending = true;
            state.flush_hook.clone()
        };
        trace!("flush requested");
        if let Some(hook) = hook {
            hook(self);
        }
    }

    fn flush_jobs(&self, seen: &mut RecursionCounts) {
        loop {
            let queued = {
                let mut state = self.inner.scheduler.borrow_mut();
                state.flush_pending = false;
                state.flushing = true;
                state.flush_index = 0;
                // Stable: jobs without an ID keep their queue order.
                state.queue.sort_by_key(Job::order_key);
                state.queue.len()
            };
            debug!(jobs = queued, "flushing scheduler queue");

            loop {
                let job = {
                    let state = self.inner.scheduler.borrow();
                    match state.queue.get(state.flush_index) {
                        Some(job) => job.clone(),
                        None => break,
                    }
                };
                if job.is_active() && self.check_recursion(seen, &job) {
                    self.invoke_job(&job);
                }
                self.inner.scheduler.borrow_mut().flush_index += 1;
            }

            let finished = {
                let mut state = self.inner.scheduler.borrow_mut();
                state.flush_index = 0;
                std::mem::take(&mut state.queue)
            };
            drop(finished);

            self.flush_post_flush_cbs(seen);

            let again = {
                let mut state = self.inner.scheduler.borrow_mut();
                state.flushing = false;
                !state.queue.is_empty() || !state.pending_post.is_empty()
            };
            if !again {
                break;
            }
        }

        let waiters = std::mem::take(&mut self.inner.scheduler.borrow_mut().waiters);
        for waker in waiters {
            waker.wake();
        }
    }

    fn flush_post_flush_cbs(&self, seen: &mut RecursionCounts) {
        {
            let mut state = self.inner.scheduler.borrow_mut();
            if state.pending_post.is_empty() {
                return;
            }
            let mut batch: Vec<Job> = Vec::with_capacity(state.pending_post.len());
            for job in std::mem::take(&mut state.pending_post) {
                if !batch.iter().any(|queued| queued.ptr_eq(&job)) {
                    batch.push(job);
                }
            }
            batch.sort_by_key(Job::order_key);
            debug!(callbacks = batch.len(), "flushing post-flush callbacks");
            state.active_post = Some(batch);
            state.post_index = 0;
        }

        loop {
            let job = {
                let state = self.inner.scheduler.borrow();
                match state
                    .active_post
                    .as_ref()
                    .and_then(|active| active.get(state.post_index))
                {
                    Some(job) => job.clone(),
                    None => break,
                }
            };
            if job.is_active() && self.check_recursion(seen, &job) {
                self.invoke_job(&job);
            }
            self.inner.scheduler.borrow_mut().post_index += 1;
        }

        let finished = {
            let mut state = self.inner.scheduler.borrow_mut();
            state.post_index = 0;
            state.active_post.take()
        };
        drop(finished);
    }

    /// Count one execution of `job`; `false` once it is over the limit.
    fn check_recursion(&self, seen: &mut RecursionCounts, job: &Job) -> bool {
        let limit = self.inner.config.recursion_limit;
        let (_, count) = seen.entry(job.addr()).or_insert_with(|| (job.clone(), 0));
        if *count >= limit {
            if *count == limit {
                *count += 1;
                self.report(ReactiveError::RecursionLimitExceeded { id: job.id(), limit });
            }
            return false;
        }
        *count += 1;
        true
    }

    fn invoke_job(&self, job: &Job) {
        if let Err(message) = self.guard(|| {
            job.invoke();
        }) {
            self.report(ReactiveError::JobPanicked {
                id: job.id(),
                message,
            });
        }
    }
}

// ---- Tests ----
