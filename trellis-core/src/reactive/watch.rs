//! Watchers
//!
//! A watcher re-runs a tracked getter when something it read changes and
//! hands the new and previous results to a callback, if the result changed.
//!
//! When the callback runs is chosen by [`FlushTiming`]:
//!
//! - `Sync`: inside the write that triggered it.
//! - `Pre` (default): as a job in the next flush, ordered by creation.
//!   Several writes before the flush coalesce into one callback.
//! - `Post`: as a post-flush callback, after every queued job has run.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use super::effect::{Effect, EffectCore, EffectOptions};
use super::Runtime;
use crate::scheduler::Job;
use crate::value::{has_changed, ReactiveValue};

/// When a watcher's callback runs relative to the scheduler flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushTiming {
    #[default]
    Pre,
    Post,
    Sync,
}

/// Options for [`Runtime::watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Call back once on creation, with no previous value.
    pub immediate: bool,
    pub flush: FlushTiming,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn flush(mut self, flush: FlushTiming) -> Self {
        self.flush = flush;
        self
    }
}

/// Owns a watcher. Dropping the handle stops it.
pub struct WatchHandle {
    core: Rc<EffectCore>,
    job: Job,
}

impl WatchHandle {
    /// Stop watching. Pending callbacks are cancelled.
    pub fn stop(&self) {
        self.core.stop();
        self.job.deactivate();
    }

    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.core.id())
            .field("active", &self.core.is_active())
            .finish()
    }
}

impl Runtime {
    /// Watch the result of `getter`.
    ///
    /// `callback` receives the new value and the previous one. The previous
    /// value is `None` only for the immediate call.
    pub fn watch<T: ReactiveValue>(
        &self,
        getter: impl FnMut() -> T + 'static,
        mut callback: impl FnMut(&T, Option<&T>) + 'static,
        options: WatchOptions,
    ) -> WatchHandle {
        let job_slot: Rc<RefCell<Option<Job>>> = Rc::new(RefCell::new(None));
        let scheduler = {
            let rt = self.clone();
            let job_slot = job_slot.clone();
            let flush = options.flush;
            move |_: &Job| {
                let job = job_slot.borrow().clone();
                let Some(job) = job else {
                    return;
                };
                match flush {
                    FlushTiming::Sync => {
                        job.invoke();
                    }
                    FlushTiming::Pre => rt.queue_job(job),
                    FlushTiming::Post => rt.queue_post_flush_cb(job),
                }
            }
        };
        let effect: Effect<T> = Effect::build(
            self,
            getter,
            false,
            EffectOptions::new().lazy(true).scheduler(scheduler),
        );

        let old: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let job = {
            let weak = effect.downgrade();
            let old = old.clone();
            Job::new(Some(effect.id().raw()), move || {
                let Some(effect) = weak.upgrade() else {
                    return;
                };
                if !effect.is_active() {
                    return;
                }
                let Some(new) = effect.run() else {
                    return;
                };
                let previous = old.borrow_mut().take();
                let changed = previous
                    .as_ref()
                    .map_or(true, |previous| has_changed(&new.to_raw(), &previous.to_raw()));
                if changed {
                    callback(&new, previous.as_ref());
                }
                drop(old.replace(Some(new)));
            })
        };
        // Callbacks may write to what they watch.
        job.set_allow_recurse(true);
        *job_slot.borrow_mut() = Some(job.clone());

        debug!(effect = %effect.id(), flush = ?options.flush, "watcher created");
        if options.immediate {
            job.invoke();
        } else {
            let initial = effect.run();
            drop(old.replace(initial));
        }

        WatchHandle {
            core: effect.core.clone(),
            job,
        }
    }
}
