//! Effect Implementation
//!
//! An Effect is a re-runnable computation that records, on every run,
//! exactly which slots it read.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its body immediately (unless lazy) to
//!    establish its initial dependencies.
//!
//! 2. Before every run, the effect leaves every subscriber set it joined
//!    last time. The body then re-subscribes to whatever it reads now, so a
//!    branch that is no longer taken stops notifying it.
//!
//! 3. When a dependency changes, the effect either runs synchronously or,
//!    if it has a scheduler, hands its job to the scheduler.
//!
//! # Lifetime
//!
//! The [`Effect`] handle owns the computation. Subscriber sets and queued
//! jobs only hold weak references, so dropping the last handle stops the
//! effect. [`Effect::stop`] does the same thing early.
//!
//! # Nesting
//!
//! An effect created or run inside another effect pushes its own frame on
//! the context stack; reads inside it are attributed to the inner effect
//! only. An effect that is already on the stack is never re-entered.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::{debug, trace};

use super::{EffectId, Runtime};
use crate::graph::Dep;
use crate::scheduler::Job;

type SchedulerFn = Rc<dyn Fn(&Job)>;

/// Shared state of an effect. Subscriber sets hold weak references to it.
pub(crate) struct EffectCore {
    id: EffectId,
    rt: Runtime,
    body: RefCell<Box<dyn FnMut()>>,
    active: Cell<bool>,
    pub(crate) deps: RefCell<SmallVec<[Rc<Dep>; 4]>>,
    computed: bool,
    allow_recurse: bool,
    scheduler: Option<SchedulerFn>,
    on_stop: RefCell<Option<Box<dyn FnOnce()>>>,
    job: Job,
    run_count: Cell<usize>,
}

impl EffectCore {
    pub(crate) fn new(
        rt: &Runtime,
        body: Box<dyn FnMut()>,
        computed: bool,
        options: EffectOptions,
    ) -> Rc<Self> {
        let id = rt.next_effect_id();
        let EffectOptions {
            allow_recurse,
            scheduler,
            on_stop,
            ..
        } = options;

        Rc::new_cyclic(|weak: &Weak<EffectCore>| {
            let weak = weak.clone();
            let job = Job::new(Some(id.raw()), move || {
                if let Some(core) = weak.upgrade() {
                    core.run();
                }
            });
            job.set_allow_recurse(allow_recurse);

            Self {
                id,
                rt: rt.clone(),
                body: RefCell::new(body),
                active: Cell::new(true),
                deps: RefCell::new(SmallVec::new()),
                computed,
                allow_recurse,
                scheduler,
                on_stop: RefCell::new(on_stop),
                job,
                run_count: Cell::new(0),
            }
        })
    }

    pub(crate) fn id(&self) -> EffectId {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn is_computed(&self) -> bool {
        self.computed
    }

    pub(crate) fn allows_recurse(&self) -> bool {
        self.allow_recurse
    }

    pub(crate) fn scheduler(&self) -> Option<SchedulerFn> {
        self.scheduler.clone()
    }

    pub(crate) fn job(&self) -> &Job {
        &self.job
    }

    /// Run the body. Returns `false` if the run was skipped because the
    /// effect is already running.
    pub(crate) fn run(self: &Rc<Self>) -> bool {
        let context = &self.rt.inner.context;
        if !self.is_active() {
            let _paused = context.pause();
            return self.call_body();
        }
        if context.contains(self.id) {
            trace!(effect = %self.id, "skipping re-entrant run");
            return false;
        }

        self.cleanup();
        let _ctx = context.enter(self.clone());
        self.call_body()
    }

    fn call_body(&self) -> bool {
        let Ok(mut body) = self.body.try_borrow_mut() else {
            return false;
        };
        self.run_count.set(self.run_count.get() + 1);
        (*body)();
        true
    }

    /// Leave every subscriber set joined during the last run.
    pub(crate) fn cleanup(&self) {
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        if deps.is_empty() {
            return;
        }
        for dep in &deps {
            dep.remove(self.id);
        }
        if self.rt.inner.config.prune_empty_deps {
            if let Ok(mut graph) = self.rt.inner.graph.try_borrow_mut() {
                for dep in deps.iter().filter(|dep| dep.is_empty()) {
                    graph.prune(dep);
                }
            }
        }
    }

    pub(crate) fn stop(&self) {
        if !self.active.replace(false) {
            return;
        }
        self.cleanup();
        self.job.deactivate();
        debug!(effect = %self.id, runs = self.run_count.get(), "effect stopped");

        let on_stop = self.on_stop.borrow_mut().take();
        if let Some(on_stop) = on_stop {
            on_stop();
        }
    }
}

impl Drop for EffectCore {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Options for [`Runtime::effect_with`].
#[derive(Default)]
pub struct EffectOptions {
    /// Do not run the body on creation.
    pub lazy: bool,
    /// Let the effect be re-triggered by its own writes.
    pub allow_recurse: bool,
    /// Called with the effect's job instead of running it synchronously.
    pub scheduler: Option<Rc<dyn Fn(&Job)>>,
    /// Called once when the effect is stopped.
    pub on_stop: Option<Box<dyn FnOnce()>>,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn allow_recurse(mut self, allow: bool) -> Self {
        self.allow_recurse = allow;
        self
    }

    pub fn scheduler(mut self, scheduler: impl Fn(&Job) + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    pub fn on_stop(mut self, on_stop: impl FnOnce() + 'static) -> Self {
        self.on_stop = Some(Box::new(on_stop));
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("allow_recurse", &self.allow_recurse)
            .field("scheduler", &self.scheduler.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}

/// A handle to a running effect.
///
/// # Example
///
/// ```rust
/// use trellis_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.create_ref(1);
///
/// let reader = count.clone();
/// let doubled = rt.effect(move || reader.get() * 2);
/// count.set(5);
///
/// assert_eq!(doubled.run_count(), 2);
/// assert_eq!(doubled.run(), Some(10));
/// ```
pub struct Effect<R> {
    pub(crate) core: Rc<EffectCore>,
    output: Rc<RefCell<Option<R>>>,
}

impl<R: 'static> Effect<R> {
    pub(crate) fn build(
        rt: &Runtime,
        mut body: impl FnMut() -> R + 'static,
        computed: bool,
        options: EffectOptions,
    ) -> Self {
        let output = Rc::new(RefCell::new(None));
        let slot = output.clone();
        let body: Box<dyn FnMut()> = Box::new(move || {
            let value = body();
            drop(slot.replace(Some(value)));
        });
        Self {
            core: EffectCore::new(rt, body, computed, options),
            output,
        }
    }

    /// Run the effect now and return what the body returned.
    ///
    /// Returns `None` if the effect is already running further up the
    /// stack. A stopped effect still runs its body, untracked.
    pub fn run(&self) -> Option<R> {
        if self.core.run() {
            self.output.borrow_mut().take()
        } else {
            None
        }
    }

    /// Stop the effect: unsubscribe everywhere and never re-run on a
    /// trigger. Idempotent.
    pub fn stop(&self) {
        self.core.stop();
    }

    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    pub fn id(&self) -> EffectId {
        self.core.id()
    }

    /// Number of times the body has run.
    pub fn run_count(&self) -> usize {
        self.core.run_count.get()
    }

    /// Number of subscriber sets the effect currently belongs to.
    pub fn dependency_count(&self) -> usize {
        self.core.deps.borrow().len()
    }

    /// The job that re-runs this effect.
    pub fn job(&self) -> &Job {
        self.core.job()
    }

    /// A handle that does not keep the effect alive.
    pub fn downgrade(&self) -> WeakEffect<R> {
        WeakEffect {
            core: Rc::downgrade(&self.core),
            output: self.output.clone(),
        }
    }
}

impl<R> Clone for Effect<R> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            output: Rc::clone(&self.output),
        }
    }
}

impl<R> fmt::Debug for Effect<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.core.id)
            .field("run_count", &self.core.run_count.get())
            .field("dependency_count", &self.core.deps.borrow().len())
            .field("active", &self.core.is_active())
            .finish()
    }
}

/// A non-owning effect handle.
pub struct WeakEffect<R> {
    core: Weak<EffectCore>,
    output: Rc<RefCell<Option<R>>>,
}

impl<R: 'static> WeakEffect<R> {
    /// Get an owning handle if the effect is still alive.
    pub fn upgrade(&self) -> Option<Effect<R>> {
        Some(Effect {
            core: self.core.upgrade()?,
            output: self.output.clone(),
        })
    }

    /// Run the effect if it is still alive.
    pub fn run(&self) -> Option<R> {
        self.upgrade()?.run()
    }
}

impl<R> Clone for WeakEffect<R> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            output: self.output.clone(),
        }
    }
}

impl Runtime {
    /// Create an effect and run it once.
    pub fn effect<R: 'static>(&self, body: impl FnMut() -> R + 'static) -> Effect<R> {
        self.effect_with(body, EffectOptions::default())
    }

    /// Create an effect with options.
    pub fn effect_with<R: 'static>(
        &self,
        body: impl FnMut() -> R + 'static,
        options: EffectOptions,
    ) -> Effect<R> {
        let lazy = options.lazy;
        let effect = Effect::build(self, body, false, options);
        debug!(effect = %effect.id(), lazy, "effect created");
        if !lazy {
            effect.core.run();
        }
        effect
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn counter() -> Rc<Cell<usize>> {
        Rc::new(Cell::new(0))
    }

    #[test]
    fn effect_runs_on_creation() {
        let rt = Runtime::new();
        let runs = counter();
        let seen = runs.clone();
        let effect = rt.effect(move || seen.set(seen.get() + 1));

        assert_eq!(runs.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn lazy_effect_waits_for_run() {
        let rt = Runtime::new();
        let effect = rt.effect_with(|| 7, EffectOptions::new().lazy(true));

        assert_eq!(effect.run_count(), 0);
        assert_eq!(effect.run(), Some(7));
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let rt = Runtime::new();
        let count = rt.create_ref(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let _effect = {
            let count = count.clone();
            let log = log.clone();
            rt.effect(move || log.borrow_mut().push(count.get()))
        };

        count.set(1);
        count.set(1);
        count.set(2);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn stale_branches_are_pruned() {
        let rt = Runtime::new();
        let flag = rt.create_ref(true);
        let a = rt.create_ref("a");
        let b = rt.create_ref("b");
        let runs = counter();

        let effect = {
            let (flag, a, b, runs) = (flag.clone(), a.clone(), b.clone(), runs.clone());
            rt.effect(move || {
                runs.set(runs.get() + 1);
                if flag.get() {
                    a.get()
                } else {
                    b.get()
                }
            })
        };
        assert_eq!(effect.dependency_count(), 2);
        assert_eq!(b.subscriber_count(), 0);

        flag.set(false);
        assert_eq!(runs.get(), 2);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);

        a.set("changed");
        assert_eq!(runs.get(), 2);
        b.set("changed");
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn stopped_effect_never_reruns() {
        let rt = Runtime::new();
        let count = rt.create_ref(0);
        let stops = counter();
        let runs = counter();

        let effect = {
            let (count, runs) = (count.clone(), runs.clone());
            let stops = stops.clone();
            rt.effect_with(
                move || {
                    runs.set(runs.get() + 1);
                    count.get()
                },
                EffectOptions::new().on_stop(move || stops.set(stops.get() + 1)),
            )
        };

        effect.stop();
        effect.stop();
        assert!(!effect.is_active());
        assert_eq!(stops.get(), 1);
        assert_eq!(effect.dependency_count(), 0);
        assert_eq!(count.subscriber_count(), 0);

        count.set(1);
        assert_eq!(runs.get(), 1);

        // Direct invocation still runs the body, without tracking.
        assert_eq!(effect.run(), Some(1));
        assert_eq!(runs.get(), 2);
        assert_eq!(count.subscriber_count(), 0);
    }

    #[test]
    fn dropping_the_handle_stops_the_effect() {
        let rt = Runtime::new();
        let count = rt.create_ref(0);
        let runs = counter();
        let stopped = Rc::new(Cell::new(false));

        let effect = {
            let (count, runs, stopped) = (count.clone(), runs.clone(), stopped.clone());
            rt.effect_with(
                move || {
                    runs.set(runs.get() + 1);
                    count.get();
                },
                EffectOptions::new().on_stop(move || stopped.set(true)),
            )
        };
        let weak = effect.downgrade();
        drop(effect);

        assert!(stopped.get());
        assert!(weak.upgrade().is_none());
        count.set(1);
        assert_eq!(runs.get(), 1);
        assert_eq!(count.subscriber_count(), 0);
    }

    #[test]
    fn own_writes_do_not_retrigger_by_default() {
        let rt = Runtime::new();
        let count = rt.create_ref(0);
        let runs = counter();

        let _effect = {
            let (count, runs) = (count.clone(), runs.clone());
            rt.effect(move || {
                runs.set(runs.get() + 1);
                count.update(|n| n + 1);
            })
        };

        assert_eq!(runs.get(), 1);
        assert_eq!(count.get_untracked(), 1);
    }

    #[test]
    fn allow_recurse_lets_an_effect_retrigger_through_its_scheduler() {
        let rt = Runtime::new();
        let count = rt.create_ref(0);
        let runs = counter();

        let scheduler_rt = rt.clone();
        let _effect = {
            let (count, runs) = (count.clone(), runs.clone());
            rt.effect_with(
                move || {
                    runs.set(runs.get() + 1);
                    if count.get() < 3 {
                        count.update(|n| n + 1);
                    }
                },
                EffectOptions::new()
                    .allow_recurse(true)
                    .scheduler(move |job| scheduler_rt.queue_job(job.clone())),
            )
        };

        rt.flush_pending();
        assert_eq!(count.get_untracked(), 3);
        assert_eq!(runs.get(), 4);
    }

    #[test]
    fn scheduler_receives_the_job_instead_of_running() {
        let rt = Runtime::new();
        let count = rt.create_ref(0);
        let scheduled = counter();

        let effect = {
            let count = count.clone();
            let scheduled = scheduled.clone();
            rt.effect_with(
                move || count.get(),
                EffectOptions::new().scheduler(move |_| scheduled.set(scheduled.get() + 1)),
            )
        };

        count.set(1);
        count.set(2);
        assert_eq!(scheduled.get(), 2);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn nested_effects_track_separately() {
        let rt = Runtime::new();
        let outer_ref = rt.create_ref(0);
        let inner_ref = rt.create_ref(0);
        let outer_runs = counter();
        let inner_runs = counter();
        let inner_handle: Rc<RefCell<Option<Effect<()>>>> = Rc::new(RefCell::new(None));

        let _outer = {
            let rt2 = rt.clone();
            let (outer_ref, inner_ref) = (outer_ref.clone(), inner_ref.clone());
            let (outer_runs, inner_runs) = (outer_runs.clone(), inner_runs.clone());
            let inner_handle = inner_handle.clone();
            rt.effect(move || {
                outer_runs.set(outer_runs.get() + 1);
                let inner_ref = inner_ref.clone();
                let inner_runs = inner_runs.clone();
                let inner = rt2.effect(move || {
                    inner_runs.set(inner_runs.get() + 1);
                    inner_ref.get();
                });
                *inner_handle.borrow_mut() = Some(inner);
                outer_ref.get();
            })
        };

        assert_eq!((outer_runs.get(), inner_runs.get()), (1, 1));
        inner_ref.set(1);
        assert_eq!((outer_runs.get(), inner_runs.get()), (1, 2));
        outer_ref.set(1);
        assert_eq!((outer_runs.get(), inner_runs.get()), (2, 3));
        assert_eq!(inner_ref.subscriber_count(), 1);
    }

    #[test]
    fn reentrant_run_is_skipped() {
        let rt = Runtime::new();
        let slot: Rc<RefCell<Option<WeakEffect<Option<i32>>>>> = Rc::new(RefCell::new(None));
        let effect = {
            let slot = slot.clone();
            rt.effect_with(
                move || {
                    let me = slot.borrow().clone();
                    me.and_then(|me| me.run()).flatten()
                },
                EffectOptions::new().lazy(true),
            )
        };
        *slot.borrow_mut() = Some(effect.downgrade());
        assert_eq!(effect.run(), Some(None));
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let rt = Runtime::new();
        let errors = counter();
        {
            let errors = errors.clone();
            rt.set_error_handler(move |_| errors.set(errors.get() + 1));
        }
        let count = rt.create_ref(0);
        let healthy_runs = counter();

        let _bad = {
            let count = count.clone();
            rt.effect(move || {
                if count.get() > 0 {
                    panic!("bad effect");
                }
            })
        };
        let _good = {
            let (count, healthy_runs) = (count.clone(), healthy_runs.clone());
            rt.effect(move || {
                healthy_runs.set(healthy_runs.get() + 1);
                count.get();
            })
        };

        count.set(1);
        assert_eq!(errors.get(), 1);
        assert_eq!(healthy_runs.get(), 2);
        assert_eq!(rt.current_effect(), None);
    }

    #[test]
    fn effects_over_wrappers_track_slots() {
        let rt = Runtime::new();
        let state = rt.reactive(&crate::Composite::object([("n", Value::from(1))]));
        let runs = counter();
        let effect = {
            let (state, runs) = (state.clone(), runs.clone());
            rt.effect(move || {
                runs.set(runs.get() + 1);
                state.get("n").unwrap()
            })
        };
        assert_eq!(effect.dependency_count(), 1);
        state.set("n", 2).unwrap();
        assert_eq!(runs.get(), 2);
    }
}
