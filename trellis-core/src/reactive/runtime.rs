//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects wrappers, refs,
//! computed values and effects. It owns the dependency graph, the context
//! stack, the scheduler queues and the wrapper cache.
//!
//! # How It Works
//!
//! 1. When an effect runs, it is pushed on the runtime's context stack.
//!
//! 2. When a wrapper or ref is read, the runtime records the dependency of
//!    the current effect on the (owner, slot) pair that was read.
//!
//! 3. When a slot changes, the runtime:
//!    a. Collects the subscriber sets affected by the mutation
//!    b. Takes a deduplicated snapshot of their subscribers
//!    c. Notifies computed subscribers first, so their dirty flags are set
//!       before any plain effect can read them
//!    d. Hands each effect's job to its scheduler, or runs it synchronously
//!
//! # Threading
//!
//! A runtime is single-threaded (`!Send`). Handles clone cheaply and all
//! clones share the same state; independent runtimes never observe each
//! other.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::{debug, error, trace, warn};

use super::context::ContextStack;
use super::effect::EffectCore;
use super::wrapper::{Flavor, WrapperInner};
use super::EffectId;
use crate::config::RuntimeConfig;
use crate::error::ReactiveError;
use crate::graph::{Dep, DependencyGraph, TriggerKind};
use crate::scheduler::SchedulerState;
use crate::value::{Composite, OwnerId, Slot};

type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) graph: RefCell<DependencyGraph>,
    pub(crate) context: ContextStack,
    pub(crate) scheduler: RefCell<SchedulerState>,
    pub(crate) wrappers: RefCell<HashMap<(Flavor, OwnerId), Weak<WrapperInner>>>,
    next_effect_id: Cell<u64>,
    error_handler: RefCell<Option<ErrorHandler>>,
}

/// The reactive runtime.
///
/// Cloning a `Runtime` clones a handle to the same runtime.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        debug!(?config, "creating reactive runtime");
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                graph: RefCell::new(DependencyGraph::new()),
                context: ContextStack::default(),
                scheduler: RefCell::new(SchedulerState::default()),
                wrappers: RefCell::new(HashMap::new()),
                next_effect_id: Cell::new(0),
                error_handler: RefCell::new(None),
            }),
        }
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Drop every subscription, queued job and cached wrapper.
    ///
    /// Existing effects stay alive but stop receiving notifications until
    /// they run again and re-track. Must not be called from inside an effect.
    pub fn reset(&self) {
        debug!("resetting reactive runtime");
        self.inner.graph.borrow_mut().clear();
        let (jobs, waiters) = self.inner.scheduler.borrow_mut().reset();
        drop(jobs);
        for waker in waiters {
            waker.wake();
        }
        let wrappers = std::mem::take(&mut *self.inner.wrappers.borrow_mut());
        drop(wrappers);
    }

    /// Forget every subscription to `owner` and its cached wrappers.
    ///
    /// Returns the number of subscriber sets dropped.
    pub fn forget(&self, owner: &Composite) -> usize {
        let id = owner.id();
        let removed = self.inner.graph.borrow_mut().remove_owner(id);
        self.inner
            .wrappers
            .borrow_mut()
            .retain(|(_, owner), _| *owner != id);
        debug!(%id, removed, "forgot owner");
        removed
    }

    /// Install the callback that receives every reported error.
    pub fn set_error_handler(&self, handler: impl Fn(&ReactiveError) + 'static) {
        *self.inner.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Report a non-fatal error: log it and pass it to the error handler.
    pub fn report(&self, err: ReactiveError) {
        if err.is_warning() {
            warn!(error = %err, "reactive warning");
        } else {
            error!(error = %err, "reactive error");
        }
        let handler = self.inner.error_handler.borrow().clone();
        if let Some(handler) = handler {
            handler(&err);
        }
    }

    /// Run `f` with dependency tracking paused.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _paused = self.inner.context.pause();
        f()
    }

    /// Whether a read right now would be tracked.
    pub fn is_tracking(&self) -> bool {
        self.inner.context.is_tracking()
    }

    /// The innermost running effect, if any.
    pub fn current_effect(&self) -> Option<EffectId> {
        self.inner.context.active_effect_id()
    }

    /// Record that the current effect read `slot` of `owner`.
    ///
    /// A no-op when no effect is running or tracking is paused.
    pub fn track(&self, owner: &Composite, slot: impl Into<Slot>) {
        let slot = owner.normalize(slot.into());
        self.track_slot(owner.id(), &slot);
    }

    /// Notify the subscribers of `slot` of `owner` about a mutation.
    pub fn trigger(&self, owner: &Composite, slot: impl Into<Slot>, kind: TriggerKind) {
        let slot = owner.normalize(slot.into());
        self.trigger_slots(owner, kind, &[slot]);
    }

    /// Number of subscriber sets in the dependency graph.
    pub fn dep_count(&self) -> usize {
        self.inner.graph.borrow().dep_count()
    }

    /// Number of subscribers to `slot` of `owner`.
    pub fn subscriber_count(&self, owner: &Composite, slot: impl Into<Slot>) -> usize {
        let slot = owner.normalize(slot.into());
        self.inner
            .graph
            .borrow()
            .get(owner.id(), &slot)
            .map_or(0, |dep| dep.len())
    }

    pub(crate) fn next_effect_id(&self) -> EffectId {
        let id = self.inner.next_effect_id.get();
        self.inner.next_effect_id.set(id + 1);
        EffectId::from_raw(id)
    }

    pub(crate) fn track_slot(&self, owner: OwnerId, slot: &Slot) {
        let Some(effect) = self.inner.context.current() else {
            return;
        };
        if !effect.is_active() {
            return;
        }
        let dep = self.inner.graph.borrow_mut().dep_for(owner, slot);
        trace!(%owner, %slot, effect = %effect.id(), "track");
        self.link(&effect, &dep);
    }

    /// Record that the current effect read a detached subscriber set.
    pub(crate) fn track_dep(&self, dep: &Rc<Dep>) {
        let Some(effect) = self.inner.context.current() else {
            return;
        };
        if effect.is_active() {
            self.link(&effect, dep);
        }
    }

    fn link(&self, effect: &Rc<EffectCore>, dep: &Rc<Dep>) {
        if dep.insert(effect) {
            effect.deps.borrow_mut().push(dep.clone());
        }
    }

    pub(crate) fn trigger_slots(&self, owner: &Composite, kind: TriggerKind, slots: &[Slot]) {
        let iteration = owner.kind().iteration_slot();
        let deps = self
            .inner
            .graph
            .borrow()
            .affected(owner.id(), kind, slots, &iteration);
        if deps.is_empty() {
            return;
        }
        trace!(owner = %owner.id(), ?kind, sets = deps.len(), "trigger");

        let mut seen = HashSet::new();
        let mut effects = Vec::new();
        for dep in &deps {
            for effect in dep.snapshot() {
                if seen.insert(effect.id()) {
                    effects.push(effect);
                }
            }
        }
        self.notify(effects);
    }

    /// Notify every subscriber of a detached subscriber set.
    pub(crate) fn trigger_dep(&self, dep: &Dep) {
        let effects = dep.snapshot();
        if !effects.is_empty() {
            self.notify(effects);
        }
    }

    fn notify(&self, effects: Vec<Rc<EffectCore>>) {
        let (computed, plain): (Vec<_>, Vec<_>) =
            effects.into_iter().partition(|effect| effect.is_computed());
        for effect in computed.iter().chain(&plain) {
            self.trigger_effect(effect);
        }
    }

    fn trigger_effect(&self, effect: &Rc<EffectCore>) {
        if !effect.is_active() {
            return;
        }
        if self.inner.context.active_effect_id() == Some(effect.id()) && !effect.allows_recurse() {
            return;
        }

        let outcome = match effect.scheduler() {
            Some(scheduler) => {
                let job = effect.job().clone();
                self.guard(|| scheduler(&job))
            }
            None => self.guard(|| {
                effect.run();
            }),
        };
        if let Err(message) = outcome {
            self.report(ReactiveError::EffectPanicked {
                id: effect.id(),
                message,
            });
        }
    }

    /// Run `f`, catching a panic if the configuration asks for it.
    pub(crate) fn guard<R>(&self, f: impl FnOnce() -> R) -> Result<R, String> {
        if !self.inner.config.catch_panics {
            return Ok(f());
        }
        panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("deps", &self.dep_count())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn counter() -> Rc<Cell<usize>> {
        Rc::new(Cell::new(0))
    }

    #[test]
    fn track_outside_an_effect_is_a_noop() {
        let rt = Runtime::new();
        let owner = Composite::object([("a", Value::from(1))]);
        rt.track(&owner, "a");
        assert_eq!(rt.dep_count(), 0);
        assert!(!rt.is_tracking());
    }

    #[test]
    fn manual_track_and_trigger() {
        let rt = Runtime::new();
        let owner = Composite::object([("a", Value::from(1))]);
        let runs = counter();

        let effect = {
            let rt = rt.clone();
            let owner = owner.clone();
            let runs = runs.clone();
            rt.clone().effect(move || {
                runs.set(runs.get() + 1);
                rt.track(&owner, "a");
            })
        };
        assert_eq!(runs.get(), 1);
        assert_eq!(rt.subscriber_count(&owner, "a"), 1);
        assert_eq!(effect.dependency_count(), 1);

        rt.trigger(&owner, "b", TriggerKind::Set);
        assert_eq!(runs.get(), 1);

        rt.trigger(&owner, "a", TriggerKind::Set);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn add_notifies_enumeration() {
        let rt = Runtime::new();
        let owner = Composite::object(Vec::<(&str, Value)>::new());
        let runs = counter();
        let _effect = {
            let rt = rt.clone();
            let owner = owner.clone();
            let runs = runs.clone();
            rt.clone().effect(move || {
                runs.set(runs.get() + 1);
                rt.track(&owner, Slot::Iterate);
            })
        };

        rt.trigger(&owner, "x", TriggerKind::Set);
        assert_eq!(runs.get(), 1);
        rt.trigger(&owner, "x", TriggerKind::Add);
        assert_eq!(runs.get(), 2);
        rt.trigger(&owner, "x", TriggerKind::Delete);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn untracked_reads_do_not_subscribe() {
        let rt = Runtime::new();
        let owner = Composite::object([("a", Value::from(1))]);
        let _effect = {
            let rt = rt.clone();
            let owner = owner.clone();
            rt.clone().effect(move || {
                rt.untracked(|| rt.track(&owner, "a"));
                assert!(rt.is_tracking());
            })
        };
        assert_eq!(rt.subscriber_count(&owner, "a"), 0);
    }

    #[test]
    fn forget_drops_owner_subscriptions() {
        let rt = Runtime::new();
        let owner = Composite::object([("a", Value::from(1))]);
        let runs = counter();
        let _effect = {
            let rt = rt.clone();
            let owner = owner.clone();
            let runs = runs.clone();
            rt.clone().effect(move || {
                runs.set(runs.get() + 1);
                rt.track(&owner, "a");
            })
        };
        assert_eq!(rt.forget(&owner), 1);
        rt.trigger(&owner, "a", TriggerKind::Set);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn reset_clears_graph() {
        let rt = Runtime::new();
        let owner = Composite::object([("a", Value::from(1))]);
        let _effect = {
            let rt = rt.clone();
            let owner = owner.clone();
            rt.clone().effect(move || rt.track(&owner, "a"))
        };
        assert_eq!(rt.dep_count(), 1);
        rt.reset();
        assert_eq!(rt.dep_count(), 0);
    }

    #[test]
    fn report_reaches_the_handler() {
        let rt = Runtime::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = seen.clone();
            rt.set_error_handler(move |err| seen.borrow_mut().push(err.is_warning()));
        }
        rt.report(ReactiveError::ReadonlyComputed);
        assert_eq!(*seen.borrow(), vec![true]);
    }

    #[test]
    fn effect_ids_are_monotonic_per_runtime() {
        let rt = Runtime::new();
        let a = rt.next_effect_id();
        let b = rt.next_effect_id();
        assert!(a < b);
        assert_eq!(Runtime::new().next_effect_id().raw(), 0);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let rt = Runtime::new();
        let err = rt.guard(|| panic!("kaboom")).unwrap_err();
        assert_eq!(err, "kaboom");
        let err = rt.guard(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(err, "formatted 1");
    }
}
