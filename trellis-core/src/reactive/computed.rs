//! Computed Implementation
//!
//! A [`Computed`] is a cached derived value that re-evaluates only when one
//! of the values it read has changed, and only when somebody asks for it.
//!
//! # How Computed Values Work
//!
//! 1. The getter is wrapped in a lazy effect. Nothing runs on creation.
//!
//! 2. On first access the effect runs, caching the result and subscribing
//!    to whatever the getter read. The computed value is now clean.
//!
//! 3. When a dependency changes, the effect is not re-run. Its scheduler
//!    only marks the computed value dirty and, on the clean → dirty edge,
//!    notifies whoever read the computed value.
//!
//! 4. The next access recomputes.
//!
//! The runtime notifies computed subscribers before plain effects, so an
//! effect that reads both a source and a value derived from it may run
//! twice for one change. Its last run sees the fresh derived value.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::effect::{EffectCore, EffectOptions};
use super::Runtime;
use crate::error::ReactiveError;
use crate::graph::Dep;

struct ComputedInner<T> {
    rt: Runtime,
    effect: Rc<EffectCore>,
    value: Rc<RefCell<Option<T>>>,
    dirty: Rc<Cell<bool>>,
    dep: Rc<Dep>,
    setter: Option<Box<dyn Fn(T)>>,
}

/// A lazily evaluated, cached derived value.
///
/// # Example
///
/// ```rust
/// use trellis_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.create_ref(2);
///
/// let source = count.clone();
/// let squared = rt.computed(move || source.get() * source.get());
/// assert_eq!(squared.get(), 4);
///
/// count.set(3);
/// assert!(squared.is_dirty());
/// assert_eq!(squared.get(), 9);
/// ```
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: Clone + 'static> Computed<T> {
    fn new(
        rt: &Runtime,
        mut getter: impl FnMut() -> T + 'static,
        setter: Option<Box<dyn Fn(T)>>,
    ) -> Self {
        let value = Rc::new(RefCell::new(None));
        let dirty = Rc::new(Cell::new(true));
        let dep = Dep::detached();

        let body = {
            let value = value.clone();
            Box::new(move || {
                let next = getter();
                drop(value.replace(Some(next)));
            })
        };
        let scheduler = {
            let rt = rt.clone();
            let dirty = dirty.clone();
            let dep = dep.clone();
            move |_: &crate::scheduler::Job| {
                if !dirty.get() {
                    dirty.set(true);
                    trace!(subscribers = dep.len(), "computed marked dirty");
                    rt.trigger_dep(&dep);
                }
            }
        };
        let effect = EffectCore::new(
            rt,
            body,
            true,
            EffectOptions::new().lazy(true).scheduler(scheduler),
        );

        Self {
            inner: Rc::new(ComputedInner {
                rt: rt.clone(),
                effect,
                value,
                dirty,
                dep,
                setter,
            }),
        }
    }

    /// Read the value, recomputing first if it is dirty, and subscribe the
    /// current effect.
    ///
    /// # Panics
    ///
    /// Panics if the getter reads this computed value before it was ever
    /// evaluated.
    pub fn get(&self) -> T {
        let inner = &self.inner;
        if inner.dirty.get() && inner.effect.run() && inner.effect.is_active() {
            inner.dirty.set(false);
        }
        inner.rt.track_dep(&inner.dep);
        inner
            .value
            .borrow()
            .clone()
            .expect("computed value read before its first evaluation")
    }

    /// Read the value without subscribing.
    pub fn get_untracked(&self) -> T {
        self.inner.rt.untracked(|| self.get())
    }

    /// Write through the setter. Without one, reports
    /// [`ReactiveError::ReadonlyComputed`] and returns `false`.
    pub fn set(&self, value: T) -> bool {
        match &self.inner.setter {
            Some(setter) => {
                setter(value);
                true
            }
            None => {
                self.inner.rt.report(ReactiveError::ReadonlyComputed);
                false
            }
        }
    }

    /// Whether the next read recomputes.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    /// Detach from dependencies. Every later read recomputes, untracked.
    pub fn stop(&self) {
        self.inner.effect.stop();
        self.inner.dirty.set(true);
    }

    pub fn is_active(&self) -> bool {
        self.inner.effect.is_active()
    }

    /// Number of effects subscribed to this computed value.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.len()
    }

    /// Whether two handles refer to the same computed value.
    pub fn ptr_eq(&self, other: &Computed<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("value", &*self.inner.value.borrow())
            .field("dirty", &self.inner.dirty.get())
            .finish()
    }
}

impl Runtime {
    /// Create a read-only computed value.
    pub fn computed<T: Clone + 'static>(&self, getter: impl FnMut() -> T + 'static) -> Computed<T> {
        Computed::new(self, getter, None)
    }

    /// Create a computed value whose writes go through `setter`.
    pub fn computed_with_setter<T: Clone + 'static>(
        &self,
        getter: impl FnMut() -> T + 'static,
        setter: impl Fn(T) + 'static,
    ) -> Computed<T> {
        Computed::new(self, getter, Some(Box::new(setter)))
    }
}

// ---- Tests ----
