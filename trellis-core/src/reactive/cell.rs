//! Ref Implementation
//!
//! A [`Ref`] is a single reactive slot with its own private subscriber set.
//!
//! # How Refs Work
//!
//! 1. When a ref is read within an effect, the effect joins the ref's
//!    subscriber set.
//!
//! 2. When a ref is written, the raw form of the new value is compared with
//!    the raw form of the old one. Only a real change notifies subscribers.
//!
//! 3. Deep refs store composite values in their reactive form, so reads
//!    through the stored value are tracked too. Shallow refs, and any ref
//!    given a read-only view, store values exactly as given.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::Runtime;
use crate::graph::Dep;
use crate::value::{has_changed, ReactiveValue, Value};

struct RefInner<T> {
    rt: Runtime,
    value: RefCell<T>,
    raw: RefCell<T>,
    dep: Rc<Dep>,
    shallow: bool,
}

/// A reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use trellis_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.create_ref(0);
///
/// assert!(count.set(5));
/// assert!(!count.set(5));
/// assert_eq!(count.get(), 5);
/// ```
pub struct Ref<T> {
    inner: Rc<RefInner<T>>,
}

impl<T: ReactiveValue> Ref<T> {
    fn new(rt: &Runtime, value: T, shallow: bool) -> Self {
        let (raw, value) = if shallow || value.is_readonly_view() {
            (value.clone(), value)
        } else {
            let raw = value.to_raw();
            let stored = raw.to_reactive(rt);
            (raw, stored)
        };
        Self {
            inner: Rc::new(RefInner {
                rt: rt.clone(),
                value: RefCell::new(value),
                raw: RefCell::new(raw),
                dep: Dep::detached(),
                shallow,
            }),
        }
    }

    /// Read the value, subscribing the current effect.
    pub fn get(&self) -> T {
        self.inner.rt.track_dep(&self.inner.dep);
        self.inner.value.borrow().clone()
    }

    /// Read the value without subscribing.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Write the value. Returns `true` if it changed and subscribers were
    /// notified.
    pub fn set(&self, value: T) -> bool {
        let direct = self.inner.shallow || value.is_readonly_view();
        let raw = if direct { value.clone() } else { value.to_raw() };
        if !has_changed(&raw, &*self.inner.raw.borrow()) {
            return false;
        }

        let stored = if direct {
            value
        } else {
            raw.to_reactive(&self.inner.rt)
        };
        let old_raw = self.inner.raw.replace(raw);
        let old = self.inner.value.replace(stored);
        drop((old_raw, old));

        trace!(subscribers = self.inner.dep.len(), "ref changed");
        self.inner.rt.trigger_dep(&self.inner.dep);
        true
    }

    /// Write `f(current)`. Returns whether the value changed.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let next = f(&self.get_untracked());
        self.set(next)
    }

    /// Notify subscribers without changing the value.
    ///
    /// Useful after mutating something a shallow ref points at.
    pub fn trigger(&self) {
        self.inner.rt.trigger_dep(&self.inner.dep);
    }

    pub fn is_shallow(&self) -> bool {
        self.inner.shallow
    }

    /// Number of effects subscribed to this ref.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.len()
    }

    /// Whether two handles refer to the same ref.
    pub fn ptr_eq(&self, other: &Ref<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("value", &*self.inner.value.borrow())
            .field("shallow", &self.inner.shallow)
            .field("subscribers", &self.inner.dep.len())
            .finish()
    }
}

impl Runtime {
    /// Create a deep ref.
    pub fn create_ref<T: ReactiveValue>(&self, value: T) -> Ref<T> {
        Ref::new(self, value, false)
    }

    /// Create a ref that stores values as given, without reactive wrapping.
    pub fn shallow_ref<T: ReactiveValue>(&self, value: T) -> Ref<T> {
        Ref::new(self, value, true)
    }

    /// Turn a dynamic value into a ref. A value that already is a ref is
    /// returned unchanged.
    pub fn ref_value(&self, value: Value) -> Ref<Value> {
        match value {
            Value::Ref(cell) => cell,
            other => self.create_ref(other),
        }
    }
}
