//! Reactive Wrappers
//!
//! A [`Reactive`] wraps a [`Composite`] so that reads through it are tracked
//! and writes through it notify exactly the effects that read the written
//! slot.
//!
//! # Flavors
//!
//! - `Reactive`: deep. Composite children come back wrapped, and refs stored
//!   in object slots are read and written through.
//! - `ShallowReactive`: only the top level is reactive; children come back
//!   raw.
//! - `Readonly` / `ShallowReadonly`: mutations are refused and reported as
//!   [`ReactiveError::ReadonlyViolation`]. Reads are still tracked, so a
//!   read-only view stays current when the composite is changed through
//!   another wrapper.
//!
//! # Identity
//!
//! Wrapping the same composite twice with the same flavor yields the same
//! wrapper, for as long as any handle to it is alive. The runtime caches
//! wrappers weakly by (flavor, owner); the entry is evicted when the wrapper
//! is dropped or the owner is forgotten.

use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::Runtime;
use crate::error::{ReactiveError, Result};
use crate::graph::TriggerKind;
use crate::value::{
    has_changed, length_from, Composite, ContainerKind, OwnerId, Slot, SlotAccess, Value,
};

/// The variant of a reactive wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavor {
    Reactive,
    ShallowReactive,
    Readonly,
    ShallowReadonly,
}

impl Flavor {
    pub fn is_readonly(self) -> bool {
        matches!(self, Flavor::Readonly | Flavor::ShallowReadonly)
    }

    pub fn is_shallow(self) -> bool {
        matches!(self, Flavor::ShallowReactive | Flavor::ShallowReadonly)
    }
}

pub(crate) struct WrapperInner {
    rt: Runtime,
    target: Composite,
    flavor: Flavor,
}

impl Drop for WrapperInner {
    fn drop(&mut self) {
        let key = (self.flavor, self.target.id());
        if let Ok(mut cache) = self.rt.inner.wrappers.try_borrow_mut() {
            if cache.get(&key).is_some_and(|entry| entry.strong_count() == 0) {
                cache.remove(&key);
            }
        }
    }
}

/// What to wrap: a raw composite or an existing wrapper.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Raw(&'a Composite),
    Wrapped(&'a Reactive),
}

impl<'a> From<&'a Composite> for Target<'a> {
    fn from(composite: &'a Composite) -> Self {
        Target::Raw(composite)
    }
}

impl<'a> From<&'a Reactive> for Target<'a> {
    fn from(wrapper: &'a Reactive) -> Self {
        Target::Wrapped(wrapper)
    }
}

/// A tracked view of a composite value.
///
/// # Example
///
/// ```rust
/// use trellis_core::{Composite, Runtime, Value};
///
/// let rt = Runtime::new();
/// let raw = Composite::object([("user", Value::object([("name", Value::from("ada"))]))]);
/// let state = rt.reactive(&raw);
///
/// // Same composite, same wrapper.
/// assert!(rt.reactive(&raw).ptr_eq(&state));
///
/// // Children come back wrapped.
/// let user = state.get("user").unwrap();
/// assert!(user.is_reactive());
/// ```
#[derive(Clone)]
pub struct Reactive {
    inner: Rc<WrapperInner>,
}

impl Reactive {
    /// Read a slot, subscribing the current effect. Missing slots read as
    /// `Null`.
    pub fn get(&self, slot: impl Into<Slot>) -> Result<Value> {
        let target = &self.inner.target;
        let slot = target.normalize(slot.into());
        let value = target.with(|data| data.read(&slot))?.unwrap_or_default();
        self.inner.rt.track_slot(target.id(), &slot);
        Ok(self.wrap_child(value))
    }

    /// Write a slot. Returns `Ok(true)` if subscribers were notified.
    ///
    /// Read-only wrappers report the attempt and return `Ok(false)`.
    pub fn set(&self, slot: impl Into<Slot>, value: impl Into<Value>) -> Result<bool> {
        let target = &self.inner.target;
        let slot = target.normalize(slot.into());
        if self.refuse("set", &slot) {
            return Ok(false);
        }

        let shallow = self.is_shallow();
        let value: Value = value.into();
        let value = if shallow || value.is_readonly() {
            value
        } else {
            value.to_raw()
        };
        let kind = target.kind();

        if kind == ContainerKind::Array && slot == Slot::Length {
            return self.set_length(&value);
        }

        if !shallow && kind == ContainerKind::Object {
            let current = target.with(|data| data.read(&slot))?;
            if let Some(Value::Ref(cell)) = current {
                if !matches!(value, Value::Ref(_)) {
                    return Ok(cell.set(value));
                }
            }
        }

        let stored = value.clone();
        let (had_slot, old) = target.with_mut(|data| -> Result<_> {
            let had_slot = data.has(&slot)?;
            let old = data.write(&slot, stored)?;
            Ok((had_slot, old))
        })?;

        if !had_slot {
            trace!(owner = %target.id(), %slot, "slot added");
            self.inner.rt.trigger_slots(target, TriggerKind::Add, &[slot]);
            return Ok(true);
        }
        let old = old.unwrap_or_default();
        if has_changed(&value, &old) {
            self.inner.rt.trigger_slots(target, TriggerKind::Set, &[slot]);
            return Ok(true);
        }
        Ok(false)
    }

    fn set_length(&self, value: &Value) -> Result<bool> {
        let target = &self.inner.target;
        let len = length_from(value)?;
        let (old_len, removed) = target.with_mut(|data| match data.as_array_mut() {
            Some(array) => {
                let old_len = array.len();
                Ok((old_len, array.set_len(len)?))
            }
            None => Err(ReactiveError::UnsupportedOperation {
                op: "set length",
                kind: ContainerKind::Object,
            }),
        })?;
        drop(removed);
        if old_len == len {
            return Ok(false);
        }

        let mut slots = vec![Slot::Length];
        slots.extend((len..old_len).map(Slot::Index));
        self.inner.rt.trigger_slots(target, TriggerKind::Set, &slots);
        Ok(true)
    }

    /// Remove a slot. On arrays later elements shift down.
    ///
    /// Returns `Ok(true)` if something was removed.
    pub fn remove(&self, slot: impl Into<Slot>) -> Result<bool> {
        let target = &self.inner.target;
        let slot = target.normalize(slot.into());
        if self.refuse("remove", &slot) {
            return Ok(false);
        }

        match target.kind() {
            ContainerKind::Object => {
                let removed = target.with_mut(|data| data.remove(&slot))?;
                if removed.is_none() {
                    return Ok(false);
                }
                self.inner.rt.trigger_slots(target, TriggerKind::Delete, &[slot]);
                Ok(true)
            }
            ContainerKind::Array => {
                let shifted = target.with_mut(|data| -> Result<_> {
                    let Some(index) = slot.as_index() else {
                        return Err(ReactiveError::InvalidSlot {
                            slot: slot.clone(),
                            kind: ContainerKind::Array,
                        });
                    };
                    let Some(array) = data.as_array_mut() else {
                        return Ok(None);
                    };
                    if index >= array.len() {
                        return Ok(None);
                    }
                    let tail = array.items()[index..].to_vec();
                    array.remove(&Slot::Index(index))?;
                    Ok(Some((index, tail)))
                })?;
                let Some((index, tail)) = shifted else {
                    return Ok(false);
                };

                // Every shifted position whose value changed, then the
                // vacated last position.
                let mut slots: Vec<Slot> = tail
                    .windows(2)
                    .enumerate()
                    .filter(|(_, pair)| has_changed(&pair[1], &pair[0]))
                    .map(|(offset, _)| Slot::Index(index + offset))
                    .collect();
                slots.push(Slot::Index(index + tail.len() - 1));
                self.inner.rt.trigger_slots(target, TriggerKind::Delete, &slots);
                Ok(true)
            }
        }
    }

    /// Whether a slot exists. Tracks the slot and enumeration.
    pub fn has(&self, slot: impl Into<Slot>) -> Result<bool> {
        let target = &self.inner.target;
        let slot = target.normalize(slot.into());
        let present = target.with(|data| data.has(&slot))?;
        self.inner.rt.track_slot(target.id(), &slot);
        self.track_iteration();
        Ok(present)
    }

    /// Every present slot, in order. Tracks enumeration.
    pub fn keys(&self) -> Vec<Slot> {
        self.track_iteration();
        self.inner.target.with(|data| data.slots())
    }

    /// Number of present slots. Tracks enumeration.
    pub fn len(&self) -> usize {
        self.track_iteration();
        self.inner.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append to an array. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        let target = &self.inner.target;
        self.require_array("push")?;
        let len = target.len();
        if self.refuse("push", &Slot::Index(len)) {
            return Ok(len);
        }
        // Pushing reads the length; that read must not subscribe.
        let value = value.into();
        self.inner.rt.untracked(|| self.set(Slot::Index(len), value))?;
        Ok(target.len())
    }

    /// Remove and return the last element of an array.
    pub fn pop(&self) -> Result<Value> {
        let target = &self.inner.target;
        self.require_array("pop")?;
        let last = target.len().checked_sub(1);
        let Some(last) = last else {
            return Ok(Value::Null);
        };
        if self.refuse("pop", &Slot::Index(last)) {
            return Ok(Value::Null);
        }
        let popped = target.with_mut(|data| data.as_array_mut().and_then(|array| array.pop()));
        let Some(popped) = popped else {
            return Ok(Value::Null);
        };
        self.inner
            .rt
            .trigger_slots(target, TriggerKind::Delete, &[Slot::Index(last)]);
        Ok(self.wrap_child(popped))
    }

    /// Remove every slot.
    pub fn clear(&self) -> Result<()> {
        let target = &self.inner.target;
        if self.refuse("clear", &target.kind().iteration_slot()) {
            return Ok(());
        }
        let removed = target.with_mut(|data| data.clear());
        if removed.is_empty() {
            return Ok(());
        }
        drop(removed);
        self.inner.rt.trigger_slots(target, TriggerKind::Clear, &[]);
        Ok(())
    }

    /// Read every reachable slot, subscribing the current effect to all of
    /// them. Cycles are visited once.
    pub fn traverse(&self) {
        let mut seen = HashSet::new();
        self.traverse_within(&mut seen);
    }

    fn traverse_within(&self, seen: &mut HashSet<OwnerId>) {
        if !seen.insert(self.id()) {
            return;
        }
        for slot in self.keys() {
            let Ok(value) = self.get(slot) else {
                continue;
            };
            let value = match value {
                Value::Ref(cell) => cell.get(),
                other => other,
            };
            if let Value::Reactive(child) = value {
                child.traverse_within(seen);
            }
        }
    }

    /// Untracked JSON snapshot of the wrapped composite.
    pub fn to_json(&self) -> serde_json::Value {
        self.inner.target.to_json()
    }

    /// The wrapped composite.
    pub fn raw(&self) -> Composite {
        self.inner.target.clone()
    }

    pub fn id(&self) -> OwnerId {
        self.inner.target.id()
    }

    pub fn kind(&self) -> ContainerKind {
        self.inner.target.kind()
    }

    pub fn flavor(&self) -> Flavor {
        self.inner.flavor
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.flavor.is_readonly()
    }

    pub fn is_shallow(&self) -> bool {
        self.inner.flavor.is_shallow()
    }

    /// Whether two handles are the same wrapper.
    pub fn ptr_eq(&self, other: &Reactive) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn track_iteration(&self) {
        let target = &self.inner.target;
        self.inner
            .rt
            .track_slot(target.id(), &target.kind().iteration_slot());
    }

    /// Report and refuse a mutation through a read-only wrapper.
    fn refuse(&self, op: &'static str, slot: &Slot) -> bool {
        if !self.is_readonly() {
            return false;
        }
        self.inner.rt.report(ReactiveError::ReadonlyViolation {
            op,
            slot: slot.clone(),
        });
        true
    }

    fn require_array(&self, op: &'static str) -> Result<()> {
        match self.kind() {
            ContainerKind::Array => Ok(()),
            kind => Err(ReactiveError::UnsupportedOperation { op, kind }),
        }
    }

    fn wrap_child(&self, value: Value) -> Value {
        if self.is_shallow() {
            return value;
        }
        let rt = &self.inner.rt;
        let readonly = self.is_readonly();
        match value {
            Value::Composite(child) if readonly => Value::Reactive(rt.readonly(&child)),
            Value::Composite(child) => Value::Reactive(rt.reactive(&child)),
            Value::Ref(cell) if self.kind() == ContainerKind::Object => self.wrap_child(cell.get()),
            Value::Computed(computed) if self.kind() == ContainerKind::Object => {
                self.wrap_child(computed.get())
            }
            other => other,
        }
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("flavor", &self.inner.flavor)
            .field("target", &self.inner.target)
            .finish()
    }
}

impl Runtime {
    /// Deep reactive wrapper. Wrappers are returned unchanged.
    pub fn reactive<'a>(&self, target: impl Into<Target<'a>>) -> Reactive {
        match target.into() {
            Target::Wrapped(wrapper) => wrapper.clone(),
            Target::Raw(composite) => self.wrap(composite, Flavor::Reactive),
        }
    }

    /// Reactive wrapper that leaves children raw.
    pub fn shallow_reactive<'a>(&self, target: impl Into<Target<'a>>) -> Reactive {
        match target.into() {
            Target::Wrapped(wrapper) => wrapper.clone(),
            Target::Raw(composite) => self.wrap(composite, Flavor::ShallowReactive),
        }
    }

    /// Deep read-only view. A read-only wrapper is returned unchanged; a
    /// mutable wrapper yields the read-only view of the same composite.
    pub fn readonly<'a>(&self, target: impl Into<Target<'a>>) -> Reactive {
        match target.into() {
            Target::Wrapped(wrapper) if wrapper.is_readonly() => wrapper.clone(),
            Target::Wrapped(wrapper) => self.wrap(&wrapper.inner.target, Flavor::Readonly),
            Target::Raw(composite) => self.wrap(composite, Flavor::Readonly),
        }
    }

    /// Read-only view of the top level only.
    pub fn shallow_readonly<'a>(&self, target: impl Into<Target<'a>>) -> Reactive {
        match target.into() {
            Target::Wrapped(wrapper) if wrapper.is_readonly() => wrapper.clone(),
            Target::Wrapped(wrapper) => self.wrap(&wrapper.inner.target, Flavor::ShallowReadonly),
            Target::Raw(composite) => self.wrap(composite, Flavor::ShallowReadonly),
        }
    }

    /// Number of live cached wrappers.
    pub fn wrapper_count(&self) -> usize {
        self.inner
            .wrappers
            .borrow()
            .values()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    fn wrap(&self, target: &Composite, flavor: Flavor) -> Reactive {
        let key = (flavor, target.id());
        let cached = self.inner.wrappers.borrow().get(&key).and_then(Weak::upgrade);
        if let Some(inner) = cached {
            return Reactive { inner };
        }

        let inner = Rc::new(WrapperInner {
            rt: self.clone(),
            target: target.clone(),
            flavor,
        });
        let replaced = self
            .inner
            .wrappers
            .borrow_mut()
            .insert(key, Rc::downgrade(&inner));
        drop(replaced);
        trace!(owner = %target.id(), ?flavor, "wrapper created");
        Reactive { inner }
    }
}

// ---- Tests ----
