//! Composite values and the slot-access capability.
//!
//! A [`Composite`] is the *owner* half of the dependency graph's
//! (owner, slot) key. It is compared by identity ([`OwnerId`]), never by
//! content. Two container kinds exist: object-like (insertion-ordered string
//! keys) and array-like (dense indices). Both implement [`SlotAccess`], the
//! read/write/has/remove interface that reactive wrappers intercept.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::{Slot, Value};
use crate::error::{ReactiveError, Result};

/// Counter for generating unique owner IDs.
static OWNER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity of a composite value.
///
/// IDs are never reused, so a stale ID can at worst address an empty entry,
/// never somebody else's slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    fn next() -> Self {
        Self(OWNER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// The two container shapes a composite can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Object,
    Array,
}

impl ContainerKind {
    /// The synthetic slot that enumeration subscribes to and that adds and
    /// deletes notify.
    pub fn iteration_slot(self) -> Slot {
        match self {
            ContainerKind::Object => Slot::Iterate,
            ContainerKind::Array => Slot::Length,
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Object => f.write_str("object"),
            ContainerKind::Array => f.write_str("array"),
        }
    }
}

/// Raw, untracked access to the slots of a container.
///
/// Reactive wrappers implement tracking and triggering on top of this
/// interface; implementations only store data.
pub trait SlotAccess {
    /// Which container shape this is.
    fn kind(&self) -> ContainerKind;

    /// Rewrite a slot into the canonical form for this container.
    fn normalize(&self, slot: Slot) -> Slot {
        slot
    }

    /// Read a slot. `Ok(None)` means the slot is absent.
    fn read(&self, slot: &Slot) -> Result<Option<Value>>;

    /// Write a slot, returning the previous value if the slot existed.
    fn write(&mut self, slot: &Slot, value: Value) -> Result<Option<Value>>;

    /// Whether the slot exists.
    fn has(&self, slot: &Slot) -> Result<bool>;

    /// Remove a slot, returning the removed value if it existed.
    fn remove(&mut self, slot: &Slot) -> Result<Option<Value>>;

    /// Every present slot, in order.
    fn slots(&self) -> Vec<Slot>;

    /// Number of present slots.
    fn len(&self) -> usize;

    /// Whether no slots are present.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every slot, returning the removed values.
    fn clear(&mut self) -> Vec<Value>;

    /// The slot enumeration subscribes to.
    fn iteration_slot(&self) -> Slot {
        self.kind().iteration_slot()
    }
}

/// Insertion-ordered string-keyed storage.
#[derive(Debug, Default, Clone)]
pub struct ObjectData {
    entries: IndexMap<Rc<str>, Value>,
}

impl ObjectData {
    fn key_of(&self, slot: &Slot) -> Result<Rc<str>> {
        match slot {
            Slot::Key(key) => Ok(key.clone()),
            Slot::Index(index) => Ok(index.to_string().into()),
            Slot::Length => Ok("length".into()),
            Slot::Iterate => Err(ReactiveError::InvalidSlot {
                slot: slot.clone(),
                kind: ContainerKind::Object,
            }),
        }
    }
}

impl SlotAccess for ObjectData {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Object
    }

    fn normalize(&self, slot: Slot) -> Slot {
        match slot {
            Slot::Index(index) => Slot::Key(index.to_string().into()),
            Slot::Length => Slot::Key("length".into()),
            other => other,
        }
    }

    fn read(&self, slot: &Slot) -> Result<Option<Value>> {
        let key = self.key_of(slot)?;
        Ok(self.entries.get(&key).cloned())
    }

    fn write(&mut self, slot: &Slot, value: Value) -> Result<Option<Value>> {
        let key = self.key_of(slot)?;
        Ok(self.entries.insert(key, value))
    }

    fn has(&self, slot: &Slot) -> Result<bool> {
        let key = self.key_of(slot)?;
        Ok(self.entries.contains_key(&key))
    }

    fn remove(&mut self, slot: &Slot) -> Result<Option<Value>> {
        let key = self.key_of(slot)?;
        Ok(self.entries.shift_remove(&key))
    }

    fn slots(&self) -> Vec<Slot> {
        self.entries.keys().cloned().map(Slot::Key).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) -> Vec<Value> {
        self.entries.drain(..).map(|(_, value)| value).collect()
    }
}

/// Largest length an array-like container may reach.
pub const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

/// Interpret `value` as an array length: a non-negative integer no larger
/// than [`MAX_ARRAY_LENGTH`].
pub(crate) fn length_from(value: &Value) -> Result<usize> {
    value
        .as_f64()
        .filter(|n| *n >= 0.0 && n.fract() == 0.0 && *n <= MAX_ARRAY_LENGTH as f64)
        .map(|n| n as usize)
        .ok_or_else(|| ReactiveError::InvalidLength {
            value: format!("{value:?}"),
        })
}

/// Dense index-addressed storage.
#[derive(Debug, Default, Clone)]
pub struct ArrayData {
    items: Vec<Value>,
}

impl ArrayData {
    fn index_of(&self, slot: &Slot) -> Result<usize> {
        slot.as_index().ok_or_else(|| ReactiveError::InvalidSlot {
            slot: slot.clone(),
            kind: ContainerKind::Array,
        })
    }

    /// The stored items.
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    /// Resize to `len`, padding with `Null`. Returns the truncated tail.
    pub fn set_len(&mut self, len: usize) -> Result<Vec<Value>> {
        if len < self.items.len() {
            return Ok(self.items.split_off(len));
        }
        self.grow_to(len)?;
        Ok(Vec::new())
    }

    /// Pad with `Null` up to `len`, failing instead of aborting when the
    /// length is out of range or cannot be allocated.
    fn grow_to(&mut self, len: usize) -> Result<()> {
        let invalid = || ReactiveError::InvalidLength {
            value: len.to_string(),
        };
        if len > MAX_ARRAY_LENGTH {
            return Err(invalid());
        }
        let extra = len.saturating_sub(self.items.len());
        self.items.try_reserve(extra).map_err(|_| invalid())?;
        self.items.resize(len, Value::Null);
        Ok(())
    }

    /// Remove and return the last item.
    pub fn pop(&mut self) -> Option<Value> {
        self.items.pop()
    }
}

impl SlotAccess for ArrayData {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Array
    }

    fn normalize(&self, slot: Slot) -> Slot {
        match slot.as_index() {
            Some(index) => Slot::Index(index),
            None if matches!(&slot, Slot::Key(key) if &**key == "length") => Slot::Length,
            None => slot,
        }
    }

    fn read(&self, slot: &Slot) -> Result<Option<Value>> {
        if *slot == Slot::Length {
            return Ok(Some(Value::from(self.items.len())));
        }
        let index = self.index_of(slot)?;
        Ok(self.items.get(index).cloned())
    }

    fn write(&mut self, slot: &Slot, value: Value) -> Result<Option<Value>> {
        if *slot == Slot::Length {
            let len = length_from(&value)?;
            let old = self.items.len();
            drop(self.set_len(len)?);
            return Ok(Some(Value::from(old)));
        }
        let index = self.index_of(slot)?;
        if index < self.items.len() {
            return Ok(Some(std::mem::replace(&mut self.items[index], value)));
        }
        if index >= MAX_ARRAY_LENGTH {
            return Err(ReactiveError::InvalidSlot {
                slot: slot.clone(),
                kind: ContainerKind::Array,
            });
        }
        self.grow_to(index + 1)?;
        self.items[index] = value;
        Ok(None)
    }

    fn has(&self, slot: &Slot) -> Result<bool> {
        if *slot == Slot::Length {
            return Ok(true);
        }
        let index = self.index_of(slot)?;
        Ok(index < self.items.len())
    }

    fn remove(&mut self, slot: &Slot) -> Result<Option<Value>> {
        let index = self.index_of(slot)?;
        if index < self.items.len() {
            Ok(Some(self.items.remove(index)))
        } else {
            Ok(None)
        }
    }

    fn slots(&self) -> Vec<Slot> {
        (0..self.items.len()).map(Slot::Index).collect()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn clear(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.items)
    }
}

/// Storage of a composite: one of the two container kinds.
#[derive(Debug, Clone)]
pub enum Container {
    Object(ObjectData),
    Array(ArrayData),
}

impl Container {
    fn access(&self) -> &dyn SlotAccess {
        match self {
            Container::Object(data) => data,
            Container::Array(data) => data,
        }
    }

    fn access_mut(&mut self) -> &mut dyn SlotAccess {
        match self {
            Container::Object(data) => data,
            Container::Array(data) => data,
        }
    }

    /// The array storage, if this is an array.
    pub fn as_array(&self) -> Option<&ArrayData> {
        match self {
            Container::Array(data) => Some(data),
            Container::Object(_) => None,
        }
    }

    /// The array storage, if this is an array.
    pub fn as_array_mut(&mut self) -> Option<&mut ArrayData> {
        match self {
            Container::Array(data) => Some(data),
            Container::Object(_) => None,
        }
    }
}

impl SlotAccess for Container {
    fn kind(&self) -> ContainerKind {
        self.access().kind()
    }

    fn normalize(&self, slot: Slot) -> Slot {
        self.access().normalize(slot)
    }

    fn read(&self, slot: &Slot) -> Result<Option<Value>> {
        self.access().read(slot)
    }

    fn write(&mut self, slot: &Slot, value: Value) -> Result<Option<Value>> {
        self.access_mut().write(slot, value)
    }

    fn has(&self, slot: &Slot) -> Result<bool> {
        self.access().has(slot)
    }

    fn remove(&mut self, slot: &Slot) -> Result<Option<Value>> {
        self.access_mut().remove(slot)
    }

    fn slots(&self) -> Vec<Slot> {
        self.access().slots()
    }

    fn len(&self) -> usize {
        self.access().len()
    }

    fn clear(&mut self) -> Vec<Value> {
        self.access_mut().clear()
    }
}

struct CompositeInner {
    id: OwnerId,
    data: RefCell<Container>,
}

/// A shared, identity-compared composite value.
///
/// Cloning a `Composite` clones the handle, not the data. Reading and writing
/// through a `Composite` directly is untracked; wrap it with
/// [`Runtime::reactive`](crate::Runtime::reactive) to get notifications.
#[derive(Clone)]
pub struct Composite {
    inner: Rc<CompositeInner>,
}

impl Composite {
    fn with_container(data: Container) -> Self {
        Self {
            inner: Rc::new(CompositeInner {
                id: OwnerId::next(),
                data: RefCell::new(data),
            }),
        }
    }

    /// Create an object-like composite.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<Rc<str>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let entries = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();
        Self::with_container(Container::Object(ObjectData { entries }))
    }

    /// Create an array-like composite.
    pub fn array<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Self::with_container(Container::Array(ArrayData {
            items: items.into_iter().collect(),
        }))
    }

    /// The identity of this composite.
    pub fn id(&self) -> OwnerId {
        self.inner.id
    }

    /// Which container shape this is.
    pub fn kind(&self) -> ContainerKind {
        self.inner.data.borrow().kind()
    }

    /// Number of present slots (untracked).
    pub fn len(&self) -> usize {
        self.inner.data.borrow().len()
    }

    /// Whether no slots are present (untracked).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two handles refer to the same composite.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Untracked read. Missing slots read as `Null`.
    pub fn get(&self, slot: impl Into<Slot>) -> Result<Value> {
        let data = self.inner.data.borrow();
        let slot = data.normalize(slot.into());
        Ok(data.read(&slot)?.unwrap_or_default())
    }

    /// Untracked write. Nobody is notified.
    pub fn set_untracked(&self, slot: impl Into<Slot>, value: impl Into<Value>) -> Result<()> {
        let previous = {
            let mut data = self.inner.data.borrow_mut();
            let slot = data.normalize(slot.into());
            data.write(&slot, value.into().to_raw())?
        };
        drop(previous);
        Ok(())
    }

    /// Run `f` against the storage. `f` must not call back into user code.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&Container) -> R) -> R {
        f(&self.inner.data.borrow())
    }

    /// Run `f` against the storage mutably. `f` must not call back into user
    /// code, and values it evicts should be returned rather than dropped.
    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut Container) -> R) -> R {
        f(&mut self.inner.data.borrow_mut())
    }

    /// Canonical form of `slot` for this container.
    pub fn normalize(&self, slot: Slot) -> Slot {
        self.inner.data.borrow().normalize(slot)
    }

    /// Untracked JSON snapshot. Cycles serialize as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut path = HashSet::new();
        self.to_json_within(&mut path)
    }

    pub(crate) fn to_json_within(&self, path: &mut HashSet<OwnerId>) -> serde_json::Value {
        if !path.insert(self.id()) {
            return serde_json::Value::Null;
        }
        let data = self.inner.data.borrow().clone();
        let json = match &data {
            Container::Object(object) => serde_json::Value::Object(
                object
                    .entries
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_json_within(path)))
                    .collect(),
            ),
            Container::Array(array) => serde_json::Value::Array(
                array
                    .items
                    .iter()
                    .map(|value| value.to_json_within(path))
                    .collect(),
            ),
        };
        path.remove(&self.id());
        json
    }
}

impl fmt::Debug for Composite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Contents are left out: composites may be cyclic.
        f.debug_struct("Composite")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}
