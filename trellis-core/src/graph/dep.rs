//! Subscriber sets.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::reactive::effect::EffectCore;
use crate::reactive::EffectId;
use crate::value::{OwnerId, Slot};

/// The ordered set of effects subscribed to one (owner, slot) pair, or to
/// a ref or computed value.
///
/// Iteration order is subscription order. An effect appears at most once.
pub struct Dep {
    key: Option<(OwnerId, Slot)>,
    subscribers: RefCell<IndexMap<EffectId, Weak<EffectCore>>>,
}

impl Dep {
    pub(crate) fn keyed(owner: OwnerId, slot: Slot) -> Rc<Self> {
        Rc::new(Self {
            key: Some((owner, slot)),
            subscribers: RefCell::new(IndexMap::new()),
        })
    }

    /// A set that lives outside the dependency graph.
    pub(crate) fn detached() -> Rc<Self> {
        Rc::new(Self {
            key: None,
            subscribers: RefCell::new(IndexMap::new()),
        })
    }

    /// The (owner, slot) this set belongs to, or `None` for detached sets.
    pub fn key(&self) -> Option<&(OwnerId, Slot)> {
        self.key.as_ref()
    }

    /// Subscribe an effect. Returns `false` if it was already subscribed.
    pub(crate) fn insert(&self, effect: &Rc<EffectCore>) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        if subscribers.contains_key(&effect.id()) {
            return false;
        }
        subscribers.insert(effect.id(), Rc::downgrade(effect));
        true
    }

    pub(crate) fn remove(&self, id: EffectId) {
        self.subscribers.borrow_mut().shift_remove(&id);
    }

    /// Whether the effect is subscribed.
    pub fn contains(&self, id: EffectId) -> bool {
        self.subscribers.borrow().contains_key(&id)
    }

    /// Strong handles to the live subscribers, in subscription order.
    ///
    /// Taking a snapshot lets callers run effects that modify this very set.
    pub(crate) fn snapshot(&self) -> Vec<Rc<EffectCore>> {
        self.subscribers
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("key", &self.key)
            .field("subscribers", &self.len())
            .finish()
    }
}
