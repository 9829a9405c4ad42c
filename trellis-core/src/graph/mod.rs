//! Dependency Graph
//!
//! This module records which effects read which (owner, slot) pairs.
//!
//! # Overview
//!
//! The graph is a two-level index:
//!
//! - The outer level maps an [`OwnerId`] to the slots of that owner that
//!   anybody has read.
//! - The inner level maps each [`Slot`] to a [`Dep`], the ordered set of
//!   effects subscribed to it.
//!
//! Edges are kept in both directions: a `Dep` knows its subscribers, and
//! every effect keeps the `Dep`s it joined so that re-running or stopping it
//! can unsubscribe in O(memberships).
//!
//! # Design Decisions
//!
//! 1. Subscriber sets hold weak references. The graph never keeps an effect
//!    alive, and an effect that is dropped unsubscribes itself.
//!
//! 2. Owners are addressed by ID rather than by handle, so the graph does
//!    not keep composite values alive either.
//!
//! 3. Refs and computed values carry their own detached `Dep` instead of an
//!    entry here; they are their own owner with a single slot.

mod dep;

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

pub use dep::Dep;

use crate::value::{OwnerId, Slot};

/// The kind of mutation being reported to [`Runtime::trigger`](crate::Runtime::trigger).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// A slot that did not exist before was written.
    Add,
    /// An existing slot was overwritten with a different value.
    Set,
    /// An existing slot was removed.
    Delete,
    /// Every slot of the owner was removed at once.
    Clear,
}

impl TriggerKind {
    /// Whether this mutation changes the set of keys, and so must also
    /// notify enumeration.
    pub fn changes_shape(self) -> bool {
        matches!(self, TriggerKind::Add | TriggerKind::Delete | TriggerKind::Clear)
    }
}

/// The owner → slot → subscriber-set index.
#[derive(Default)]
pub struct DependencyGraph {
    owners: HashMap<OwnerId, IndexMap<Slot, Rc<Dep>>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the subscriber set for a slot, creating it if needed.
    pub fn dep_for(&mut self, owner: OwnerId, slot: &Slot) -> Rc<Dep> {
        self.owners
            .entry(owner)
            .or_default()
            .entry(slot.clone())
            .or_insert_with(|| Dep::keyed(owner, slot.clone()))
            .clone()
    }

    /// Get the subscriber set for a slot, if anybody ever subscribed.
    pub fn get(&self, owner: OwnerId, slot: &Slot) -> Option<Rc<Dep>> {
        self.owners.get(&owner)?.get(slot).cloned()
    }

    /// Every subscriber set of an owner.
    pub fn deps_of(&self, owner: OwnerId) -> Vec<Rc<Dep>> {
        self.owners
            .get(&owner)
            .map(|slots| slots.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The subscriber sets a mutation of `kind` on `slots` must notify.
    ///
    /// Shape-changing mutations also notify `iteration_slot`. `Clear`
    /// notifies every set of the owner.
    pub fn affected(
        &self,
        owner: OwnerId,
        kind: TriggerKind,
        slots: &[Slot],
        iteration_slot: &Slot,
    ) -> Vec<Rc<Dep>> {
        let Some(index) = self.owners.get(&owner) else {
            return Vec::new();
        };

        if kind == TriggerKind::Clear {
            return index.values().cloned().collect();
        }

        let mut deps: Vec<Rc<Dep>> = slots.iter().filter_map(|slot| index.get(slot).cloned()).collect();
        if kind.changes_shape() {
            if let Some(dep) = index.get(iteration_slot) {
                deps.push(dep.clone());
            }
        }
        deps
    }

    /// Remove `dep` from the index if it is empty and still the registered
    /// set for its key.
    pub fn prune(&mut self, dep: &Dep) {
        let Some((owner, slot)) = dep.key() else {
            return;
        };
        if !dep.is_empty() {
            return;
        }
        let Some(slots) = self.owners.get_mut(owner) else {
            return;
        };
        if slots
            .get(slot)
            .is_some_and(|registered| std::ptr::eq(Rc::as_ptr(registered), dep))
        {
            slots.shift_remove(slot);
            if slots.is_empty() {
                self.owners.remove(owner);
            }
        }
    }

    /// Forget every subscriber set of an owner. Returns how many were dropped.
    ///
    /// The sets themselves survive as long as some effect still lists them
    /// as a membership; they just stop receiving notifications.
    pub fn remove_owner(&mut self, owner: OwnerId) -> usize {
        self.owners.remove(&owner).map_or(0, |slots| slots.len())
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.owners.clear();
    }

    /// Number of owners with at least one subscriber set.
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Number of subscriber sets across all owners.
    pub fn dep_count(&self) -> usize {
        self.owners.values().map(IndexMap::len).sum()
    }
}

// ---- Tests ----
