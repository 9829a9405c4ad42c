//! Trellis Core
//!
//! This crate provides the fine-grained reactivity engine used by Trellis.
//! It implements:
//!
//! - Dependency tracking keyed by (owner, slot) pairs
//! - Reactive wrappers over object-like and array-like values
//! - Cells (refs), lazily cached computed values, effects and watchers
//! - An ordered, deduplicated job scheduler with post-flush callbacks
//!
//! Everything hangs off a single [`Runtime`] context object. There are no
//! process-wide globals: two runtimes never observe each other.
//!
//! # Architecture
//!
//! Modules, leaves first:
//!
//! - `value`: the dynamic value model (composites, slots, equality)
//! - `graph`: the dependency graph and subscriber sets
//! - `reactive`: the runtime, effects, cells, computed values and wrappers
//! - `scheduler`: the job queue, post-flush queue and `next_tick`
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use trellis_core::{Composite, Runtime, Value};
//!
//! let rt = Runtime::new();
//! let state = rt.reactive(&Composite::object([("count", Value::from(0))]));
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let log = seen.clone();
//! let reader = state.clone();
//! let _effect = rt.effect(move || {
//!     log.borrow_mut().push(reader.get("count").unwrap());
//! });
//!
//! state.set("count", 0).unwrap(); // same value, no re-run
//! state.set("count", 1).unwrap();
//! assert_eq!(*seen.borrow(), vec![Value::from(0), Value::from(1)]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod scheduler;
pub mod value;

pub use config::RuntimeConfig;
pub use error::{ReactiveError, Result};
pub use graph::TriggerKind;
pub use reactive::{
    Computed, Effect, EffectId, EffectOptions, FlushTiming, Flavor, Reactive, Ref, Runtime,
    Target, WatchHandle, WatchOptions, WeakEffect,
};
pub use scheduler::{Job, NextTick};
pub use value::{
    Composite, ContainerKind, OwnerId, ReactiveValue, SameValue, Slot, SlotAccess, Value,
    ValueKind, MAX_ARRAY_LENGTH,
};
