//! Reactive Primitives
//!
//! This module implements the core reactive system: the runtime, effects,
//! refs, computed values, reactive wrappers and watchers.
//!
//! # Concepts
//!
//! ## Wrappers
//!
//! A [`Reactive`] wrapper makes a composite value observable. Reading a slot
//! through it inside an effect subscribes the effect to that slot; writing a
//! slot through it notifies exactly those subscribers.
//!
//! ## Refs
//!
//! A [`Ref`] is a single observable value with its own subscriber set.
//!
//! ## Computed values
//!
//! A [`Computed`] is a derived value that caches its result and recomputes
//! lazily, only after something it read has changed.
//!
//! ## Effects
//!
//! An [`Effect`] is a side-effecting computation that re-runs whenever
//! something it read changes, either synchronously or through a scheduler.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered automatically: each runtime keeps a stack of
//! running effects, and every tracked read attributes itself to the top of
//! that stack.

mod cell;
mod computed;
mod context;
pub(crate) mod effect;
mod runtime;
mod subscriber;
mod watch;
mod wrapper;

pub use cell::Ref;
pub use computed::Computed;
pub use effect::{Effect, EffectOptions, WeakEffect};
pub use runtime::Runtime;
pub use subscriber::EffectId;
pub use watch::{FlushTiming, WatchHandle, WatchOptions};
pub use wrapper::{Flavor, Reactive, Target};
