//! Subscriber identity.
//!
//! Every effect (plain, computed or watcher) is a subscriber. Its ID is
//! assigned by the owning runtime in creation order, which is also the order
//! the scheduler runs its job in: parents are created before their children,
//! so they flush first.

use std::fmt;

/// Unique identifier for an effect within one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
