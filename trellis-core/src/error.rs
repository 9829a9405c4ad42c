//! Error types for the reactive engine.

use thiserror::Error;

use crate::reactive::EffectId;
use crate::value::{ContainerKind, Slot};

/// Convenience alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors raised or reported by the engine.
///
/// Only the trap-level faults (`InvalidSlot`, `InvalidLength`,
/// `UnsupportedOperation`) and `Config` are ever returned to a caller. The
/// rest are *reported* through [`Runtime::report`](crate::Runtime::report) and
/// the operation that produced them degrades to a no-op.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A mutation was attempted through a read-only wrapper.
    #[error("{op} operation on slot `{slot}` failed: target is readonly")]
    ReadonlyViolation { op: &'static str, slot: Slot },

    /// A computed value without a setter was written.
    #[error("write operation failed: computed value is readonly")]
    ReadonlyComputed,

    /// The slot cannot address anything in this kind of container.
    #[error("slot `{slot}` is not valid on {kind} container")]
    InvalidSlot { slot: Slot, kind: ContainerKind },

    /// An array length was set to something other than a non-negative integer.
    #[error("invalid array length: {value}")]
    InvalidLength { value: String },

    /// The operation only exists for the other container kind.
    #[error("{op} is not supported on {kind} container")]
    UnsupportedOperation { op: &'static str, kind: ContainerKind },

    /// An effect body or scheduler callback panicked while being notified.
    #[error("effect {id} panicked: {message}")]
    EffectPanicked { id: EffectId, message: String },

    /// A scheduled job or post-flush callback panicked during a flush.
    #[error("scheduled job {id:?} panicked: {message}")]
    JobPanicked { id: Option<u64>, message: String },

    /// A job re-queued itself more often than the configured limit allows
    /// within one flush.
    #[error("maximum recursive updates exceeded: job {id:?} ran more than {limit} times in one flush")]
    RecursionLimitExceeded { id: Option<u64>, limit: usize },

    /// Runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl ReactiveError {
    /// Whether this error is a warning about misuse rather than a fault.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            ReactiveError::ReadonlyViolation { .. } | ReactiveError::ReadonlyComputed
        )
    }
}
