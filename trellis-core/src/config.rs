//! Runtime configuration.
//!
//! A [`RuntimeConfig`] is fixed when the runtime is built. Every field has a
//! default, so partial JSON documents are accepted.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default number of times a single job may run within one flush.
pub const DEFAULT_RECURSION_LIMIT: usize = 100;

/// Tunables for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many times one job may execute during a single top-level flush
    /// before it is skipped and reported.
    pub recursion_limit: usize,

    /// Catch panics raised by effect bodies, scheduler callbacks and jobs at
    /// the point of invocation and report them instead of unwinding through
    /// the caller. Turning this off is useful under a debugger.
    pub catch_panics: bool,

    /// Drop a subscriber set from the dependency graph as soon as its last
    /// subscriber leaves.
    pub prune_empty_deps: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            catch_panics: true,
            prune_empty_deps: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Override the recursion limit.
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Override panic catching.
    pub fn with_catch_panics(mut self, catch: bool) -> Self {
        self.catch_panics = catch;
        self
    }
}
