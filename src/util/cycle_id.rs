//! Collection cycle identifiers.
//!
//! Every scrape-triggered collection cycle gets an identifier so the
//! remote calls it makes can be correlated in the logs.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Counter for cycle sequence numbers.
static CYCLE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier of one collection cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleId {
    id: String,
    sequence: u64,
}

impl CycleId {
    /// Create a new cycle ID.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sequence: CYCLE_COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Process-local sequence number; increases with every cycle.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Get the cycle ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}
