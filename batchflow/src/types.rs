//! Core value types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One unit of input flowing through a stage chain.
///
/// Opaque and immutable; stages thread it through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem(u64);

impl WorkItem {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }

    /// Enumerate `count` items with ids `0..count`.
    pub fn range(count: u64) -> Vec<WorkItem> {
        (0..count).map(WorkItem).collect()
    }
}

impl From<u64> for WorkItem {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
