//! Set of playable stream names

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;

/// Shared set of playlist file names that are currently live
///
/// Cheap to clone; all clones see the same set.
#[derive(Debug, Clone, Default)]
pub struct LivenessSet {
    inner: Arc<RwLock<BTreeSet<String>>>,
}

impl LivenessSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a name, returning `true` if it was not present
    pub fn insert(&self, name: impl Into<String>) -> bool {
        self.inner.write().insert(name.into())
    }

    /// Remove a name, returning `true` if it was present
    pub fn remove(&self, name: &str) -> bool {
        self.inner.write().remove(name)
    }

    /// Check if a name is live
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains(name)
    }

    /// Sorted copy of the live names
    pub fn snapshot(&self) -> Vec<String> {
        self.inner.read().iter().cloned().collect()
    }

    /// Whether any stream is live
    pub fn is_live(&self) -> bool {
        !self.inner.read().is_empty()
    }

    /// Number of live names
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
