//! Concurrency-safe set of in-flight stream UUIDs.
//!
//! Used to suppress duplicate recording dispatch: a stream UUID is inserted
//! when a recording job starts and removed when it finishes, whatever the
//! outcome.

use std::collections::HashSet;

use parking_lot::RwLock;

/// Thread-safe string set guarded by a single read-write lock.
#[derive(Debug, Default)]
pub struct StreamSet {
    items: RwLock<HashSet<String>>,
}

impl StreamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if an item exists in the set.
    pub fn contains(&self, key: &str) -> bool {
        self.items.read().contains(key)
    }

    /// Insert an item. Returns `false` if it was already present.
    pub fn insert(&self, key: impl Into<String>) -> bool {
        self.items.write().insert(key.into())
    }

    /// Remove an item from the set.
    pub fn remove(&self, key: &str) {
        self.items.write().remove(key);
    }

    /// Number of items currently held.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
