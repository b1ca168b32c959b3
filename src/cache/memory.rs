//! MemoryTier: in-process mapping from locator to decoded asset.
//!
//! Presence here means the asset is available with zero latency. The whole
//! tier is dropped on memory pressure via [`MemoryTier::flush`]; it never
//! touches the storage tier.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::locator::Locator;

/// Volatile locator -> asset map.
pub struct MemoryTier<A> {
    entries: Mutex<HashMap<Locator, Arc<A>>>,
}

impl<A> MemoryTier<A> {
    /// Create an empty tier.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up an asset. Never blocks on I/O, never fails.
    pub fn get(&self, locator: &Locator) -> Option<Arc<A>> {
        self.entries.lock().get(locator).cloned()
    }

    /// Insert an asset, replacing any previous entry for the locator.
    pub fn put(&self, locator: Locator, asset: Arc<A>) {
        self.entries.lock().insert(locator, asset);
    }

    /// Whether the locator is currently held.
    pub fn contains(&self, locator: &Locator) -> bool {
        self.entries.lock().contains_key(locator)
    }

    /// Drop every entry. Returns the number of entries removed.
    pub fn flush(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// Number of cached assets.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the tier is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<A> Default for MemoryTier<A> {
    fn default() -> Self {
        Self::new()
    }
}
