//! Cache counters.
//!
//! Updated lock-free from the resolve path and the load tasks; read as a
//! serializable snapshot for logging and the HTTP surface.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters owned by one cache instance.
#[derive(Debug, Default)]
pub struct CacheStats {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
    fetch_failures: AtomicU64,
    decode_failures: AtomicU64,
    persist_failures: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Resolves answered from the memory tier.
    pub memory_hits: u64,
    /// Loads answered from the storage tier.
    pub disk_hits: u64,
    /// Fetcher invocations.
    pub fetches: u64,
    /// Waiters attached to an already running load.
    pub coalesced: u64,
    /// Loads that ended with `absent` (fetch or fresh decode error).
    pub fetch_failures: u64,
    /// Decode errors, both on rehydration and on fresh fetches.
    pub decode_failures: u64,
    /// Storage writes that failed.
    pub persist_failures: u64,
    /// Entries currently in the memory tier.
    pub memory_entries: usize,
}

impl CacheStats {
    pub(crate) fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters out.
    pub fn snapshot(&self, memory_entries: usize) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            memory_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = CacheStats::default();
        stats.record_memory_hit();
        stats.record_memory_hit();
        stats.record_fetch();
        stats.record_persist_failure();

        let snap = stats.snapshot(3);
        assert_eq!(snap.memory_hits, 2);
        assert_eq!(snap.fetches, 1);
        assert_eq!(snap.persist_failures, 1);
        assert_eq!(snap.disk_hits, 0);
        assert_eq!(snap.memory_entries, 3);
    }
}
