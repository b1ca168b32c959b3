//! Two-tier asset cache.
//!
//! This module contains the cache data structures and the coordinator:
//! - [`locator`]: Locator, the cache key
//! - [`memory`]: MemoryTier, volatile decoded assets
//! - [`coordinator`]: AssetCache, tier lookup + coalesced loading
//! - [`dispatch`]: serialized delivery of completion callbacks
//! - [`stats`]: hit/miss counters

pub mod coordinator;
pub mod dispatch;
pub mod locator;
pub mod memory;
pub mod stats;
