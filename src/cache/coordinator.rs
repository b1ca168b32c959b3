//! Fetch coordinator: the two-tier cache with in-flight request coalescing.
//!
//! Resolution order for a locator:
//! 1. Memory tier hit: the callback is scheduled with the asset.
//! 2. A load for the locator is already running: the callback is attached to
//!    it as one more waiter, no new work starts.
//! 3. Otherwise a load starts. It consults the storage tier first; a stored
//!    entry that fails to decode is treated as a miss and the asset is
//!    fetched once. Fresh bytes are persisted (best effort), the decoded asset
//!    goes into the memory tier, the registry entry is removed and every
//!    waiter is called back, in registration order.
//!
//! Failures of any kind end as `None` delivered to every waiter. Nothing is
//! cached negatively: the next resolve after a failure starts a new load.
//! Callbacks always run on the delivery task, never inline.
//!
//! In-flight loads cannot be cancelled; a load whose waiters have all lost
//! interest still runs to completion and populates the tiers.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::dispatch::Dispatcher;
use crate::cache::locator::Locator;
use crate::cache::memory::MemoryTier;
use crate::cache::stats::{CacheStats, CacheStatsSnapshot};
use crate::config::Config;
use crate::transfer::decoder::{DecodeError, Decoder};
use crate::transfer::disk_io::{PersistError, StorageTier};
use crate::transfer::fetcher::{FetchError, Fetcher};

/// Why a load produced no asset. Logged, never returned to callers.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("load task panicked")]
    Panicked,
}

/// Per-request knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Write freshly fetched bytes to the storage tier.
    pub persist: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self { persist: true }
    }
}

type Waiter<A> = Box<dyn FnOnce(Option<Arc<A>>) + Send + 'static>;

/// Registry entry for one running load.
struct InFlight<A> {
    waiters: Vec<Waiter<A>>,
    persist: bool,
}

struct Inner<D: Decoder> {
    memory: MemoryTier<D::Asset>,
    storage: Option<StorageTier>,
    in_flight: Mutex<HashMap<Locator, InFlight<D::Asset>>>,
    fetcher: Arc<dyn Fetcher>,
    decoder: Arc<D>,
    dispatcher: Dispatcher,
    runtime: Handle,
    stats: CacheStats,
    default_options: ResolveOptions,
}

/// Handle to a cache instance. Clones share the same tiers and registry.
///
/// The instance lives as long as any handle; construct one per process (or
/// one per test) and pass handles to whoever needs the cache.
pub struct AssetCache<D: Decoder> {
    inner: Arc<Inner<D>>,
}

impl<D: Decoder> Clone for AssetCache<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`AssetCache`].
pub struct AssetCacheBuilder<D: Decoder> {
    fetcher: Arc<dyn Fetcher>,
    decoder: D,
    storage: Option<StorageTier>,
    runtime: Option<Handle>,
    default_options: ResolveOptions,
}

impl<D: Decoder> AssetCacheBuilder<D> {
    /// Enable the storage tier.
    pub fn storage(mut self, storage: StorageTier) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Whether `resolve_with` persists fetched bytes (default `true`).
    pub fn persist_by_default(mut self, persist: bool) -> Self {
        self.default_options.persist = persist;
        self
    }

    /// Runtime used for loads and deliveries. Defaults to the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the cache.
    ///
    /// # Panics
    ///
    /// Panics if no runtime was given and this is called outside a tokio
    /// runtime.
    pub fn build(self) -> AssetCache<D> {
        let runtime = self.runtime.unwrap_or_else(Handle::current);
        let dispatcher = Dispatcher::spawn(&runtime);

        AssetCache {
            inner: Arc::new(Inner {
                memory: MemoryTier::new(),
                storage: self.storage,
                in_flight: Mutex::new(HashMap::new()),
                fetcher: self.fetcher,
                decoder: Arc::new(self.decoder),
                dispatcher,
                runtime,
                stats: CacheStats::default(),
                default_options: self.default_options,
            }),
        }
    }
}

impl<D: Decoder> AssetCache<D> {
    /// Start building a cache around the injected fetch and decode primitives.
    pub fn builder(fetcher: Arc<dyn Fetcher>, decoder: D) -> AssetCacheBuilder<D> {
        AssetCacheBuilder {
            fetcher,
            decoder,
            storage: None,
            runtime: None,
            default_options: ResolveOptions::default(),
        }
    }

    /// Build a cache from configuration, opening the storage directory.
    pub async fn from_config(
        config: &Config,
        fetcher: Arc<dyn Fetcher>,
        decoder: D,
    ) -> Result<Self, PersistError> {
        let storage = StorageTier::new(&config.cache.directory).await?;
        info!(
            directory = %storage.root().display(),
            persist = config.cache.persist,
            "Asset cache ready"
        );

        Ok(Self::builder(fetcher, decoder)
            .storage(storage)
            .persist_by_default(config.cache.persist)
            .build())
    }

    /// Resolve a locator with the default options.
    pub fn resolve_with<F>(&self, locator: Locator, on_complete: F)
    where
        F: FnOnce(Option<Arc<D::Asset>>) + Send + 'static,
    {
        self.resolve_with_options(locator, self.inner.default_options, on_complete);
    }

    /// Resolve a locator; `on_complete` is always invoked exactly once, later,
    /// on the delivery task, with the asset or `None` on failure.
    pub fn resolve_with_options<F>(&self, locator: Locator, options: ResolveOptions, on_complete: F)
    where
        F: FnOnce(Option<Arc<D::Asset>>) + Send + 'static,
    {
        let inner = &self.inner;
        let waiter: Waiter<D::Asset> = Box::new(on_complete);

        // The registry lock is held across the memory check: a load inserts
        // into memory before it leaves the registry, so a miss here can never
        // race past a completing load.
        let mut in_flight = inner.in_flight.lock();

        if let Some(asset) = inner.memory.get(&locator) {
            drop(in_flight);
            inner.stats.record_memory_hit();
            debug!(locator = %locator, "Memory hit");
            inner.dispatcher.schedule(move || waiter(Some(asset)));
            return;
        }

        let start = match in_flight.entry(locator.clone()) {
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry.waiters.push(waiter);
                entry.persist |= options.persist;
                inner.stats.record_coalesced();
                debug!(
                    locator = %locator,
                    waiters = entry.waiters.len(),
                    "Attached to in-flight load"
                );
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(InFlight {
                    waiters: vec![waiter],
                    persist: options.persist,
                });
                true
            }
        };
        drop(in_flight);

        if start {
            let inner = Arc::clone(inner);
            self.inner.runtime.spawn(async move {
                inner.load(locator).await;
            });
        }
    }

    /// Resolve a locator and await the result.
    pub async fn resolve(&self, locator: Locator) -> Option<Arc<D::Asset>> {
        let (tx, rx) = oneshot::channel();
        self.resolve_with(locator, move |asset| {
            let _ = tx.send(asset);
        });
        rx.await.ok().flatten()
    }

    /// Resolve many locators concurrently, results in input order.
    pub async fn resolve_all<I>(&self, locators: I) -> Vec<Option<Arc<D::Asset>>>
    where
        I: IntoIterator<Item = Locator>,
    {
        join_all(locators.into_iter().map(|locator| self.resolve(locator))).await
    }

    /// Put an already decoded asset into the memory tier.
    ///
    /// The storage tier is not touched.
    pub fn insert(&self, locator: Locator, asset: impl Into<Arc<D::Asset>>) {
        debug!(locator = %locator, "Inserted asset");
        self.inner.memory.put(locator, asset.into());
    }

    /// Memory-tier lookup without scheduling anything.
    pub fn peek(&self, locator: &Locator) -> Option<Arc<D::Asset>> {
        self.inner.memory.get(locator)
    }

    /// Drop every memory-tier entry (memory pressure). Stored files stay.
    pub fn flush_memory(&self) -> usize {
        let removed = self.inner.memory.flush();
        info!(removed, "Flushed memory tier");
        removed
    }

    /// Whether a load for the locator is currently running.
    pub fn is_loading(&self, locator: &Locator) -> bool {
        self.inner.in_flight.lock().contains_key(locator)
    }

    /// Number of loads currently running.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// The storage tier, if enabled.
    pub fn storage(&self) -> Option<&StorageTier> {
        self.inner.storage.as_ref()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot(self.inner.memory.len())
    }

    /// Wait until every callback scheduled so far has run.
    pub async fn settled(&self) {
        self.inner.dispatcher.settled().await;
    }
}

impl<D: Decoder> Inner<D> {
    async fn load(self: Arc<Self>, locator: Locator) {
        let outcome = AssertUnwindSafe(self.load_from_tiers(&locator))
            .catch_unwind()
            .await
            .unwrap_or(Err(LoadError::Panicked));

        let asset = match outcome {
            Ok(asset) => Some(asset),
            Err(e) => {
                self.stats.record_fetch_failure();
                warn!(locator = %locator, error = %e, "Load failed");
                None
            }
        };

        let waiters = self
            .in_flight
            .lock()
            .remove(&locator)
            .map(|entry| entry.waiters)
            .unwrap_or_default();

        debug!(
            locator = %locator,
            waiters = waiters.len(),
            found = asset.is_some(),
            "Load complete"
        );

        for waiter in waiters {
            let asset = asset.clone();
            self.dispatcher.schedule(move || waiter(asset));
        }
    }

    async fn load_from_tiers(&self, locator: &Locator) -> Result<Arc<D::Asset>, LoadError> {
        if let Some(storage) = &self.storage {
            if let Some(bytes) = storage.read_bytes(locator).await {
                match self.decode(bytes).await {
                    Ok(asset) => {
                        self.stats.record_disk_hit();
                        debug!(locator = %locator, "Disk hit");
                        let asset = Arc::new(asset);
                        self.memory.put(locator.clone(), Arc::clone(&asset));
                        return Ok(asset);
                    }
                    Err(e) => {
                        self.stats.record_decode_failure();
                        warn!(locator = %locator, error = %e, "Corrupt disk entry, fetching again");
                    }
                }
            }
        }

        self.stats.record_fetch();
        debug!(locator = %locator, "Fetching");
        let bytes = self.fetcher.fetch(locator).await?;

        let asset = match self.decode(bytes.clone()).await {
            Ok(asset) => asset,
            Err(e) => {
                self.stats.record_decode_failure();
                return Err(e.into());
            }
        };

        if self.wants_persist(locator) {
            if let Some(storage) = &self.storage {
                if let Err(e) = storage.write_bytes(locator, &bytes).await {
                    self.stats.record_persist_failure();
                    warn!(locator = %locator, error = %e, "Failed to persist asset");
                }
            }
        }

        let asset = Arc::new(asset);
        self.memory.put(locator.clone(), Arc::clone(&asset));
        Ok(asset)
    }

    fn wants_persist(&self, locator: &Locator) -> bool {
        self.in_flight
            .lock()
            .get(locator)
            .is_some_and(|entry| entry.persist)
    }

    async fn decode(&self, bytes: Bytes) -> Result<D::Asset, DecodeError> {
        let decoder = Arc::clone(&self.decoder);
        tokio::task::spawn_blocking(move || decoder.decode(&bytes))
            .await
            .unwrap_or_else(|e| Err(DecodeError::Malformed(format!("decoder task failed: {e}"))))
    }
}
