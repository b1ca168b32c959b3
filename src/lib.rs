//! lazy-asset-cache: two-tier asset cache with scroll-aware row binding.
//!
//! Given a locator, [`AssetCache`] returns a decoded asset from memory, from
//! the on-disk tier, or by fetching it exactly once no matter how many callers
//! ask concurrently. [`RowBindingCoordinator`] sits on top for list UIs: it
//! remembers which locator each row wants and only hands a result to a row
//! that still wants it.

pub mod cache;
pub mod config;
pub mod rows;
pub mod server;
pub mod transfer;

pub use cache::coordinator::{AssetCache, AssetCacheBuilder, LoadError, ResolveOptions};
pub use cache::locator::Locator;
pub use cache::stats::CacheStatsSnapshot;
pub use rows::binding::{BindingState, RowBindingCoordinator, RowSink};
pub use rows::source::RowSource;
pub use transfer::decoder::{BytesDecoder, DecodeError, Decoder, JsonDecoder};
pub use transfer::disk_io::{PersistError, StorageTier};
pub use transfer::fetcher::{FetchError, Fetcher, FileFetcher, HttpFetcher, SchemeFetcher};
