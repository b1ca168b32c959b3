//! Moving bytes in and out of the cache.
//!
//! - [`disk_io`]: StorageTier, one file per locator
//! - [`fetcher`]: Fetcher capability and bundled file/HTTP fetchers
//! - [`decoder`]: Decoder capability and bundled decoders

pub mod decoder;
pub mod disk_io;
pub mod fetcher;
