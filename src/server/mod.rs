//! HTTP surface of the binary.
//!
//! - [`api`]: routes for resolving assets and inspecting/flushing the cache

pub mod api;
