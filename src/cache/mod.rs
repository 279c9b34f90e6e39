//! Durable cache store for offline operation.
//!
//! This module provides the request→response store the agent works against:
//! - Responses are grouped into named caches, one per agent version
//! - A whole cache is written in one transaction or not at all
//! - Lookups can span every cache, not only the current one

mod storage;
mod traits;

pub use storage::SqliteStorage;
pub use traits::{CacheEntry, CacheStorage, CachedResponse, EntrySummary, ResponseSource, Served};
