//! Core traits and types for the cache store.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::net::Response;

/// One request→response pair to be written into a cache.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  /// Normalized request URL (see `Request::cache_key`)
  pub key: String,
  pub response: Response,
}

/// A hit from the cache store.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// Cache identifier the entry lives in
  pub cache_name: String,
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Listing row for a stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
  pub key: String,
  pub status: u16,
  pub size: usize,
}

/// Trait for cache storage backends.
///
/// A store holds any number of named caches (one per agent version).
/// Writes happen only during lifecycle events; interception only reads.
pub trait CacheStorage: Send + Sync {
  /// Whether a cache with this identifier exists.
  fn has(&self, cache: &str) -> Result<bool>;

  /// All cache identifiers, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Create `cache` if needed and store every entry atomically.
  /// On error nothing is written, not even the cache itself.
  fn put_all(&self, cache: &str, entries: &[CacheEntry]) -> Result<()>;

  /// Look up a key in one cache.
  fn match_in(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Look up a key across all caches, oldest cache first.
  fn match_any(&self, key: &str) -> Result<Option<CachedResponse>>;

  /// Delete a cache and all its entries. Returns false if it did not exist.
  fn delete(&self, cache: &str) -> Result<bool>;

  /// Entries stored in a cache, ordered by key.
  fn entries(&self, cache: &str) -> Result<Vec<EntrySummary>>;
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Served from the cache store
  Cache,
  /// Live response from the network
  Network,
  /// Network failed, the cached shell was served instead
  ShellFallback,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ResponseSource::Cache => write!(f, "cache"),
      ResponseSource::Network => write!(f, "network"),
      ResponseSource::ShellFallback => write!(f, "shell fallback"),
    }
  }
}

/// A resolved response together with its source.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
}

impl Served {
  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
    }
  }

  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  pub fn shell_fallback(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::ShellFallback,
    }
  }
}
