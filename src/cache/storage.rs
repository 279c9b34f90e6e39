//! SQLite implementation of the cache store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheEntry, CacheStorage, CachedResponse, EntrySummary};
use crate::net::Response;

/// SQLite-based cache storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offcache").join("cache.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lookup(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Option<CachedResponse>> {
    let conn = self.conn()?;

    let row: Option<StoredRow> = conn
      .query_row(sql, args, |row| {
        Ok(StoredRow {
          cache_name: row.get(0)?,
          response_url: row.get(1)?,
          status: row.get(2)?,
          status_text: row.get(3)?,
          headers: row.get(4)?,
          body: row.get(5)?,
          cached_at: row.get(6)?,
        })
      })
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    row.map(StoredRow::into_cached).transpose()
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per cache identifier; position gives creation order
CREATE TABLE IF NOT EXISTS caches (
    position INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by normalized request URL
CREATE TABLE IF NOT EXISTS entries (
    cache_name TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, url),
    FOREIGN KEY (cache_name) REFERENCES caches(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_url ON entries(url);
"#;

/// Columns selected by every lookup, in `StoredRow` order.
const ENTRY_COLUMNS: &str =
  "e.cache_name, e.response_url, e.status, e.status_text, e.headers, e.body, e.cached_at";

struct StoredRow {
  cache_name: String,
  response_url: String,
  status: u16,
  status_text: String,
  headers: String,
  body: Vec<u8>,
  cached_at: String,
}

impl StoredRow {
  fn into_cached(self) -> Result<CachedResponse> {
    let headers: Vec<(String, String)> = serde_json::from_str(&self.headers)
      .map_err(|e| eyre!("Failed to parse stored headers for {}: {}", self.response_url, e))?;
    let cached_at = parse_datetime(&self.cached_at)?;

    Ok(CachedResponse {
      cache_name: self.cache_name,
      response: Response {
        url: self.response_url,
        status: self.status,
        status_text: self.status_text,
        headers,
        body: self.body,
      },
      cached_at,
    })
  }
}

impl CacheStorage for SqliteStorage {
  fn has(&self, cache: &str) -> Result<bool> {
    self
      .conn()?
      .query_row(
        "SELECT EXISTS(SELECT 1 FROM caches WHERE name = ?)",
        params![cache],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to check cache {}: {}", cache, e))
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY position")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn put_all(&self, cache: &str, entries: &[CacheEntry]) -> Result<()> {
    let mut conn = self.conn()?;

    // Dropping the transaction without commit rolls everything back
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![cache])
      .map_err(|e| eyre!("Failed to create cache {}: {}", cache, e))?;

    for entry in entries {
      let response = &entry.response;
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO entries
           (cache_name, url, response_url, status, status_text, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          cache,
          entry.key,
          response.url,
          response.status,
          response.status_text,
          headers,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to store entry {}: {}", entry.key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn match_in(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
    let sql = format!(
      "SELECT {} FROM entries e WHERE e.cache_name = ? AND e.url = ?",
      ENTRY_COLUMNS
    );
    self.lookup(&sql, &[&cache, &key])
  }

  fn match_any(&self, key: &str) -> Result<Option<CachedResponse>> {
    let sql = format!(
      "SELECT {} FROM entries e
       INNER JOIN caches c ON c.name = e.cache_name
       WHERE e.url = ?
       ORDER BY c.position
       LIMIT 1",
      ENTRY_COLUMNS
    );
    self.lookup(&sql, &[&key])
  }

  fn delete(&self, cache: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE cache_name = ?", params![cache])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", cache, e))?;
    let removed = tx
      .execute("DELETE FROM caches WHERE name = ?", params![cache])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn entries(&self, cache: &str) -> Result<Vec<EntrySummary>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT url, status, length(body) FROM entries WHERE cache_name = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let entries = stmt
      .query_map(params![cache], |row| {
        Ok(EntrySummary {
          key: row.get(0)?,
          status: row.get(1)?,
          size: row.get::<_, i64>(2)? as usize,
        })
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", cache, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    Ok(entries)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
