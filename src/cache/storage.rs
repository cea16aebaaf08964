//! Versioned response cache: storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::key::CacheKey;
use super::traits::CachedResponse;
use crate::db::Database;
use crate::http::Response;

/// Trait for cache storage backends.
///
/// Every entry belongs to exactly one named version. Errors are storage
/// medium failures (I/O, quota, corruption) and are always returned.
pub trait CacheStorage: Send + Sync {
  /// Create the named version if it does not exist yet.
  fn create_version(&self, name: &str) -> Result<()>;

  /// Names of every version currently stored.
  fn list_versions(&self) -> Result<BTreeSet<String>>;

  /// Delete a version and all its entries. Returns whether it existed.
  fn delete_version(&self, name: &str) -> Result<bool>;

  /// Store snapshots, overwriting existing entries. All or nothing.
  fn put_entries(&self, version: &str, entries: Vec<(CacheKey, Response)>) -> Result<()>;

  /// Look up a snapshot.
  fn get_entry(&self, version: &str, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Stored keys of a version, in key order.
  fn entry_keys(&self, version: &str) -> Result<Vec<String>>;

  /// Open (creating if absent) the named version.
  fn open_version(&self, name: &str) -> Result<Cache<'_, Self>>
  where
    Self: Sized,
  {
    self.create_version(name)?;
    Ok(Cache {
      storage: self,
      version: name.to_string(),
    })
  }
}

/// Handle to a single cache version.
pub struct Cache<'a, S: CacheStorage> {
  storage: &'a S,
  version: String,
}

impl<S: CacheStorage> Cache<'_, S> {
  /// Store a snapshot. The response is consumed; clone it first if the
  /// caller still needs to hand it out.
  pub fn put(&self, key: &CacheKey, response: Response) -> Result<()> {
    self
      .storage
      .put_entries(&self.version, vec![(key.clone(), response)])
  }

  pub fn put_all(&self, entries: Vec<(CacheKey, Response)>) -> Result<()> {
    self.storage.put_entries(&self.version, entries)
  }

  pub fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>> {
    self.storage.get_entry(&self.version, key)
  }

  pub fn keys(&self) -> Result<Vec<String>> {
    self.storage.entry_keys(&self.version)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl CacheStorage for SqliteStorage {
  fn create_version(&self, name: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_versions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create cache version {}: {}", name, e))?;
    Ok(())
  }

  fn list_versions(&self) -> Result<BTreeSet<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_versions")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list cache versions: {}", e))?
      .collect::<rusqlite::Result<BTreeSet<String>>>()
      .map_err(|e| eyre!("Failed to read cache version: {}", e))?;

    Ok(names)
  }

  fn delete_version(&self, name: &str) -> Result<bool> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE version = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM cache_versions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache version {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put_entries(&self, version: &str, entries: Vec<(CacheKey, Response)>) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_versions (name) VALUES (?)",
      params![version],
    )
    .map_err(|e| eyre!("Failed to create cache version {}: {}", version, e))?;

    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
      let digest = body_digest(&response.body);

      tx.execute(
        "INSERT OR REPLACE INTO cache_entries
           (version, cache_key, status, status_text, headers, body, body_sha256, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          version,
          key.to_string(),
          response.status,
          response.status_text,
          headers,
          response.body,
          digest
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get_entry(&self, version: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;
    let key_str = key.to_string();

    let row: Option<(u16, String, String, Vec<u8>, String, String)> = conn
      .query_row(
        "SELECT status, status_text, headers, body, body_sha256, stored_at
         FROM cache_entries WHERE version = ? AND cache_key = ?",
        params![version, key_str],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key_str, e))?;

    let Some((status, status_text, headers, body, digest, stored_at)) = row else {
      return Ok(None);
    };

    if body_digest(&body) != digest {
      return Err(eyre!(
        "Cache entry {} in {} is corrupted (body digest mismatch)",
        key_str,
        version
      ));
    }

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key_str, e))?;

    Ok(Some(CachedResponse {
      response: Response {
        status,
        status_text,
        headers,
        body,
      },
      stored_at: parse_datetime(&stored_at)?,
    }))
  }

  fn entry_keys(&self, version: &str) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT cache_key FROM cache_entries WHERE version = ? ORDER BY cache_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![version], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list cache entries: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache entry key: {}", e))?;

    Ok(keys)
  }
}

fn body_digest(body: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(body);
  hex::encode(hasher.finalize())
}

/// Parse a datetime string from SQLite format.
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
