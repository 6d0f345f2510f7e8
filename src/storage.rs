//! Persistent key/value snapshots of cache entries.
//!
//! Only a few entries are persisted (the signed-in user, so the app can start
//! offline). Rows are addressed by [`CacheKey::storage_hash`].

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::cache::CacheKey;

/// A persisted value and when it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<T> {
  pub value: T,
  pub cached_at: DateTime<Utc>,
}

/// Storage backend for cache snapshots.
pub trait SnapshotStore: Send + Sync {
  /// Write (or overwrite) the value stored under `key`.
  fn save<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()>;

  /// Read the value under `key`. A row that no longer deserializes is
  /// reported as an error, not a miss.
  fn load<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<Stored<T>>>;

  /// Delete the value under `key`; returns whether a row existed.
  fn remove(&self, key: &CacheKey) -> Result<bool>;
}

/// Store that keeps nothing. Used when persistence is turned off.
pub struct NoopStore;

impl SnapshotStore for NoopStore {
  fn save<T: Serialize>(&self, _key: &CacheKey, _value: &T) -> Result<()> {
    Ok(())
  }

  fn load<T: DeserializeOwned>(&self, _key: &CacheKey) -> Result<Option<Stored<T>>> {
    Ok(None)
  }

  fn remove(&self, _key: &CacheKey) -> Result<bool> {
    Ok(false)
  }
}

/// SQLite-backed snapshot store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (creating if needed) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open storage at {}: {}", path.display(), e))?;
    debug!(path = %path.display(), "opened snapshot store");
    Self::from_connection(conn)
  }

  /// Open the database at the platform data directory.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory storage: {}", e))?;
    Self::from_connection(conn)
  }

  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("natur").join("cache.db"))
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run storage migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    key_hash TEXT PRIMARY KEY,
    key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SnapshotStore for SqliteStore {
  fn save<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
    let data = serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO snapshots (key_hash, key, data, cached_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![key.storage_hash(), key.to_string(), data],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;
    Ok(())
  }

  fn load<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<Stored<T>>> {
    let conn = self.lock()?;
    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, cached_at FROM snapshots WHERE key_hash = ?",
        params![key.storage_hash()],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))?;

    match row {
      Some((data, cached_at)) => {
        let value =
          serde_json::from_slice(&data).map_err(|e| eyre!("Failed to deserialize {}: {}", key, e))?;
        Ok(Some(Stored {
          value,
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn remove(&self, key: &CacheKey) -> Result<bool> {
    let conn = self.lock()?;
    let deleted = conn
      .execute(
        "DELETE FROM snapshots WHERE key_hash = ?",
        params![key.storage_hash()],
      )
      .map_err(|e| eyre!("Failed to remove {}: {}", key, e))?;
    Ok(deleted > 0)
  }
}

/// SQLite `datetime('now')` format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::keys;
  use crate::api::types::User;

  fn user() -> User {
    User {
      id: 3,
      name: "Ana".to_string(),
      email: "ana@example.com".to_string(),
      role: Some("empresa".to_string()),
      avatar_url: None,
      bio: None,
      phone: None,
      website: None,
      company_id: Some(1),
    }
  }

  #[test]
  fn test_save_load_remove() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(store.load::<User>(&keys::me()).unwrap().is_none());

    store.save(&keys::me(), &user()).unwrap();
    let stored = store.load::<User>(&keys::me()).unwrap().unwrap();
    assert_eq!(stored.value, user());
    assert!(Utc::now() - stored.cached_at < chrono::Duration::minutes(1));

    assert!(store.remove(&keys::me()).unwrap());
    assert!(!store.remove(&keys::me()).unwrap());
    assert!(store.load::<User>(&keys::me()).unwrap().is_none());
  }

  #[test]
  fn test_keys_do_not_collide() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.save(&keys::user(3), &"three").unwrap();
    store.save(&keys::user(4), &"four").unwrap();
    store.save(&keys::user(3), &"three again").unwrap();

    let three = store.load::<String>(&keys::user(3)).unwrap().unwrap();
    let four = store.load::<String>(&keys::user(4)).unwrap().unwrap();
    assert_eq!(three.value, "three again");
    assert_eq!(four.value, "four");
  }

  #[test]
  fn test_schema_mismatch_is_an_error() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.save(&keys::me(), &"not a user").unwrap();
    assert!(store.load::<User>(&keys::me()).is_err());
  }

  #[test]
  fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    SqliteStore::open(&path).unwrap().save(&keys::me(), &user()).unwrap();
    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(reopened.load::<User>(&keys::me()).unwrap().unwrap().value, user());
  }

  #[test]
  fn test_noop_store_always_misses() {
    NoopStore.save(&keys::me(), &user()).unwrap();
    assert!(NoopStore.load::<User>(&keys::me()).unwrap().is_none());
  }
}
