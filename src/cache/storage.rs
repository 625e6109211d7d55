//! Cache storage trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::http::{RequestKey, Response};

/// A stored response snapshot.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// The response as it was captured at write time
  pub response: Response,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// A backend holds named stores, each mapping request keys to response
/// snapshots. Writes are replace-by-key and atomic per key.
pub trait CacheStorage: Send + Sync {
  /// Open a store by name, creating it if absent.
  fn open(&self, store: &str) -> Result<()>;

  /// Whether a store with this name exists.
  fn has(&self, store: &str) -> Result<bool>;

  /// Names of all stores, oldest first.
  fn names(&self) -> Result<Vec<String>>;

  /// Delete a store and all its entries. Returns whether it existed.
  fn delete(&self, store: &str) -> Result<bool>;

  /// Look up a key in one store.
  fn lookup(&self, store: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store a response under `key`, replacing any previous entry.
  fn put(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store several responses at once; either all are written or none are.
  fn put_all(&self, store: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// URLs of the entries in a store.
  fn keys(&self, store: &str) -> Result<Vec<String>>;

  /// Look up a key across stores in order, returning the first hit.
  fn lookup_any(&self, stores: &[String], key: &RequestKey) -> Result<Option<CachedResponse>> {
    for store in stores {
      if let Some(hit) = self.lookup(store, key)? {
        return Ok(Some(hit));
      }
    }
    Ok(None)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at `path`, or at the default location when `None`.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway storage that lives only as long as this value.
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

    Ok(data_dir.join("swarden").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named stores, in creation order
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots; head is the JSON-encoded status line and headers
CREATE TABLE IF NOT EXISTS cache_entries (
    store TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    head TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_store ON cache_entries(store);
"#;

const INSERT_STORE: &str = "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)";

const UPSERT_ENTRY: &str =
  "INSERT OR REPLACE INTO cache_entries (store, request_key, url, head, body, cached_at)
   VALUES (?, ?, ?, ?, ?, datetime('now'))";

impl CacheStorage for SqliteStorage {
  fn open(&self, store: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(INSERT_STORE, params![store])
      .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;

    Ok(())
  }

  fn has(&self, store: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_stores WHERE name = ?",
        params![store],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query store {}: {}", store, e))?;

    Ok(found.is_some())
  }

  fn names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, store: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE store = ?", params![store])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", store, e))?;

    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete store {}: {}", store, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn lookup(&self, store: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT head, body, cached_at FROM cache_entries
         WHERE store = ? AND request_key = ?",
        params![store, key.hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key.url(), store, e))?;

    match row {
      Some((head, body, cached_at_str)) => {
        let mut response: Response = serde_json::from_str(&head)
          .map_err(|e| eyre!("Failed to deserialize cached response: {}", e))?;
        response.body = body;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedResponse {
          response,
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.put_all(store, &[(key.clone(), response.clone())])
  }

  fn put_all(&self, store: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(INSERT_STORE, params![store])
      .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;

    for (key, response) in entries {
      let head = serde_json::to_string(response)
        .map_err(|e| eyre!("Failed to serialize response: {}", e))?;

      tx.execute(
        UPSERT_ENTRY,
        params![store, key.hash(), key.url(), head, response.body],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key.url(), e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn keys(&self, store: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT url FROM cache_entries WHERE store = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let urls = stmt
      .query_map(params![store], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", store, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry url: {}", e))?;

    Ok(urls)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::ResponseKind;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    RequestKey::for_url(&Url::parse("https://app.test").unwrap().join(path).unwrap())
  }

  fn response(body: &str) -> Response {
    let mut resp = Response::synthetic(200, "OK", "text/plain", body);
    resp.kind = ResponseKind::Basic;
    resp
  }

  #[test]
  fn test_put_then_lookup_returns_snapshot() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("s", &key("/a"), &response("alpha")).unwrap();

    let hit = storage.lookup("s", &key("/a")).unwrap().unwrap();
    assert_eq!(hit.response.body, b"alpha");
    assert_eq!(hit.response.status, 200);
    assert_eq!(hit.response.kind, ResponseKind::Basic);
    assert_eq!(hit.response.content_type(), Some("text/plain"));
  }

  #[test]
  fn test_put_replaces_by_key() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("s", &key("/a"), &response("old")).unwrap();
    storage.put("s", &key("/a"), &response("new")).unwrap();

    let hit = storage.lookup("s", &key("/a")).unwrap().unwrap();
    assert_eq!(hit.response.body, b"new");
    assert_eq!(storage.keys("s").unwrap(), vec!["https://app.test/a"]);
  }

  #[test]
  fn test_lookup_misses() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage.lookup("missing", &key("/a")).unwrap().is_none());

    storage.open("s").unwrap();
    assert!(storage.lookup("s", &key("/a")).unwrap().is_none());
  }

  #[test]
  fn test_open_is_idempotent_and_names_keep_creation_order() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("b").unwrap();
    storage.open("a").unwrap();
    storage.open("b").unwrap();
    assert_eq!(storage.names().unwrap(), vec!["b", "a"]);
    assert!(storage.has("a").unwrap());
    assert!(!storage.has("c").unwrap());
  }

  #[test]
  fn test_delete_removes_store_and_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("old", &key("/a"), &response("x")).unwrap();

    assert!(storage.delete("old").unwrap());
    assert!(!storage.delete("old").unwrap());
    assert!(storage.names().unwrap().is_empty());

    // Re-creating the name must not resurrect old entries
    storage.open("old").unwrap();
    assert!(storage.lookup("old", &key("/a")).unwrap().is_none());
  }

  #[test]
  fn test_lookup_any_searches_in_order() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("first", &key("/a"), &response("one")).unwrap();
    storage.put("second", &key("/a"), &response("two")).unwrap();
    storage.put("second", &key("/b"), &response("bee")).unwrap();

    let stores = vec!["first".to_string(), "second".to_string()];
    let a = storage.lookup_any(&stores, &key("/a")).unwrap().unwrap();
    let b = storage.lookup_any(&stores, &key("/b")).unwrap().unwrap();
    assert_eq!(a.response.body, b"one");
    assert_eq!(b.response.body, b"bee");
    assert!(storage.lookup_any(&stores, &key("/c")).unwrap().is_none());
  }

  #[test]
  fn test_open_on_disk_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(Some(&path)).unwrap();
      storage.put("s", &key("/a"), &response("kept")).unwrap();
    }

    let storage = SqliteStorage::open(Some(&path)).unwrap();
    let hit = storage.lookup("s", &key("/a")).unwrap().unwrap();
    assert_eq!(hit.response.body, b"kept");
  }
}
