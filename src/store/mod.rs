//! Local durable store: named collections over an embedded SQLite database.
//!
//! Every other component persists through this module. Records are stored
//! as serialized JSON blobs keyed by collection name and primary key, with
//! secondary index rows maintained alongside each write. Migrations are
//! additive only (`IF NOT EXISTS`), so an older database is upgraded in
//! place and newer collections never disturb existing ones.

mod record;

pub use record::Record;

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Shared handle to the embedded database.
///
/// Constructed once at application start and passed by `Arc` to each
/// component. A failed open is a first-class error: callers are expected
/// to treat the store as optional and degrade rather than abort.
pub struct Store {
  conn: Mutex<Connection>,
}

/// Schema for the record tables. Additive only.
const STORE_SCHEMA: &str = r#"
-- Generic record storage (serialized JSON per record)
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    record_key TEXT NOT NULL,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (collection, record_key)
);

-- Secondary index rows, rebuilt on every put of the owning record
CREATE TABLE IF NOT EXISTS record_index (
    collection TEXT NOT NULL,
    idx_name TEXT NOT NULL,
    idx_value TEXT NOT NULL,
    record_key TEXT NOT NULL,
    PRIMARY KEY (collection, idx_name, record_key)
);

CREATE INDEX IF NOT EXISTS idx_record_index_lookup
    ON record_index(collection, idx_name, idx_value);
"#;

impl Store {
  /// Open or create the database at the default location.
  pub fn open_default() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open(&path)
  }

  /// Open or create the database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Open an in-memory database. Used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("caresync").join("offline.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Upsert one record by primary key, rebuilding its index rows.
  pub fn put<T: Record>(&self, item: &T) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = put_locked(&conn, item);

    match result {
      Ok(()) => {
        conn
          .execute("COMMIT", [])
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(())
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(e)
      }
    }
  }

  /// Upsert a batch inside one transaction.
  ///
  /// Each item is attempted independently; a bad item is skipped rather
  /// than aborting the batch. Returns the number stored.
  pub fn put_many<T: Record>(&self, items: &[T]) -> Result<usize> {
    let conn = self.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut stored = 0;
    for item in items {
      if put_locked(&conn, item).is_ok() {
        stored += 1;
      }
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(stored)
  }

  /// Get one record by primary key. An absent key is `Ok(None)`, not an
  /// error.
  pub fn get<T: Record>(&self, key: &str) -> Result<Option<T>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT data FROM records WHERE collection = ? AND record_key = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let data: Option<Vec<u8>> = stmt
      .query_row(params![T::collection(), key], |row| row.get(0))
      .ok();

    match data {
      Some(data) => {
        let item: T = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize record {}: {}", key, e))?;
        Ok(Some(item))
      }
      None => Ok(None),
    }
  }

  /// Get every record in the collection.
  pub fn get_all<T: Record>(&self) -> Result<Vec<T>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT data FROM records WHERE collection = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let items: Vec<T> = stmt
      .query_map(params![T::collection()], |row| {
        let data: Vec<u8> = row.get(0)?;
        Ok(data)
      })
      .map_err(|e| eyre!("Failed to query records: {}", e))?
      .filter_map(|r| r.ok())
      .filter_map(|data| serde_json::from_slice(&data).ok())
      .collect();

    Ok(items)
  }

  /// Get records whose named secondary index matches `value`.
  pub fn get_by_index<T: Record>(&self, index: &str, value: &str) -> Result<Vec<T>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT r.data FROM records r
         INNER JOIN record_index ri
           ON ri.collection = r.collection AND ri.record_key = r.record_key
         WHERE ri.collection = ? AND ri.idx_name = ? AND ri.idx_value = ?",
      )
      .map_err(|e| eyre!("Failed to prepare index query: {}", e))?;

    let items: Vec<T> = stmt
      .query_map(params![T::collection(), index, value], |row| {
        let data: Vec<u8> = row.get(0)?;
        Ok(data)
      })
      .map_err(|e| eyre!("Failed to query index: {}", e))?
      .filter_map(|r| r.ok())
      .filter_map(|data| serde_json::from_slice(&data).ok())
      .collect();

    Ok(items)
  }

  /// Delete one record. Returns whether a record existed.
  pub fn delete<T: Record>(&self, key: &str) -> Result<bool> {
    let conn = self.lock()?;

    conn
      .execute(
        "DELETE FROM record_index WHERE collection = ? AND record_key = ?",
        params![T::collection(), key],
      )
      .map_err(|e| eyre!("Failed to delete index rows: {}", e))?;

    let removed = conn
      .execute(
        "DELETE FROM records WHERE collection = ? AND record_key = ?",
        params![T::collection(), key],
      )
      .map_err(|e| eyre!("Failed to delete record: {}", e))?;

    Ok(removed > 0)
  }

  /// Delete a batch of records. Returns the number removed.
  pub fn delete_many<T: Record>(&self, keys: &[String]) -> Result<usize> {
    let mut removed = 0;
    for key in keys {
      if self.delete::<T>(key)? {
        removed += 1;
      }
    }
    Ok(removed)
  }

  /// Remove every record in the collection.
  pub fn clear<T: Record>(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "DELETE FROM record_index WHERE collection = ?",
        params![T::collection()],
      )
      .map_err(|e| eyre!("Failed to clear index rows: {}", e))?;

    conn
      .execute(
        "DELETE FROM records WHERE collection = ?",
        params![T::collection()],
      )
      .map_err(|e| eyre!("Failed to clear collection: {}", e))?;

    Ok(())
  }

  /// Number of records in the collection.
  pub fn count<T: Record>(&self) -> Result<u64> {
    let conn = self.lock()?;

    let count: u64 = conn
      .query_row(
        "SELECT COUNT(*) FROM records WHERE collection = ?",
        params![T::collection()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count records: {}", e))?;

    Ok(count)
  }
}

/// Upsert one record and its index rows. Caller holds the lock and an
/// open transaction.
fn put_locked<T: Record>(conn: &Connection, item: &T) -> Result<()> {
  let key = item.primary_key();
  let data = serde_json::to_vec(item).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO records (collection, record_key, data, stored_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![T::collection(), key, data],
    )
    .map_err(|e| eyre!("Failed to store record: {}", e))?;

  conn
    .execute(
      "DELETE FROM record_index WHERE collection = ? AND record_key = ?",
      params![T::collection(), key],
    )
    .map_err(|e| eyre!("Failed to reset index rows: {}", e))?;

  for (idx_name, idx_value) in item.index_entries() {
    conn
      .execute(
        "INSERT OR REPLACE INTO record_index (collection, idx_name, idx_value, record_key)
         VALUES (?, ?, ?, ?)",
        params![T::collection(), idx_name, idx_value, key],
      )
      .map_err(|e| eyre!("Failed to store index row: {}", e))?;
  }

  Ok(())
}
