// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Key-Value Storage
//!
//! Durable key-value backends with expiring writes. A value written with a
//! TTL becomes invisible to `get` once the TTL elapses, whether or not a
//! sweep has physically removed it yet.
//! Supports both in-memory (for testing) and SQLite (for production).

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use crate::clock::now_millis;

/// Errors raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Poisoned,
}

/// A stored value with its absolute expiry.
#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at_ms: u64,
}

impl StoredValue {
    fn is_expired(&self, now_ms: u64) -> bool {
        // Use >= so that a TTL of 0 means immediately expired
        now_ms >= self.expires_at_ms
    }
}

fn expiry_for(ttl: Duration) -> u64 {
    now_millis().saturating_add(ttl.as_millis() as u64)
}

/// Trait for key-value storage backends with passive expiry.
pub trait KvStore: Send + Sync {
    /// Writes `value` under `key`, replacing any previous value. The entry
    /// expires `ttl` after this call.
    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError>;

    /// Reads a live value. Expired entries read as `None` and are removed.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Removes a value. Returns whether anything was removed.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Removes all expired entries. Returns the number removed.
    fn cleanup_expired(&self) -> Result<usize, StorageError>;

    /// Returns the number of stored entries, expired or not.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// In-Memory Storage (for testing and development)
// ============================================================================

/// In-memory key-value storage.
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, StoredValue>>,
}

impl MemoryKvStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        MemoryKvStore {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryKvStore {
    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at_ms: expiry_for(ttl),
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let now = now_millis();
        {
            let entries = self.entries.read().map_err(|_| StorageError::Poisoned)?;
            match entries.get(key) {
                None => return Ok(None),
                Some(stored) if !stored.is_expired(now) => return Ok(Some(stored.value.clone())),
                Some(_) => {}
            }
        }
        // Re-check under the write lock so a concurrent put is not lost
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        if entries.get(key).is_some_and(|stored| stored.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.remove(key).is_some())
    }

    fn cleanup_expired(&self) -> Result<usize, StorageError> {
        let now = now_millis();
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        let initial_len = entries.len();
        entries.retain(|_, stored| !stored.is_expired(now));
        Ok(initial_len - entries.len())
    }

    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

// ============================================================================
// SQLite Storage (for production)
// ============================================================================

/// SQLite-backed persistent key-value storage.
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    /// Opens or creates a SQLite database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at_ms INTEGER NOT NULL
            )",
            [],
        )?;

        // Index for expiration sweeps
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at_ms)",
            [],
        )?;

        Ok(SqliteKvStore {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::open(":memory:")
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl KvStore for SqliteKvStore {
    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, expires_at_ms) VALUES (?1, ?2, ?3)",
            params![key, value, expiry_for(ttl) as i64],
        )?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.lock()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT value, expires_at_ms FROM kv WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((value, expires_at_ms)) => {
                if now_millis() >= expires_at_ms as u64 {
                    conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                    Ok(None)
                } else {
                    Ok(Some(value))
                }
            }
        }
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let changes = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(changes > 0)
    }

    fn cleanup_expired(&self) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM kv WHERE expires_at_ms <= ?1",
            params![now_millis() as i64],
        )?;
        Ok(removed)
    }

    fn len(&self) -> usize {
        let Ok(conn) = self.lock() else {
            return 0;
        };
        conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get::<_, i64>(0))
            .unwrap_or(0) as usize
    }
}

// ============================================================================
// Storage Factory
// ============================================================================

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    /// In-memory storage (lost on restart).
    Memory,
    /// SQLite persistent storage.
    #[default]
    Sqlite,
}

/// Creates a key-value store based on the backend type.
pub fn create_kv_store(
    backend: StorageBackend,
    data_dir: Option<&Path>,
) -> Result<Box<dyn KvStore>, StorageError> {
    match backend {
        StorageBackend::Memory => Ok(Box::new(MemoryKvStore::new())),
        StorageBackend::Sqlite => {
            let path = data_dir
                .map(|d| d.join("sessions.db"))
                .unwrap_or_else(|| std::path::PathBuf::from("sessions.db"));

            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }

            Ok(Box::new(SqliteKvStore::open(&path)?))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn test_put_get_impl(store: &dyn KvStore) {
        store.put("session:a", "{\"address\":\"x\"}", HOUR).unwrap();

        assert_eq!(
            store.get("session:a").unwrap().as_deref(),
            Some("{\"address\":\"x\"}")
        );
        assert!(store.get("session:missing").unwrap().is_none());
    }

    fn test_overwrite_impl(store: &dyn KvStore) {
        store.put("k", "one", HOUR).unwrap();
        store.put("k", "two", HOUR).unwrap();

        assert_eq!(store.get("k").unwrap().as_deref(), Some("two"));
        assert_eq!(store.len(), 1);
    }

    fn test_delete_impl(store: &dyn KvStore) {
        store.put("k", "v", HOUR).unwrap();

        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert!(store.get("k").unwrap().is_none());
    }

    fn test_expired_read_impl(store: &dyn KvStore) {
        store.put("k", "v", Duration::ZERO).unwrap();

        // Still physically present until read or swept
        assert_eq!(store.len(), 1);
        assert!(store.get("k").unwrap().is_none());
        assert_eq!(store.len(), 0);
    }

    fn test_cleanup_impl(store: &dyn KvStore) {
        store.put("live", "v", HOUR).unwrap();
        store.put("dead-1", "v", Duration::ZERO).unwrap();
        store.put("dead-2", "v", Duration::ZERO).unwrap();

        assert_eq!(store.cleanup_expired().unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("live").unwrap().is_some());
    }

    #[test]
    fn test_memory_put_get() {
        test_put_get_impl(&MemoryKvStore::new());
    }

    #[test]
    fn test_memory_overwrite() {
        test_overwrite_impl(&MemoryKvStore::new());
    }

    #[test]
    fn test_memory_delete() {
        test_delete_impl(&MemoryKvStore::new());
    }

    #[test]
    fn test_memory_expired_read() {
        test_expired_read_impl(&MemoryKvStore::new());
    }

    #[test]
    fn test_memory_cleanup() {
        test_cleanup_impl(&MemoryKvStore::new());
    }

    #[test]
    fn test_sqlite_put_get() {
        test_put_get_impl(&SqliteKvStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_overwrite() {
        test_overwrite_impl(&SqliteKvStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_delete() {
        test_delete_impl(&SqliteKvStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_expired_read() {
        test_expired_read_impl(&SqliteKvStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_cleanup() {
        test_cleanup_impl(&SqliteKvStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        {
            let store = SqliteKvStore::open(&db_path).unwrap();
            store.put("session:1", "a", HOUR).unwrap();
            store.put("session:2", "b", HOUR).unwrap();
            assert_eq!(store.len(), 2);
        }

        // Reopen and verify data persisted
        {
            let store = SqliteKvStore::open(&db_path).unwrap();
            assert_eq!(store.len(), 2);
            assert_eq!(store.get("session:1").unwrap().as_deref(), Some("a"));
        }
    }

    #[test]
    fn test_sqlite_wal_mode_on_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteKvStore::open(dir.path().join("wal_test.db")).unwrap();
        let conn = store.conn.lock().unwrap();

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode, "wal");
    }

    #[test]
    fn test_create_kv_store_sqlite_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested");

        let store = create_kv_store(StorageBackend::Sqlite, Some(&data_dir)).unwrap();
        store.put("k", "v", HOUR).unwrap();

        assert!(data_dir.join("sessions.db").exists());
    }
}
