//! Local key-value storage.
//!
//! A dumb string store with no knowledge of encryption. Two backends:
//! - [`SqliteLocalStore`]: persistent, one SQLite file per profile
//! - [`InMemoryLocalStore`]: for tests and ephemeral sessions
//!
//! Both enforce a byte budget so a full store surfaces as
//! [`LocalStoreError::Quota`] rather than unbounded growth.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::LocalStoreError;

/// Stable storage keys. Previously written data is looked up by these names.
pub mod keys {
    /// Encrypted intake questionnaire answers.
    pub const INTAKE_DATA: &str = "intake_data";
    /// Encrypted current plan.
    pub const GENERATED_PLAN: &str = "generated_plan";
    /// Encrypted per-day task completion for the current plan.
    pub const PLAN_PROGRESS: &str = "plan_progress";
    /// Encrypted list of superseded local plans.
    pub const PLAN_ARCHIVE: &str = "plan_archive";
    /// Plain night-mode preference.
    pub const NIGHT_MODE_OVERRIDE: &str = "night_mode_override";
    /// Development-only stand-in session.
    pub const MOCK_SESSION: &str = "mock_session";
    /// Stable id for users without a session.
    pub const ANONYMOUS_ID: &str = "anonymous_id";

    /// Encrypted supplement inventory for `owner_id`.
    #[must_use]
    pub fn inventory(owner_id: &str) -> String {
        format!("inventory_{owner_id}")
    }
}

/// Synchronous string key-value store.
pub trait LocalStore: Send + Sync + std::fmt::Debug {
    /// Read the value at `key`.
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError>;

    /// Write `value` at `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), LocalStoreError>;
}

impl<T: LocalStore + ?Sized> LocalStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        (**self).remove(key)
    }
}

fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

// ============================================================================
// SQLite Store
// ============================================================================

/// SQLite-backed local store.
pub struct SqliteLocalStore {
    conn: Mutex<Connection>,
    quota_bytes: u64,
}

impl std::fmt::Debug for SqliteLocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLocalStore")
            .field("quota_bytes", &self.quota_bytes)
            .finish_non_exhaustive()
    }
}

impl SqliteLocalStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path, quota_bytes: u64) -> Result<Self, LocalStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LocalStoreError::Backend(format!("Failed to create data dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn, quota_bytes)
    }

    /// Open a throwaway in-memory SQLite database.
    pub fn open_in_memory(quota_bytes: u64) -> Result<Self, LocalStoreError> {
        Self::from_connection(Connection::open_in_memory()?, quota_bytes)
    }

    fn from_connection(conn: Connection, quota_bytes: u64) -> Result<Self, LocalStoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS local_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            quota_bytes,
        })
    }

    /// Bytes currently used by keys and values.
    pub fn used_bytes(&self) -> Result<u64, LocalStoreError> {
        let conn = self.conn.lock()?;
        let used: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM local_kv",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(used).unwrap_or_default())
    }
}

impl LocalStore for SqliteLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        let conn = self.conn.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM local_kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        let conn = self.conn.lock()?;

        let others: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM local_kv WHERE key != ?1",
            params![key],
            |row| row.get(0),
        )?;
        let needed = u64::try_from(others).unwrap_or_default() + entry_size(key, value);
        if needed > self.quota_bytes {
            return Err(LocalStoreError::Quota {
                needed,
                limit: self.quota_bytes,
            });
        }

        conn.execute(
            "INSERT INTO local_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE
             SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        let conn = self.conn.lock()?;
        conn.execute("DELETE FROM local_kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

// ============================================================================
// In-Memory Store (for testing)
// ============================================================================

/// In-memory local store.
#[derive(Debug, Clone)]
pub struct InMemoryLocalStore {
    entries: Arc<parking_lot::RwLock<HashMap<String, String>>>,
    quota_bytes: u64,
}

impl Default for InMemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLocalStore {
    /// Create an unbounded in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_quota(u64::MAX)
    }

    /// Create an in-memory store limited to `quota_bytes`.
    #[must_use]
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: Arc::default(),
            quota_bytes,
        }
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl LocalStore for InMemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        let mut entries = self.entries.write();
        let others: u64 = entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| entry_size(k, v))
            .sum();
        let needed = others + entry_size(key, value);
        if needed > self.quota_bytes {
            return Err(LocalStoreError::Quota {
                needed,
                limit: self.quota_bytes,
            });
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}
