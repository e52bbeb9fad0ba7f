//! SQLite backing store
//!
//! Durable storage for terminal cache entries, so dead links and finished
//! items survive across runs.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::cache::schema::initialize_schema;
use crate::cache::traits::{ordered_counts, BackingStore, CacheError, CacheResult};
use crate::cache::{CacheEntry, CachedOutcome};
use crate::state::TargetState;

/// SQLite-backed cache store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates a cache database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(CacheError)` - Failed to open database
    pub fn new(path: &Path) -> CacheResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl BackingStore for SqliteStore {
    fn load(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let row = conn
            .query_row(
                "SELECT outcome, inserted_at FROM cache_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((outcome, inserted_at)) = row else {
            return Ok(None);
        };

        let outcome: CachedOutcome = serde_json::from_str(&outcome)?;
        let inserted_at = DateTime::parse_from_rfc3339(&inserted_at)
            .map_err(|e| CacheError::Corrupt {
                key: key.to_string(),
                message: format!("bad inserted_at: {}", e),
            })?
            .with_timezone(&Utc);

        Ok(Some(CacheEntry {
            outcome,
            inserted_at,
        }))
    }

    fn store(&self, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        let outcome = serde_json::to_string(&entry.outcome)?;
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (key, state, outcome, inserted_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key,
                entry.outcome.state().to_db_string(),
                outcome,
                entry.inserted_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> CacheResult<bool> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    fn len(&self) -> CacheResult<usize> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    fn clear(&self) -> CacheResult<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute("DELETE FROM cache_entries", [])?;
        Ok(())
    }

    fn count_by_state(&self) -> CacheResult<Vec<(TargetState, usize)>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt =
            conn.prepare("SELECT state, COUNT(*) FROM cache_entries GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (state, count) = row?;
            let parsed = TargetState::from_db_string(&state).ok_or_else(|| CacheError::Corrupt {
                key: format!("state={}", state),
                message: "unknown state".to_string(),
            })?;
            counts.push((parsed, count as usize));
        }
        Ok(ordered_counts(&counts))
    }
}
