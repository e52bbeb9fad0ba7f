//! Database schema for the SQLite backing store

use rusqlite::Connection;

/// SQL schema for the cache database
pub const SCHEMA_SQL: &str = r#"
-- One row per cache key; rows are replaced whole, never patched
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    outcome TEXT NOT NULL,
    inserted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_state ON cache_entries(state);
"#;

/// Creates the cache tables if they do not exist
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
