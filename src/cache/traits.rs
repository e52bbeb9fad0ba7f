//! Backing store trait and error types
//!
//! The result cache owns in-flight deduplication; durable storage of
//! terminal outcomes is delegated to a [`BackingStore`].

use crate::cache::CacheEntry;
use crate::state::TargetState;
use thiserror::Error;

/// Errors that can occur in a backing store
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt cache entry for {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for backing store operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Key-value store for terminal cache entries
///
/// Implementations must be safe to call from many tasks at once. Calls are
/// short and synchronous; they are never held across an await point.
pub trait BackingStore: Send + Sync {
    /// Loads the entry for a key, if any
    fn load(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Stores an entry, replacing any previous entry for the key as a whole
    fn store(&self, key: &str, entry: &CacheEntry) -> CacheResult<()>;

    /// Removes the entry for a key
    ///
    /// Returns true if an entry was removed.
    fn remove(&self, key: &str) -> CacheResult<bool>;

    /// Number of stored entries
    fn len(&self) -> CacheResult<usize>;

    /// Removes every entry
    fn clear(&self) -> CacheResult<()>;

    /// Number of stored entries per terminal state
    ///
    /// States with no entries are omitted. Order follows
    /// [`TargetState::all_states`].
    fn count_by_state(&self) -> CacheResult<Vec<(TargetState, usize)>>;
}

/// Orders per-state counts and drops the empty ones
pub(crate) fn ordered_counts(counts: &[(TargetState, usize)]) -> Vec<(TargetState, usize)> {
    TargetState::all_states()
        .into_iter()
        .filter_map(|state| {
            let total: usize = counts
                .iter()
                .filter(|(s, _)| *s == state)
                .map(|(_, n)| n)
                .sum();
            (total > 0).then_some((state, total))
        })
        .collect()
}
