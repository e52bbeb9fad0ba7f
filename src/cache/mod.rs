//! Result cache
//!
//! This module keeps one outcome per target key:
//! - At-most-one concurrent fetch+extract per key (claim-or-wait)
//! - Terminal outcomes (items, not-found, dead links) persisted to a
//!   pluggable [`BackingStore`]
//! - Cancellation-safe release of in-flight keys
//! - Cache key strategies derived from the canonical link

mod key;
mod memory;
mod result_cache;
mod schema;
mod sqlite;
mod traits;

pub use key::CacheKeyStrategy;
pub use memory::MemoryStore;
pub use result_cache::ResultCache;
pub use sqlite::SqliteStore;
pub use traits::{BackingStore, CacheError, CacheResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::ResultItem;
use crate::state::TargetState;
use crate::TargetError;

/// A terminal outcome for a target key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CachedOutcome {
    /// A complete item
    Item(ResultItem),
    /// The target was confirmed absent
    NotFound { status: u16 },
    /// The page content marked the link as dead
    BadLink { reason: String },
}

impl CachedOutcome {
    /// The cache state this outcome puts its key in
    pub fn state(&self) -> TargetState {
        match self {
            Self::Item(_) => TargetState::CachedValid,
            Self::NotFound { .. } => TargetState::CachedNotFound,
            Self::BadLink { .. } => TargetState::CachedBadLink,
        }
    }

    /// Converts the outcome into the caller-facing result for `url`
    pub fn into_result(self, url: &str) -> Result<ResultItem, TargetError> {
        match self {
            Self::Item(item) => Ok(item),
            Self::NotFound { status } => Err(TargetError::NotFound {
                url: url.to_string(),
                status,
            }),
            Self::BadLink { reason } => Err(TargetError::InvalidLink {
                url: url.to_string(),
                reason,
            }),
        }
    }
}

/// A stored cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub outcome: CachedOutcome,
    pub inserted_at: DateTime<Utc>,
}
