//! In-memory backing store

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::cache::traits::{ordered_counts, BackingStore, CacheResult};
use crate::cache::CacheEntry;
use crate::state::TargetState;

/// Process-local store; entries live for the lifetime of the value
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackingStore for MemoryStore {
    fn load(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn store(&self, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> CacheResult<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.remove(key).is_some())
    }

    fn len(&self) -> CacheResult<usize> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.len())
    }

    fn clear(&self) -> CacheResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
        Ok(())
    }

    fn count_by_state(&self) -> CacheResult<Vec<(TargetState, usize)>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let counts: Vec<_> = entries
            .values()
            .map(|entry| (entry.outcome.state(), 1))
            .collect();
        Ok(ordered_counts(&counts))
    }
}
