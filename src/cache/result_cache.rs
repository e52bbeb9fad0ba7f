//! Claim-or-wait result cache

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

use crate::cache::traits::{BackingStore, CacheResult};
use crate::cache::{CacheEntry, CachedOutcome, MemoryStore};
use crate::engine::{Clock, SystemClock};
use crate::state::TargetState;
use crate::TargetError;

/// What a computation hands to everyone waiting on its key
type Shared = Result<CachedOutcome, TargetError>;

/// Outcome of an atomic claim attempt
enum Claim {
    /// The backing store already holds a terminal outcome
    Hit(CachedOutcome),
    /// Another pipeline owns the key
    Wait(watch::Receiver<Option<Shared>>),
    /// The caller now owns the key and must compute it
    Owner(watch::Sender<Option<Shared>>),
}

/// Result cache with at-most-one in-flight computation per key
///
/// Terminal outcomes are written to the backing store. Network and
/// extraction failures are handed to the callers that were waiting but are
/// not stored, so the key goes back to `Unseen`.
pub struct ResultCache {
    store: Arc<dyn BackingStore>,
    in_flight: Mutex<HashMap<String, watch::Receiver<Option<Shared>>>>,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    /// Creates a cache over the given backing store
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Creates a cache backed by a fresh [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Uses `clock` for entry insertion times
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The backing store
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// Current state of a key
    pub fn state(&self, key: &str) -> CacheResult<TargetState> {
        if self.lock_in_flight().contains_key(key) {
            return Ok(TargetState::InFlight);
        }
        Ok(self
            .store
            .load(key)?
            .map(|entry| entry.outcome.state())
            .unwrap_or(TargetState::Unseen))
    }

    /// Drops the stored outcome for a key, returning it to `Unseen`
    ///
    /// A computation already in flight is not affected.
    pub fn invalidate(&self, key: &str) -> CacheResult<bool> {
        let removed = self.store.remove(key)?;
        if removed {
            tracing::debug!("Invalidated cache key {}", key);
        }
        Ok(removed)
    }

    /// Returns the cached outcome for `key`, computing it at most once
    ///
    /// If another caller is already computing the key, this waits for its
    /// result instead of starting a second computation. If that caller is
    /// cancelled, one of the waiters takes over.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Shared
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Shared>,
    {
        let sender = loop {
            match self.claim(key) {
                Claim::Hit(outcome) => {
                    tracing::debug!("Cache hit for {} ({})", key, outcome.state());
                    return Ok(outcome);
                }
                Claim::Wait(receiver) => {
                    tracing::debug!("Waiting on in-flight computation for {}", key);
                    if let Some(shared) = wait_for(receiver).await {
                        return shared;
                    }
                    tracing::debug!("In-flight owner for {} went away, reclaiming", key);
                }
                Claim::Owner(sender) => break sender,
            }
        };

        let guard = InFlightGuard {
            cache: self,
            key,
            sender: Some(sender),
        };
        let shared = compute().await;
        guard.finish(&shared);
        shared
    }

    /// Atomically checks in-flight work and the store, claiming the key if
    /// neither has it
    fn claim(&self, key: &str) -> Claim {
        let mut in_flight = self.lock_in_flight();

        if let Some(receiver) = in_flight.get(key) {
            return Claim::Wait(receiver.clone());
        }

        match self.store.load(key) {
            Ok(Some(entry)) => return Claim::Hit(entry.outcome),
            Ok(None) => {}
            Err(e) => tracing::warn!("Cache load failed for {}, treating as miss: {}", key, e),
        }

        let (sender, receiver) = watch::channel(None);
        in_flight.insert(key.to_string(), receiver);
        Claim::Owner(sender)
    }

    fn release(&self, key: &str) {
        self.lock_in_flight().remove(key);
    }

    fn lock_in_flight(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, watch::Receiver<Option<Shared>>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Waits for the owner's result
///
/// Returns None if the owner was dropped without publishing one.
async fn wait_for(mut receiver: watch::Receiver<Option<Shared>>) -> Option<Shared> {
    loop {
        if let Some(shared) = receiver.borrow_and_update().clone() {
            return Some(shared);
        }
        if receiver.changed().await.is_err() {
            return receiver.borrow().clone();
        }
    }
}

/// Ownership of an in-flight key
///
/// Dropping the guard without calling [`finish`](Self::finish) (for example
/// because the owning task was cancelled) releases the key to `Unseen`.
struct InFlightGuard<'a> {
    cache: &'a ResultCache,
    key: &'a str,
    sender: Option<watch::Sender<Option<Shared>>>,
}

impl InFlightGuard<'_> {
    fn finish(mut self, shared: &Shared) {
        if let Ok(outcome) = shared {
            let entry = CacheEntry {
                outcome: outcome.clone(),
                inserted_at: self.cache.clock.now(),
            };
            if let Err(e) = self.cache.store.store(self.key, &entry) {
                tracing::warn!("Failed to persist cache entry for {}: {}", self.key, e);
            }
        }

        self.cache.release(self.key);
        if let Some(sender) = self.sender.take() {
            sender.send_replace(Some(shared.clone()));
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            tracing::debug!("Releasing abandoned in-flight key {}", self.key);
            self.cache.release(self.key);
        }
    }
}
