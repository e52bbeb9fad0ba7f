//! Proxy pools
//!
//! A pool hands out one proxy per attempt. When the pool is bounded, each
//! lease also holds a slot for the duration of the attempt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Identifier of the implicit pool that connects directly
pub const DIRECT_POOL: &str = "direct";

/// A named, rotating set of proxies
#[derive(Debug)]
pub struct ProxyPool {
    id: String,
    proxies: Vec<String>,
    cursor: AtomicUsize,
    slots: Option<Arc<Semaphore>>,
}

/// A proxy checked out for one attempt
#[derive(Debug)]
pub struct ProxyLease {
    proxy: Option<String>,
    index: usize,
    _permit: Option<OwnedSemaphorePermit>,
}

impl ProxyLease {
    /// The proxy URL, or None for a direct connection
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }
}

impl ProxyPool {
    /// Creates a pool that rotates over `proxies`
    ///
    /// An empty list means direct connections.
    pub fn new(id: impl Into<String>, proxies: Vec<String>) -> Self {
        Self {
            id: id.into(),
            proxies,
            cursor: AtomicUsize::new(0),
            slots: None,
        }
    }

    /// A pool without proxies
    pub fn direct() -> Self {
        Self::new(DIRECT_POOL, Vec::new())
    }

    /// Bounds the number of concurrent leases
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.slots = Some(Arc::new(Semaphore::new(max.max(1))));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn proxies(&self) -> &[String] {
        &self.proxies
    }

    /// Leases the current proxy, waiting for a free slot if the pool is bounded
    pub async fn lease(&self) -> ProxyLease {
        let permit = match &self.slots {
            // The semaphore is never closed, so acquisition cannot fail
            Some(slots) => Arc::clone(slots).acquire_owned().await.ok(),
            None => None,
        };

        if self.proxies.is_empty() {
            return ProxyLease {
                proxy: None,
                index: 0,
                _permit: permit,
            };
        }

        let index = self.cursor.load(Ordering::Acquire) % self.proxies.len();
        ProxyLease {
            proxy: Some(self.proxies[index].clone()),
            index,
            _permit: permit,
        }
    }

    /// Moves the pool past the proxy of a failed attempt
    ///
    /// Concurrent failures on the same proxy rotate the pool only once.
    pub fn report_failure(&self, lease: &ProxyLease) {
        if self.proxies.len() < 2 {
            return;
        }
        let current = self.cursor.load(Ordering::Acquire);
        if current % self.proxies.len() != lease.index {
            return;
        }
        if self
            .cursor
            .compare_exchange(
                current,
                current.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            tracing::debug!(
                "Proxy pool '{}' rotated away from {}",
                self.id,
                self.proxies[lease.index]
            );
        }
    }
}

/// All proxy pools known to the engine, by id
#[derive(Debug, Clone)]
pub struct ProxyPools {
    pools: HashMap<String, Arc<ProxyPool>>,
}

impl ProxyPools {
    /// Creates a registry holding only the direct pool
    pub fn new() -> Self {
        let mut pools = HashMap::new();
        pools.insert(DIRECT_POOL.to_string(), Arc::new(ProxyPool::direct()));
        Self { pools }
    }

    pub fn insert(&mut self, pool: ProxyPool) -> &mut Self {
        self.pools.insert(pool.id().to_string(), Arc::new(pool));
        self
    }

    pub fn with(mut self, pool: ProxyPool) -> Self {
        self.insert(pool);
        self
    }

    /// Looks up a pool; None selects the direct pool
    pub fn get(&self, id: Option<&str>) -> Option<Arc<ProxyPool>> {
        self.pools.get(id.unwrap_or(DIRECT_POOL)).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pools.contains_key(id)
    }
}

impl Default for ProxyPools {
    fn default() -> Self {
        Self::new()
    }
}
