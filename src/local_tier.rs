//! Local tier - per-process in-memory cache
//!
//! Moka-backed store with per-key TTL. Moka's builder TTL is cache-wide, so
//! each entry carries its own `expires_at` and expired entries are evicted
//! lazily on read.
//!
//! The store handle lives behind an `RwLock`: ordinary operations share a
//! read guard (moka handles their concurrency), while [`LocalTier::rebuild`]
//! takes the write guard and swaps in a fresh cache. Bus-driven mutations go
//! through the same read-guard path, which serializes them against rebuild.

use moka::future::Cache;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Cache entry with its own expiry
#[derive(Debug, Clone)]
struct LocalEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl LocalEntry {
    fn new(value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Per-process key/value store with per-entry TTL and atomic rebuild
pub struct LocalTier {
    store: RwLock<Cache<String, LocalEntry>>,
    max_capacity: u64,
}

impl LocalTier {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            store: RwLock::new(Self::build_store(max_capacity)),
            max_capacity,
        }
    }

    fn build_store(max_capacity: u64) -> Cache<String, LocalEntry> {
        Cache::builder().max_capacity(max_capacity).build()
    }

    /// Store a serialized value with its own TTL.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let store = self.store.read().await;
        store
            .insert(key.to_string(), LocalEntry::new(value, ttl))
            .await;
    }

    /// Fetch a value, lazily evicting it if its TTL has passed.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let store = self.store.read().await;
        match store.get(key).await {
            Some(entry) if entry.is_expired() => {
                store.invalidate(key).await;
                None
            }
            Some(entry) => Some(entry.value),
            None => None,
        }
    }

    pub async fn remove(&self, key: &str) {
        let store = self.store.read().await;
        store.invalidate(key).await;
    }

    /// Drop every entry by swapping in a fresh store.
    ///
    /// Holds the write guard, so no bus callback or engine operation can
    /// observe the tier mid-swap.
    pub async fn rebuild(&self) {
        let mut store = self.store.write().await;
        *store = Self::build_store(self.max_capacity);
    }

    /// Approximate number of live entries (moka's count is eventually
    /// consistent and may include not-yet-evicted expired entries).
    pub async fn entry_count(&self) -> u64 {
        let store = self.store.read().await;
        store.run_pending_tasks().await;
        store.entry_count()
    }
}
