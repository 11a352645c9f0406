//! Cache-aside response store
//!
//! The store itself is a trait so that an unavailable host cache can be
//! modelled by `NoopCacheStore`, where every operation silently does nothing.
//! `ResponseCache` layers TTL handling on top of whichever store is plugged in.
//!
//! Timestamps use `tokio::time::Instant` so that expiry follows the runtime
//! clock (and can be driven by a paused clock in tests).

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::types::{FetchResponse, MemoryPressureLevel};

/// Default number of responses kept by the in-memory store
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Entries younger than this survive moderate memory pressure
const MODERATE_PRESSURE_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// A stored response tagged with its insertion time
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub response: FetchResponse,
    pub stored_at: Instant,
}

impl CachedResponse {
    pub fn new(response: FetchResponse) -> Self {
        Self {
            response,
            stored_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.stored_at)
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }
}

/// Named cache-store capability
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &str;

    /// Look up an entry, marking it recently used
    async fn get(&self, url: &str) -> Option<CachedResponse>;

    /// Insertion time of an entry without touching its recency
    async fn stored_at(&self, url: &str) -> Option<Instant>;

    async fn put(&self, url: &str, entry: CachedResponse);

    /// Returns whether an entry was removed
    async fn delete(&self, url: &str) -> bool;

    async fn keys(&self) -> Vec<String>;

    async fn clear(&self);

    async fn len(&self) -> usize;
}

/// In-memory store with LRU eviction
pub struct MemoryCacheStore {
    name: String,
    entries: RwLock<LruCache<String, CachedResponse>>,
}

impl MemoryCacheStore {
    /// Open a named store holding at most `capacity` responses
    pub fn open(name: &str, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap());

        Self {
            name: name.to_string(),
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, url: &str) -> Option<CachedResponse> {
        let mut entries = self.entries.write().await;
        entries.get(url).cloned()
    }

    async fn stored_at(&self, url: &str) -> Option<Instant> {
        let entries = self.entries.read().await;
        entries.peek(url).map(|e| e.stored_at)
    }

    async fn put(&self, url: &str, entry: CachedResponse) {
        let mut entries = self.entries.write().await;
        entries.put(url.to_string(), entry);
    }

    async fn delete(&self, url: &str) -> bool {
        let mut entries = self.entries.write().await;
        entries.pop(url).is_some()
    }

    async fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        entries.iter().map(|(k, _)| k.clone()).collect()
    }

    async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }

    async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }
}

/// Store used when the host offers no cache
#[derive(Debug, Default)]
pub struct NoopCacheStore;

#[async_trait]
impl CacheStore for NoopCacheStore {
    fn name(&self) -> &str {
        "noop"
    }

    async fn get(&self, _url: &str) -> Option<CachedResponse> {
        None
    }

    async fn stored_at(&self, _url: &str) -> Option<Instant> {
        None
    }

    async fn put(&self, _url: &str, _entry: CachedResponse) {}

    async fn delete(&self, _url: &str) -> bool {
        false
    }

    async fn keys(&self) -> Vec<String> {
        Vec::new()
    }

    async fn clear(&self) {}

    async fn len(&self) -> usize {
        0
    }
}

/// TTL-aware view over a `CacheStore`
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Return a fresh entry; an expired entry is evicted and reported as a miss
    pub async fn lookup(&self, url: &str, ttl: Duration) -> Option<FetchResponse> {
        let entry = self.store.get(url).await?;

        if entry.is_expired(ttl) {
            self.store.delete(url).await;
            tracing::debug!(
                cache = self.store.name(),
                url = %url,
                age_ms = entry.age().as_millis() as u64,
                "Evicted expired cache entry"
            );
            return None;
        }

        let mut response = entry.response;
        response.from_cache = true;
        Some(response)
    }

    pub async fn store(&self, url: &str, response: FetchResponse) {
        self.store.put(url, CachedResponse::new(response)).await;
    }

    /// Evict every entry older than `ttl`, returning how many were removed
    pub async fn prune(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = 0;

        for url in self.store.keys().await {
            let Some(stored_at) = self.store.stored_at(&url).await else {
                continue;
            };
            if now.saturating_duration_since(stored_at) > ttl && self.store.delete(&url).await {
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::info!(
                cache = self.store.name(),
                count = evicted,
                "Pruned expired cache entries"
            );
        }
        evicted
    }

    pub async fn clear(&self) {
        self.store.clear().await;
        tracing::debug!(cache = self.store.name(), "Cleared network cache");
    }

    pub async fn len(&self) -> usize {
        self.store.len().await
    }

    /// Shed cached responses in response to a memory pressure signal
    pub async fn apply_memory_pressure(&self, level: MemoryPressureLevel) -> usize {
        match level {
            MemoryPressureLevel::Normal => 0,
            MemoryPressureLevel::Moderate => self.prune(MODERATE_PRESSURE_MAX_AGE).await,
            MemoryPressureLevel::Critical => {
                let count = self.len().await;
                self.clear().await;
                tracing::warn!(count, "Critical memory pressure, dropped network cache");
                count
            }
        }
    }
}
