//! Network client
//!
//! Cache-aside fetching with retry/backoff and in-flight deduplication.
//!
//! The client owns its in-flight map and cache store, so independent
//! instances never observe each other's requests. Clones share state.
//!
//! # Deduplication
//!
//! The first caller for a URL creates a shared future and registers a weak
//! handle to it in the in-flight map. Later callers upgrade that handle and
//! await the same future, so N concurrent calls produce a single transport
//! call. The entry is removed exactly once, when the shared future finishes
//! or is dropped because every caller went away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use futures::StreamExt;
use parking_lot::Mutex;

use super::cache::{CacheStore, ResponseCache};
use super::retry::retry_with_backoff;
use super::transport::Transport;
use super::types::{FetchOptions, FetchProgress, FetchResponse, MemoryPressureLevel, NetworkError};

type FetchFuture = BoxFuture<'static, Result<FetchResponse, NetworkError>>;

struct InFlight {
    id: u64,
    fetch: WeakShared<FetchFuture>,
}

/// Shared network client
#[derive(Clone)]
pub struct NetworkClient {
    inner: Arc<NetworkClientInner>,
}

struct NetworkClientInner {
    transport: Arc<dyn Transport>,
    cache: ResponseCache,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_id: AtomicU64,
}

/// Removes an in-flight entry when the owning fetch ends, however it ends
struct InFlightGuard {
    inner: Arc<NetworkClientInner>,
    url: String,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        if in_flight.get(&self.url).is_some_and(|e| e.id == self.id) {
            in_flight.remove(&self.url);
        }
    }
}

impl NetworkClient {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            inner: Arc::new(NetworkClientInner {
                transport,
                cache: ResponseCache::new(store),
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Fetch `url`, deduplicating concurrent calls and consulting the cache
    ///
    /// Only the caller that starts the underlying fetch receives streamed
    /// progress; callers attached to an in-flight fetch get a single
    /// completion report.
    pub async fn optimized_fetch(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> Result<FetchResponse, NetworkError> {
        let cancel = options.cancel.clone();
        let on_progress = options.on_progress.clone();
        let (fetch, attached) = self.join_or_start(url, options);

        let result = match cancel {
            Some(token) => {
                tokio::select! {
                    result = fetch => result,
                    _ = token.cancelled() => Err(NetworkError::Cancelled),
                }
            }
            None => fetch.await,
        };

        if attached {
            if let (Ok(response), Some(callback)) = (&result, on_progress) {
                callback(FetchProgress::complete(response.len() as u64));
            }
        }

        result
    }

    /// Fetch every URL concurrently; failures are logged and omitted
    pub async fn prefetch_parallel(
        &self,
        urls: &[String],
        options: FetchOptions,
    ) -> HashMap<String, FetchResponse> {
        let fetches = urls.iter().map(|url| {
            let options = options.clone();
            async move { (url.clone(), self.optimized_fetch(url, options).await) }
        });

        let mut responses = HashMap::new();
        for (url, result) in futures::future::join_all(fetches).await {
            match result {
                Ok(response) => {
                    responses.insert(url, response);
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Prefetch failed");
                }
            }
        }
        responses
    }

    pub async fn clear_network_cache(&self) {
        self.inner.cache.clear().await;
    }

    /// Number of cached responses
    pub async fn get_cache_size(&self) -> usize {
        self.inner.cache.len().await
    }

    /// Evict entries older than `ttl`, returning how many were removed
    pub async fn prune_cache(&self, ttl: Duration) -> usize {
        self.inner.cache.prune(ttl).await
    }

    pub async fn apply_memory_pressure(&self, level: MemoryPressureLevel) -> usize {
        self.inner.cache.apply_memory_pressure(level).await
    }

    /// Number of URLs with a fetch currently in flight
    pub fn in_flight_count(&self) -> usize {
        // Upgraded handles are dropped after the lock is released; dropping
        // the last one runs the guard, which takes the lock itself.
        let live: Vec<Shared<FetchFuture>> = {
            let in_flight = self.inner.in_flight.lock();
            in_flight.values().filter_map(|e| e.fetch.upgrade()).collect()
        };
        live.len()
    }

    fn join_or_start(&self, url: &str, options: FetchOptions) -> (Shared<FetchFuture>, bool) {
        let mut in_flight = self.inner.in_flight.lock();

        if let Some(existing) = in_flight.get(url).and_then(|e| e.fetch.upgrade()) {
            tracing::debug!(url = %url, "Attaching to in-flight request");
            return (existing, true);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = InFlightGuard {
            inner: Arc::clone(&self.inner),
            url: url.to_string(),
            id,
        };
        let inner = Arc::clone(&self.inner);
        let key = url.to_string();

        let fetch: Shared<FetchFuture> = async move {
            let _guard = guard;
            inner.fetch_uncoalesced(&key, &options).await
        }
        .boxed()
        .shared();

        if let Some(weak) = fetch.downgrade() {
            in_flight.insert(url.to_string(), InFlight { id, fetch: weak });
        }

        (fetch, false)
    }
}

impl NetworkClientInner {
    async fn fetch_uncoalesced(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<FetchResponse, NetworkError> {
        if options.enable_cache {
            if let Some(hit) = self.cache.lookup(url, options.cache_ttl).await {
                tracing::debug!(url = %url, bytes = hit.len(), "Cache hit");
                if let Some(callback) = &options.on_progress {
                    callback(FetchProgress::complete(hit.len() as u64));
                }
                return Ok(hit);
            }
        }

        let response = match &options.retry {
            Some(retry) => retry_with_backoff(retry, url, || self.fetch_once(url, options)).await?,
            None => self.fetch_once(url, options).await?,
        };

        if options.enable_cache {
            self.cache.store(url, response.clone()).await;
        }

        Ok(response)
    }

    async fn fetch_once(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<FetchResponse, NetworkError> {
        let request = self.send_and_read(url, options);

        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| NetworkError::Timeout(limit.as_millis() as u64))?,
            None => request.await,
        }
    }

    async fn send_and_read(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<FetchResponse, NetworkError> {
        let response = self.transport.send(url).await?;

        if !(200..300).contains(&response.status) {
            return Err(NetworkError::Http {
                status: response.status,
                url: url.to_string(),
            });
        }

        let total = response.content_length;
        let mut body = BytesMut::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        let mut stream = response.body;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            body.extend_from_slice(&chunk);
            if let Some(callback) = &options.on_progress {
                callback(FetchProgress {
                    loaded: body.len() as u64,
                    total,
                });
            }
        }

        Ok(FetchResponse {
            url: url.to_string(),
            status: response.status,
            content_type: response.content_type,
            body: body.freeze(),
            from_cache: false,
        })
    }
}
