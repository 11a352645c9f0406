//! Network client
//!
//! Fetches document bytes with:
//! - in-flight deduplication of identical URLs
//! - a cache-aside store with TTL expiry and explicit pruning
//! - exponential backoff with jitter for retryable failures
//! - per-call timeouts and cooperative cancellation
//! - streamed progress reporting
//!
//! ## Usage
//!
//! ```rust,ignore
//! use amnesia_render_engine::network::{
//!     FetchOptions, MemoryCacheStore, NetworkClient, ReqwestTransport,
//! };
//!
//! let client = NetworkClient::new(
//!     Arc::new(ReqwestTransport::new()),
//!     Arc::new(MemoryCacheStore::open("documents", 64)),
//! );
//! let response = client.optimized_fetch(url, FetchOptions::default()).await?;
//! ```

mod cache;
mod client;
mod retry;
mod transport;
mod types;

pub use cache::{
    CacheStore, CachedResponse, MemoryCacheStore, NoopCacheStore, ResponseCache,
    DEFAULT_CACHE_CAPACITY,
};
pub use client::NetworkClient;
pub use retry::{backoff_delay, retry_with_backoff};
pub use transport::{ReqwestTransport, Transport, TransportResponse};
pub use types::{
    is_retryable_status, FetchOptions, FetchProgress, FetchResponse, MemoryPressureLevel,
    NetworkError, ProgressCallback, RetryConfig, DEFAULT_CACHE_TTL,
};

#[cfg(test)]
pub(crate) use transport::mock;
