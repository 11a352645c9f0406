//! Network client types

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Default time-to-live for cached responses
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    /// Whether this response was served from the cache-aside store
    pub from_cache: bool,
}

impl FetchResponse {
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Cumulative download progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    pub loaded: u64,
    /// Declared content length, when the server sent one
    pub total: Option<u64>,
}

impl FetchProgress {
    pub fn complete(len: u64) -> Self {
        Self {
            loaded: len,
            total: Some(len),
        }
    }
}

/// Progress listener invoked while a body is streamed
pub type ProgressCallback = Arc<dyn Fn(FetchProgress) + Send + Sync>;

/// Exponential backoff parameters
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
        }
    }
}

/// Per-call options for `NetworkClient::optimized_fetch`
#[derive(Clone)]
pub struct FetchOptions {
    pub enable_cache: bool,
    pub cache_ttl: Duration,
    /// `None` disables retries
    pub retry: Option<RetryConfig>,
    /// Bound on each transport call, including the body read
    pub timeout: Option<Duration>,
    pub on_progress: Option<ProgressCallback>,
    /// Aborts this caller's wait when cancelled
    pub cancel: Option<CancellationToken>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_ttl: DEFAULT_CACHE_TTL,
            retry: Some(RetryConfig::default()),
            timeout: Some(Duration::from_secs(30)),
            on_progress: None,
            cancel: None,
        }
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("enable_cache", &self.enable_cache)
            .field("cache_ttl", &self.cache_ttl)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("on_progress", &self.on_progress.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

/// Memory pressure signal supplied by the embedding environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressureLevel {
    Normal,
    Moderate,
    Critical,
}

/// Network-level failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum NetworkError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl NetworkError {
    /// Whether another attempt may succeed
    ///
    /// Transport failures, timeouts, 5xx, 429 and 408 are retryable. Every
    /// other HTTP status fails immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::Body(_) => true,
            Self::Http { status, .. } => is_retryable_status(*status),
            Self::Cancelled => false,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429 || status == 408
}
