//! Method chain types
//!
//! Rendering methods, document-size buckets and the statistics kept per
//! `(method, bucket)` pair.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named strategy for turning a document into displayable output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderMethod {
    #[serde(rename = "primary-canvas-render")]
    PrimaryCanvas,
    #[serde(rename = "native-fallback-render")]
    NativeFallback,
    #[serde(rename = "server-side-conversion")]
    ServerSideConversion,
    #[serde(rename = "image-based-render")]
    ImageBased,
    #[serde(rename = "download-fallback")]
    DownloadFallback,
}

impl RenderMethod {
    /// Fixed fallback order. The last entry is terminal.
    pub const CHAIN: [RenderMethod; 5] = [
        RenderMethod::PrimaryCanvas,
        RenderMethod::NativeFallback,
        RenderMethod::ServerSideConversion,
        RenderMethod::ImageBased,
        RenderMethod::DownloadFallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryCanvas => "primary-canvas-render",
            Self::NativeFallback => "native-fallback-render",
            Self::ServerSideConversion => "server-side-conversion",
            Self::ImageBased => "image-based-render",
            Self::DownloadFallback => "download-fallback",
        }
    }

    /// Position in the fallback chain
    pub fn position(&self) -> usize {
        Self::CHAIN
            .iter()
            .position(|m| m == self)
            .unwrap_or(Self::CHAIN.len() - 1)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DownloadFallback)
    }
}

impl fmt::Display for RenderMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RenderMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::CHAIN
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown rendering method: {}", s))
    }
}

/// Coarse document classification used to key learned preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentBucket {
    Small,
    Medium,
    Large,
    Unknown,
}

/// Upper bound (exclusive) for the small bucket
pub const SMALL_DOCUMENT_BYTES: u64 = 5 * 1024 * 1024;
/// Upper bound (exclusive) for the medium bucket
pub const MEDIUM_DOCUMENT_BYTES: u64 = 25 * 1024 * 1024;

impl DocumentBucket {
    /// Classify a document by its size in bytes
    pub fn from_size(size: Option<u64>) -> Self {
        match size {
            None => Self::Unknown,
            Some(n) if n < SMALL_DOCUMENT_BYTES => Self::Small,
            Some(n) if n < MEDIUM_DOCUMENT_BYTES => Self::Medium,
            Some(_) => Self::Large,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Unknown => "unknown",
        }
    }

    /// Method tried first when no history exists for this bucket
    pub fn seeded_method(&self) -> RenderMethod {
        match self {
            Self::Large => RenderMethod::ServerSideConversion,
            Self::Small | Self::Medium | Self::Unknown => RenderMethod::PrimaryCanvas,
        }
    }
}

impl fmt::Display for DocumentBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite key of the statistics store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StatsKey {
    pub method: RenderMethod,
    pub bucket: DocumentBucket,
}

impl StatsKey {
    pub fn new(method: RenderMethod, bucket: DocumentBucket) -> Self {
        Self { method, bucket }
    }
}

/// Learned outcome history for one `(method, bucket)` pair
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodStatistics {
    pub method: RenderMethod,
    pub bucket: DocumentBucket,
    pub success_count: u64,
    pub total_attempts: u64,
    /// Running average over successful renders, in milliseconds
    pub average_render_time_ms: f64,
    pub last_used: DateTime<Utc>,
}

impl MethodStatistics {
    pub fn new(key: StatsKey) -> Self {
        Self {
            method: key.method,
            bucket: key.bucket,
            success_count: 0,
            total_attempts: 0,
            average_render_time_ms: 0.0,
            last_used: Utc::now(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_attempts as f64
        }
    }
}
