//! Rendering request/response types

use std::fmt;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use super::error::RenderError;
use crate::diagnostics::DiagnosticsRecord;
use crate::methods::RenderMethod;

/// Stage of a single method attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenderStage {
    Initializing,
    Fetching,
    Parsing,
    Rendering,
    Complete,
    Error,
}

impl RenderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Fetching => "FETCHING",
            Self::Parsing => "PARSING",
            Self::Rendering => "RENDERING",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Progress percentage reported on entering this stage
    pub fn base_percentage(&self) -> f64 {
        match self {
            Self::Initializing => 0.0,
            Self::Fetching => FETCH_PROGRESS_START,
            Self::Parsing => 70.0,
            Self::Rendering => 85.0,
            Self::Complete => 100.0,
            Self::Error => 0.0,
        }
    }
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percentage at which fetching starts
pub const FETCH_PROGRESS_START: f64 = 10.0;
/// Percentage reached when the body is fully loaded
pub const FETCH_PROGRESS_END: f64 = 60.0;

/// Live progress of one rendering request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    /// 0–100
    pub percentage: f64,
    pub stage: RenderStage,
    pub bytes_loaded: u64,
    pub total_bytes: Option<u64>,
    pub time_elapsed_ms: u64,
    pub is_stuck: bool,
    pub last_update: DateTime<Utc>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            percentage: 0.0,
            stage: RenderStage::Initializing,
            bytes_loaded: 0,
            total_bytes: None,
            time_elapsed_ms: 0,
            is_stuck: false,
            last_update: Utc::now(),
        }
    }
}

/// Where the document comes from
#[derive(Debug, Clone)]
pub enum RenderSource {
    Url(String),
    Bytes { name: String, data: Bytes },
}

impl RenderSource {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    pub fn bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::Bytes {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Human-readable locator for logs and reports
    pub fn locator(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Bytes { name, .. } => name,
        }
    }

    /// Size known before fetching, if any
    pub fn known_size(&self) -> Option<u64> {
        match self {
            Self::Url(_) => None,
            Self::Bytes { data, .. } => Some(data.len() as u64),
        }
    }
}

/// Per-request overrides of the engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    /// Caller-chosen id, so progress can be observed before the call returns
    pub rendering_id: Option<String>,
    /// Start from this method instead of the learned preference
    pub method: Option<RenderMethod>,
    /// Document size in bytes, used to pick the preference bucket
    pub size_hint: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub enable_fallbacks: Option<bool>,
    pub enable_cache: Option<bool>,
    pub progress_update_interval_ms: Option<u64>,
    pub stuck_detection_threshold_ms: Option<u64>,
}

impl RenderOptions {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// One produced page
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPage {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub content_type: String,
    #[serde(serialize_with = "serialize_base64")]
    pub data: Bytes,
}

fn serialize_base64<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(data))
}

/// Terminal outcome of `render_pdf`
///
/// `success == true` exactly when `error` is `None`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResult {
    pub success: bool,
    pub rendering_id: String,
    pub method: RenderMethod,
    pub pages: Vec<RenderedPage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RenderError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DiagnosticsRecord>,
    pub attempts: u32,
    pub total_time_ms: u64,
}

impl RenderResult {
    pub fn succeeded(
        rendering_id: String,
        method: RenderMethod,
        pages: Vec<RenderedPage>,
        attempts: u32,
        total_time_ms: u64,
    ) -> Self {
        Self {
            success: true,
            rendering_id,
            method,
            pages,
            error: None,
            diagnostics: None,
            attempts,
            total_time_ms,
        }
    }

    pub fn failed(
        rendering_id: String,
        method: RenderMethod,
        error: RenderError,
        attempts: u32,
        total_time_ms: u64,
    ) -> Self {
        Self {
            success: false,
            rendering_id,
            method,
            pages: Vec::new(),
            error: Some(error),
            diagnostics: None,
            attempts,
            total_time_ms,
        }
    }

    pub fn with_diagnostics(mut self, record: Option<DiagnosticsRecord>) -> Self {
        self.diagnostics = record;
        self
    }
}
