//! Diagnostics record types

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::methods::RenderMethod;
use crate::render::{RenderError, RenderStage};

/// Timings and memory figures for one rendering request
///
/// `None` means "not measured". Merging is shallow: a measured value in the
/// update replaces the current one, unmeasured values leave it untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub network_time_ms: Option<u64>,
    pub parse_time_ms: Option<u64>,
    pub render_time_ms: Option<u64>,
    pub memory_usage_bytes: Option<u64>,
}

impl PerformanceMetrics {
    pub fn merge(&mut self, update: PerformanceMetrics) {
        if update.network_time_ms.is_some() {
            self.network_time_ms = update.network_time_ms;
        }
        if update.parse_time_ms.is_some() {
            self.parse_time_ms = update.parse_time_ms;
        }
        if update.render_time_ms.is_some() {
            self.render_time_ms = update.render_time_ms;
        }
        if update.memory_usage_bytes.is_some() {
            self.memory_usage_bytes = update.memory_usage_bytes;
        }
    }
}

/// Host environment the engine runs in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub engine_version: String,
    pub os: String,
    pub arch: String,
    pub available_parallelism: Option<usize>,
}

impl EnvironmentInfo {
    pub fn detect() -> Self {
        Self {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            available_parallelism: std::thread::available_parallelism()
                .ok()
                .map(|n| n.get()),
        }
    }
}

/// Telemetry captured for one rendering request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsRecord {
    pub rendering_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_time_ms: Option<u64>,
    pub method: RenderMethod,
    pub stage: RenderStage,
    pub errors: Vec<RenderError>,
    pub performance_metrics: PerformanceMetrics,
    pub environment: EnvironmentInfo,
    /// Monotonic start, used for `total_time_ms`
    #[serde(skip)]
    pub(crate) started: Instant,
}

impl DiagnosticsRecord {
    pub fn new(
        rendering_id: &str,
        method: RenderMethod,
        stage: RenderStage,
        environment: EnvironmentInfo,
    ) -> Self {
        Self {
            rendering_id: rendering_id.to_string(),
            start_time: Utc::now(),
            end_time: None,
            total_time_ms: None,
            method,
            stage,
            errors: Vec::new(),
            performance_metrics: PerformanceMetrics::default(),
            environment,
            started: Instant::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.end_time.is_some()
    }
}
