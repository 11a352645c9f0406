//! Diagnostics collector
//!
//! Keeps an active record per rendering id from `start_diagnostics` until
//! `complete_diagnostics`. Completed records move into a bounded LRU of
//! last-known records so they can still be exported afterwards.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;

use super::report;
use super::types::{DiagnosticsRecord, EnvironmentInfo, PerformanceMetrics};
use crate::methods::RenderMethod;
use crate::render::{RenderError, RenderStage};

/// Collector configuration
#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    pub enabled: bool,
    pub memory_threshold_bytes: u64,
    /// Completed records kept for export
    pub retained_records: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_threshold_bytes: report::DEFAULT_MEMORY_THRESHOLD_BYTES,
            retained_records: 100,
        }
    }
}

#[derive(Clone)]
pub struct DiagnosticsCollector {
    inner: Arc<CollectorInner>,
}

struct CollectorInner {
    config: DiagnosticsConfig,
    environment: EnvironmentInfo,
    active: Mutex<HashMap<String, DiagnosticsRecord>>,
    completed: Mutex<LruCache<String, DiagnosticsRecord>>,
}

impl Default for DiagnosticsCollector {
    fn default() -> Self {
        Self::new(DiagnosticsConfig::default())
    }
}

impl DiagnosticsCollector {
    pub fn new(config: DiagnosticsConfig) -> Self {
        let retained = NonZeroUsize::new(config.retained_records)
            .unwrap_or(NonZeroUsize::new(100).unwrap());

        Self {
            inner: Arc::new(CollectorInner {
                config,
                environment: EnvironmentInfo::detect(),
                active: Mutex::new(HashMap::new()),
                completed: Mutex::new(LruCache::new(retained)),
            }),
        }
    }

    /// Open an active record; does nothing when diagnostics are disabled
    pub fn start_diagnostics(&self, rendering_id: &str, method: RenderMethod, stage: RenderStage) {
        if !self.inner.config.enabled {
            return;
        }

        let record = DiagnosticsRecord::new(
            rendering_id,
            method,
            stage,
            self.inner.environment.clone(),
        );
        self.inner
            .active
            .lock()
            .insert(rendering_id.to_string(), record);

        tracing::debug!(rendering_id = %rendering_id, method = %method, "Diagnostics started");
    }

    pub fn update_stage(&self, rendering_id: &str, stage: RenderStage) {
        self.with_active(rendering_id, |record| record.stage = stage);
    }

    pub fn update_method(&self, rendering_id: &str, method: RenderMethod) {
        self.with_active(rendering_id, |record| record.method = method);
    }

    /// Shallow-merge measured values into the record's metrics
    pub fn update_performance_metrics(&self, rendering_id: &str, update: PerformanceMetrics) {
        self.with_active(rendering_id, |record| record.performance_metrics.merge(update));
    }

    pub fn add_error(&self, rendering_id: &str, error: RenderError) {
        self.with_active(rendering_id, |record| record.errors.push(error));
    }

    /// Finalize and remove the active record
    pub fn complete_diagnostics(&self, rendering_id: &str) -> Option<DiagnosticsRecord> {
        let mut record = self.inner.active.lock().remove(rendering_id)?;

        record.end_time = Some(Utc::now());
        record.total_time_ms = Some(record.started.elapsed().as_millis() as u64);

        let bottlenecks = self.identify_bottlenecks(&record);
        if bottlenecks.is_empty() {
            tracing::debug!(
                rendering_id = %rendering_id,
                total_time_ms = record.total_time_ms,
                errors = record.errors.len(),
                "Diagnostics completed"
            );
        } else {
            tracing::warn!(
                rendering_id = %rendering_id,
                bottlenecks = ?bottlenecks,
                "Diagnostics completed with bottlenecks"
            );
        }

        self.inner
            .completed
            .lock()
            .put(rendering_id.to_string(), record.clone());

        Some(record)
    }

    /// Active record, or the last completed record for `rendering_id`
    pub fn snapshot(&self, rendering_id: &str) -> Option<DiagnosticsRecord> {
        if let Some(record) = self.inner.active.lock().get(rendering_id) {
            return Some(record.clone());
        }
        self.inner.completed.lock().peek(rendering_id).cloned()
    }

    pub fn identify_bottlenecks(&self, record: &DiagnosticsRecord) -> Vec<String> {
        report::identify_bottlenecks(record, self.inner.config.memory_threshold_bytes)
    }

    pub fn generate_report(&self, record: &DiagnosticsRecord) -> String {
        report::generate_report(record, self.inner.config.memory_threshold_bytes)
    }

    /// JSON export of the active or last-known record
    pub fn export_diagnostics(&self, rendering_id: &str) -> Option<String> {
        let record = self.snapshot(rendering_id)?;
        match serde_json::to_string_pretty(&record) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!(rendering_id = %rendering_id, error = %e, "Failed to serialize diagnostics");
                None
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Drop every active record
    pub fn clear_all(&self) {
        let mut active = self.inner.active.lock();
        let count = active.len();
        active.clear();
        tracing::debug!(count, "Cleared active diagnostics");
    }

    fn with_active(&self, rendering_id: &str, update: impl FnOnce(&mut DiagnosticsRecord)) {
        if let Some(record) = self.inner.active.lock().get_mut(rendering_id) {
            update(record);
        }
    }
}
