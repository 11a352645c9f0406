//! Per-request rendering context
//!
//! `RenderContext` is owned by the task running `render_pdf`. The parts that
//! other callers need to reach (cancellation, force-retry, live progress)
//! live in a shared `ContextHandle`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::RenderError;
use super::types::{
    ProgressState, RenderOptions, RenderSource, RenderStage, FETCH_PROGRESS_END,
    FETCH_PROGRESS_START,
};
use crate::config::{EngineConfig, NetworkConfig};
use crate::methods::{DocumentBucket, RenderMethod};
use crate::network::RetryConfig;

/// Bytes at which an unknown-length download is estimated as half done
const UNKNOWN_LENGTH_HALF_POINT: f64 = 1024.0 * 1024.0;

/// Effective settings for one request: engine config overlaid with options
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub timeout: Duration,
    pub enable_fallbacks: bool,
    pub enable_cache: bool,
    pub cache_ttl: Duration,
    /// `None` when retries are disabled
    pub retry: Option<RetryConfig>,
    pub progress_update_interval: Duration,
    pub stuck_detection_threshold: Duration,
}

impl RenderSettings {
    pub fn resolve(engine: &EngineConfig, network: &NetworkConfig, options: &RenderOptions) -> Self {
        let max_retries = options.max_retries.unwrap_or(engine.max_retries);
        let retry = (max_retries > 0).then(|| RetryConfig {
            max_retries,
            initial_delay: network.retry_initial_delay,
            max_delay: network.retry_max_delay,
            multiplier: network.retry_multiplier,
        });

        Self {
            timeout: options.timeout().unwrap_or(engine.timeout),
            enable_fallbacks: options.enable_fallbacks.unwrap_or(engine.enable_fallbacks),
            enable_cache: options.enable_cache.unwrap_or(network.cache_enabled),
            cache_ttl: network.cache_ttl,
            retry,
            progress_update_interval: options
                .progress_update_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(engine.progress_update_interval)
                .max(Duration::from_millis(1)),
            stuck_detection_threshold: options
                .stuck_detection_threshold_ms
                .map(Duration::from_millis)
                .unwrap_or(engine.stuck_detection_threshold),
        }
    }
}

struct ProgressTracker {
    state: ProgressState,
    /// Last time the percentage went up
    last_advance: Instant,
}

/// Shared, externally reachable part of a rendering context
pub(crate) struct ContextHandle {
    pub rendering_id: String,
    pub cancel: CancellationToken,
    pub retry: Notify,
    started: Instant,
    tracker: Mutex<ProgressTracker>,
}

impl ContextHandle {
    pub fn new(rendering_id: &str) -> Self {
        let now = Instant::now();
        Self {
            rendering_id: rendering_id.to_string(),
            cancel: CancellationToken::new(),
            retry: Notify::new(),
            started: now,
            tracker: Mutex::new(ProgressTracker {
                state: ProgressState::default(),
                last_advance: now,
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn snapshot(&self) -> ProgressState {
        let mut tracker = self.tracker.lock();
        tracker.state.time_elapsed_ms = self.elapsed_ms();
        tracker.state.clone()
    }

    pub fn stage(&self) -> RenderStage {
        self.tracker.lock().state.stage
    }

    pub fn is_stuck(&self) -> bool {
        self.tracker.lock().state.is_stuck
    }

    /// Start a fresh attempt: stage, percentage, bytes and the stall clock reset
    pub fn reset_for_attempt(&self) -> ProgressState {
        let mut tracker = self.tracker.lock();
        tracker.state.percentage = 0.0;
        tracker.state.stage = RenderStage::Initializing;
        tracker.state.bytes_loaded = 0;
        tracker.state.total_bytes = None;
        tracker.state.is_stuck = false;
        tracker.last_advance = Instant::now();
        self.touch(&mut tracker)
    }

    pub fn set_stage(&self, stage: RenderStage) -> ProgressState {
        let mut tracker = self.tracker.lock();
        tracker.state.stage = stage;
        if stage != RenderStage::Error {
            Self::advance_to(&mut tracker, stage.base_percentage());
        }
        self.touch(&mut tracker)
    }

    /// Map downloaded bytes onto the fetch band of the percentage
    ///
    /// With an unknown total the fraction is estimated so that the
    /// percentage still moves while bytes arrive.
    pub fn set_bytes(&self, loaded: u64, total: Option<u64>) -> ProgressState {
        let mut tracker = self.tracker.lock();
        tracker.state.bytes_loaded = loaded;
        tracker.state.total_bytes = total;

        let fraction = match total {
            Some(0) => 1.0,
            Some(total) => (loaded as f64 / total as f64).min(1.0),
            None => {
                let loaded = loaded as f64;
                loaded / (loaded + UNKNOWN_LENGTH_HALF_POINT)
            }
        };
        let percentage = FETCH_PROGRESS_START + (FETCH_PROGRESS_END - FETCH_PROGRESS_START) * fraction;
        Self::advance_to(&mut tracker, percentage);
        self.touch(&mut tracker)
    }

    /// Flag the context as stuck once progress has stalled for `threshold`
    ///
    /// Returns the new state only on the transition into stuck.
    pub fn check_stuck(&self, threshold: Duration) -> Option<ProgressState> {
        let mut tracker = self.tracker.lock();
        if tracker.state.is_stuck || tracker.state.stage.is_terminal() {
            return None;
        }
        if Instant::now().saturating_duration_since(tracker.last_advance) < threshold {
            return None;
        }
        tracker.state.is_stuck = true;
        Some(self.touch(&mut tracker))
    }

    fn advance_to(tracker: &mut ProgressTracker, percentage: f64) {
        if percentage > tracker.state.percentage {
            tracker.state.percentage = percentage.min(100.0);
            tracker.state.is_stuck = false;
            tracker.last_advance = Instant::now();
        }
    }

    fn touch(&self, tracker: &mut ProgressTracker) -> ProgressState {
        tracker.state.last_update = Utc::now();
        tracker.state.time_elapsed_ms = self.elapsed_ms();
        tracker.state.clone()
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// State of one `render_pdf` call
pub struct RenderContext {
    pub rendering_id: String,
    pub source: RenderSource,
    pub settings: RenderSettings,
    pub bucket: DocumentBucket,
    pub start_time: DateTime<Utc>,
    pub current_method: RenderMethod,
    /// 1-based count of method attempts, force-retries included
    pub attempt_count: u32,
    pub error_history: Vec<RenderError>,
    pub(crate) handle: Arc<ContextHandle>,
}

impl RenderContext {
    pub(crate) fn new(
        handle: Arc<ContextHandle>,
        source: RenderSource,
        settings: RenderSettings,
        bucket: DocumentBucket,
        method: RenderMethod,
    ) -> Self {
        Self {
            rendering_id: handle.rendering_id.clone(),
            source,
            settings,
            bucket,
            start_time: Utc::now(),
            current_method: method,
            attempt_count: 1,
            error_history: Vec::new(),
            handle,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.handle.elapsed_ms())
    }
}
