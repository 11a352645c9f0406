//! Rendering diagnostics
//!
//! Per-request telemetry (stage, method, errors, timings, environment),
//! threshold-based bottleneck detection, and text/JSON export for support.

mod collector;
mod report;
mod types;

pub use collector::{DiagnosticsCollector, DiagnosticsConfig};
pub use report::{
    generate_report, identify_bottlenecks, DEFAULT_MEMORY_THRESHOLD_BYTES, ERROR_COUNT_THRESHOLD,
    NETWORK_TIME_THRESHOLD_MS, PARSE_TIME_THRESHOLD_MS, RENDER_TIME_THRESHOLD_MS,
};
pub use types::{DiagnosticsRecord, EnvironmentInfo, PerformanceMetrics};
