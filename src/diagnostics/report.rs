//! Bottleneck rules and support reports

use super::types::DiagnosticsRecord;

/// Network time above this is flagged
pub const NETWORK_TIME_THRESHOLD_MS: u64 = 10_000;
/// Parse time above this is flagged
pub const PARSE_TIME_THRESHOLD_MS: u64 = 5_000;
/// Render time above this is flagged
pub const RENDER_TIME_THRESHOLD_MS: u64 = 15_000;
/// Default memory usage threshold (100 MB)
pub const DEFAULT_MEMORY_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
/// This many recorded errors is flagged
pub const ERROR_COUNT_THRESHOLD: usize = 3;

/// Human-readable tags for every threshold rule the record trips
pub fn identify_bottlenecks(record: &DiagnosticsRecord, memory_threshold_bytes: u64) -> Vec<String> {
    let metrics = &record.performance_metrics;
    let mut bottlenecks = Vec::new();

    if let Some(ms) = metrics.network_time_ms.filter(|ms| *ms > NETWORK_TIME_THRESHOLD_MS) {
        bottlenecks.push(format!(
            "Slow network: document fetch took {} ms (threshold {} ms)",
            ms, NETWORK_TIME_THRESHOLD_MS
        ));
    }
    if let Some(ms) = metrics.parse_time_ms.filter(|ms| *ms > PARSE_TIME_THRESHOLD_MS) {
        bottlenecks.push(format!(
            "Slow parsing: document parse took {} ms (threshold {} ms)",
            ms, PARSE_TIME_THRESHOLD_MS
        ));
    }
    if let Some(ms) = metrics.render_time_ms.filter(|ms| *ms > RENDER_TIME_THRESHOLD_MS) {
        bottlenecks.push(format!(
            "Slow rendering: page rendering took {} ms (threshold {} ms)",
            ms, RENDER_TIME_THRESHOLD_MS
        ));
    }
    if let Some(bytes) = metrics
        .memory_usage_bytes
        .filter(|bytes| *bytes > memory_threshold_bytes)
    {
        bottlenecks.push(format!(
            "High memory usage: {} (threshold {})",
            format_bytes(bytes),
            format_bytes(memory_threshold_bytes)
        ));
    }
    if record.errors.len() >= ERROR_COUNT_THRESHOLD {
        bottlenecks.push(format!(
            "Repeated failures: {} errors recorded before completion",
            record.errors.len()
        ));
    }

    bottlenecks
}

/// Multi-section plain-text report for support export
///
/// Output depends only on the record and the threshold, so the same record
/// always produces the same text.
pub fn generate_report(record: &DiagnosticsRecord, memory_threshold_bytes: u64) -> String {
    let mut lines = vec![
        "=== Rendering Diagnostics Report ===".to_string(),
        format!("Rendering ID: {}", record.rendering_id),
        format!("Method: {}", record.method),
        format!("Stage: {}", record.stage),
        format!("Started: {}", record.start_time.to_rfc3339()),
    ];
    lines.push(match record.end_time {
        Some(end) => format!("Finished: {}", end.to_rfc3339()),
        None => "Finished: in progress".to_string(),
    });
    lines.push(format!("Total time: {}", format_ms(record.total_time_ms)));

    let metrics = &record.performance_metrics;
    lines.push(String::new());
    lines.push("--- Performance Metrics ---".to_string());
    lines.push(format!("Network time: {}", format_ms(metrics.network_time_ms)));
    lines.push(format!("Parse time: {}", format_ms(metrics.parse_time_ms)));
    lines.push(format!("Render time: {}", format_ms(metrics.render_time_ms)));
    lines.push(format!(
        "Memory usage: {}",
        metrics
            .memory_usage_bytes
            .map(format_bytes)
            .unwrap_or_else(|| "n/a".to_string())
    ));

    lines.push(String::new());
    lines.push(format!("--- Errors ({}) ---", record.errors.len()));
    if record.errors.is_empty() {
        lines.push("None".to_string());
    }
    for (i, error) in record.errors.iter().enumerate() {
        lines.push(format!(
            "{}. [{}] {} (stage: {}, method: {}, recoverable: {})",
            i + 1,
            error.kind,
            error.message,
            error.stage,
            error.method,
            if error.recoverable { "yes" } else { "no" }
        ));
    }

    let env = &record.environment;
    lines.push(String::new());
    lines.push("--- Environment ---".to_string());
    lines.push(format!("Engine version: {}", env.engine_version));
    lines.push(format!("OS: {}", env.os));
    lines.push(format!("Architecture: {}", env.arch));
    lines.push(format!(
        "Available parallelism: {}",
        env.available_parallelism
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    ));

    let bottlenecks = identify_bottlenecks(record, memory_threshold_bytes);
    lines.push(String::new());
    lines.push("--- Bottlenecks ---".to_string());
    if bottlenecks.is_empty() {
        lines.push("None detected".to_string());
    }
    lines.extend(bottlenecks.iter().map(|b| format!("- {}", b)));

    lines.push(String::new());
    lines.join("\n")
}

fn format_ms(ms: Option<u64>) -> String {
    ms.map(|ms| format!("{} ms", ms))
        .unwrap_or_else(|| "n/a".to_string())
}

fn format_bytes(bytes: u64) -> String {
    format!("{} bytes ({:.1} MB)", bytes, bytes as f64 / (1024.0 * 1024.0))
}
