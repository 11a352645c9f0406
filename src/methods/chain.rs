//! Fallback chain with learned per-bucket preferences
//!
//! The chain order is fixed; the statistics store only influences which
//! method a request starts from.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use super::types::{DocumentBucket, MethodStatistics, RenderMethod, StatsKey};

/// Ordered fallback list plus the statistics store backing preferences
#[derive(Clone, Default)]
pub struct MethodChain {
    stats: Arc<RwLock<HashMap<StatsKey, MethodStatistics>>>,
}

impl MethodChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next method in the fixed order, or `None` after the terminal method
    pub fn get_next_method(&self, current: RenderMethod) -> Option<RenderMethod> {
        RenderMethod::CHAIN.get(current.position() + 1).copied()
    }

    /// Method with the best recorded outcome for `bucket`
    ///
    /// Only methods that have succeeded at least once are candidates. Higher
    /// success rate wins; ties go to the lower average render time, then to
    /// the earlier chain position.
    pub fn get_preferred_method(&self, bucket: DocumentBucket) -> RenderMethod {
        let stats = self.stats.read();

        stats
            .values()
            .filter(|s| s.bucket == bucket && s.success_count > 0)
            .min_by(|a, b| {
                b.success_rate()
                    .partial_cmp(&a.success_rate())
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| {
                        a.average_render_time_ms
                            .partial_cmp(&b.average_render_time_ms)
                            .unwrap_or(Ordering::Equal)
                    })
                    .then_with(|| a.method.position().cmp(&b.method.position()))
            })
            .map(|s| s.method)
            .unwrap_or_else(|| bucket.seeded_method())
    }

    /// Record a successful render and fold its time into the running average
    pub fn record_method_success(
        &self,
        method: RenderMethod,
        bucket: DocumentBucket,
        render_time_ms: u64,
    ) {
        let key = StatsKey::new(method, bucket);
        let mut stats = self.stats.write();
        let entry = stats
            .entry(key)
            .or_insert_with(|| MethodStatistics::new(key));

        entry.success_count += 1;
        entry.total_attempts += 1;
        let n = entry.success_count as f64;
        entry.average_render_time_ms += (render_time_ms as f64 - entry.average_render_time_ms) / n;
        entry.last_used = Utc::now();

        tracing::debug!(
            method = %method,
            bucket = %bucket,
            render_time_ms,
            success_rate = entry.success_rate(),
            "Recorded method success"
        );
    }

    /// Record a failed attempt
    pub fn record_method_failure(&self, method: RenderMethod, bucket: DocumentBucket) {
        let key = StatsKey::new(method, bucket);
        let mut stats = self.stats.write();
        let entry = stats
            .entry(key)
            .or_insert_with(|| MethodStatistics::new(key));

        entry.total_attempts += 1;
        entry.last_used = Utc::now();

        tracing::debug!(
            method = %method,
            bucket = %bucket,
            success_rate = entry.success_rate(),
            "Recorded method failure"
        );
    }

    /// Snapshot of the statistics store
    pub fn get_method_statistics(&self) -> HashMap<StatsKey, MethodStatistics> {
        self.stats.read().clone()
    }

    /// Drop all learned history
    pub fn clear_method_history(&self) {
        self.stats.write().clear();
        tracing::debug!("Cleared method history");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_method_visits_chain_once() {
        let chain = MethodChain::new();
        let mut visited = vec![RenderMethod::PrimaryCanvas];
        let mut current = RenderMethod::PrimaryCanvas;

        while let Some(next) = chain.get_next_method(current) {
            assert!(!visited.contains(&next));
            visited.push(next);
            current = next;
        }

        assert_eq!(visited, RenderMethod::CHAIN.to_vec());
        assert_eq!(chain.get_next_method(RenderMethod::DownloadFallback), None);
    }

    #[test]
    fn test_next_method_from_middle() {
        let chain = MethodChain::new();
        assert_eq!(
            chain.get_next_method(RenderMethod::ServerSideConversion),
            Some(RenderMethod::ImageBased)
        );
    }

    #[test]
    fn test_seeded_preferences_without_history() {
        let chain = MethodChain::new();
        assert_eq!(
            chain.get_preferred_method(DocumentBucket::Small),
            RenderMethod::PrimaryCanvas
        );
        assert_eq!(
            chain.get_preferred_method(DocumentBucket::Large),
            RenderMethod::ServerSideConversion
        );
        assert_eq!(
            chain.get_preferred_method(DocumentBucket::Unknown),
            RenderMethod::PrimaryCanvas
        );
    }

    #[test]
    fn test_preferred_method_uses_success_rate() {
        let chain = MethodChain::new();
        let bucket = DocumentBucket::Medium;

        // primary: 1 of 2
        chain.record_method_success(RenderMethod::PrimaryCanvas, bucket, 100);
        chain.record_method_failure(RenderMethod::PrimaryCanvas, bucket);
        // image-based: 2 of 2, slower
        chain.record_method_success(RenderMethod::ImageBased, bucket, 900);
        chain.record_method_success(RenderMethod::ImageBased, bucket, 1100);

        assert_eq!(chain.get_preferred_method(bucket), RenderMethod::ImageBased);
    }

    #[test]
    fn test_preferred_method_tie_broken_by_render_time() {
        let chain = MethodChain::new();
        let bucket = DocumentBucket::Small;

        chain.record_method_success(RenderMethod::NativeFallback, bucket, 800);
        chain.record_method_success(RenderMethod::ServerSideConversion, bucket, 300);

        assert_eq!(
            chain.get_preferred_method(bucket),
            RenderMethod::ServerSideConversion
        );
    }

    #[test]
    fn test_preferences_are_per_bucket() {
        let chain = MethodChain::new();
        chain.record_method_success(RenderMethod::ImageBased, DocumentBucket::Small, 100);

        assert_eq!(
            chain.get_preferred_method(DocumentBucket::Small),
            RenderMethod::ImageBased
        );
        assert_eq!(
            chain.get_preferred_method(DocumentBucket::Large),
            RenderMethod::ServerSideConversion
        );
    }

    #[test]
    fn test_failures_only_fall_back_to_seed() {
        let chain = MethodChain::new();
        chain.record_method_failure(RenderMethod::NativeFallback, DocumentBucket::Small);

        assert_eq!(
            chain.get_preferred_method(DocumentBucket::Small),
            RenderMethod::PrimaryCanvas
        );
    }

    #[test]
    fn test_statistics_running_average() {
        let chain = MethodChain::new();
        let bucket = DocumentBucket::Small;

        chain.record_method_success(RenderMethod::PrimaryCanvas, bucket, 100);
        chain.record_method_success(RenderMethod::PrimaryCanvas, bucket, 300);
        chain.record_method_failure(RenderMethod::PrimaryCanvas, bucket);

        let stats = chain.get_method_statistics();
        let entry = &stats[&StatsKey::new(RenderMethod::PrimaryCanvas, bucket)];
        assert_eq!(entry.success_count, 2);
        assert_eq!(entry.total_attempts, 3);
        assert!((entry.average_render_time_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clear_method_history() {
        let chain = MethodChain::new();
        chain.record_method_success(RenderMethod::ImageBased, DocumentBucket::Small, 50);
        chain.clear_method_history();

        assert!(chain.get_method_statistics().is_empty());
        assert_eq!(
            chain.get_preferred_method(DocumentBucket::Small),
            RenderMethod::PrimaryCanvas
        );
    }

    #[test]
    fn test_clones_share_the_store() {
        let chain = MethodChain::new();
        let other = chain.clone();
        other.record_method_success(RenderMethod::NativeFallback, DocumentBucket::Small, 10);

        assert_eq!(chain.get_method_statistics().len(), 1);
    }
}
