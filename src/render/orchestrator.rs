//! Rendering orchestrator
//!
//! Drives one request through the method chain. Each method attempt runs
//! `INITIALIZING → FETCHING → PARSING → RENDERING → COMPLETE` under a single
//! supervising `select!` that also owns the attempt timeout, stuck
//! detection, cancellation and force-retry.
//!
//! ```text
//! render_pdf ─► attempt(method) ─ok──► record success ─► RenderResult
//!                  │ err
//!                  ▼
//!            classify + record ─ non-recoverable ─► RenderResult(failed)
//!                  │ recoverable
//!                  ▼
//!            next method? ─ none ─► RenderResult(failed)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use super::backend::{BackendRegistry, FetchedDocument};
use super::context::{ContextHandle, RenderContext, RenderSettings};
use super::error::{RenderError, RenderErrorKind};
use super::progress::{ProgressHub, ProgressListener, ProgressSubscription};
use super::types::{
    ProgressState, RenderOptions, RenderResult, RenderSource, RenderStage, RenderedPage,
};
use crate::config::{EngineConfig, NetworkConfig};
use crate::diagnostics::{DiagnosticsCollector, DiagnosticsConfig, PerformanceMetrics};
use crate::methods::{DocumentBucket, MethodChain, RenderMethod};
use crate::network::{FetchOptions, FetchProgress, MemoryPressureLevel, NetworkClient, ProgressCallback};

type AttemptFuture = BoxFuture<'static, Result<Vec<RenderedPage>, RenderError>>;

/// Outcome of `RenderOrchestrator::force_retry`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceRetry {
    /// The current attempt is being re-issued
    Retrying,
    /// The rendering is progressing; nothing to do
    NotStuck,
    NotFound,
}

#[derive(Clone)]
pub struct RenderOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    engine: EngineConfig,
    network_config: NetworkConfig,
    network: NetworkClient,
    methods: MethodChain,
    diagnostics: DiagnosticsCollector,
    backends: BackendRegistry,
    contexts: Mutex<HashMap<String, Arc<ContextHandle>>>,
    progress: ProgressHub,
}

/// What one attempt needs, detached from the `RenderContext` borrow
struct AttemptPlan {
    handle: Arc<ContextHandle>,
    source: RenderSource,
    method: RenderMethod,
    settings: RenderSettings,
}

/// Unregisters a context however `render_pdf` ends, including when its
/// future is dropped
struct ActiveRendering {
    inner: Arc<OrchestratorInner>,
    handle: Arc<ContextHandle>,
}

impl Drop for ActiveRendering {
    fn drop(&mut self) {
        let id = &self.handle.rendering_id;
        {
            let mut contexts = self.inner.contexts.lock();
            if contexts.get(id).is_some_and(|h| Arc::ptr_eq(h, &self.handle)) {
                contexts.remove(id);
            }
        }
        self.inner.progress.remove_all(id);
        // no-op unless the request was abandoned mid-flight
        self.inner.diagnostics.complete_diagnostics(id);
    }
}

impl RenderOrchestrator {
    pub fn new(
        engine: EngineConfig,
        network_config: NetworkConfig,
        network: NetworkClient,
        backends: BackendRegistry,
    ) -> Self {
        let diagnostics = DiagnosticsCollector::new(DiagnosticsConfig {
            enabled: engine.enable_diagnostics,
            memory_threshold_bytes: engine.memory_pressure_threshold,
            ..Default::default()
        });

        Self {
            inner: Arc::new(OrchestratorInner {
                engine,
                network_config,
                network,
                methods: MethodChain::new(),
                diagnostics,
                backends,
                contexts: Mutex::new(HashMap::new()),
                progress: ProgressHub::new(),
            }),
        }
    }

    pub fn network(&self) -> &NetworkClient {
        &self.inner.network
    }

    pub fn methods(&self) -> &MethodChain {
        &self.inner.methods
    }

    pub fn diagnostics(&self) -> &DiagnosticsCollector {
        &self.inner.diagnostics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.engine
    }

    /// Render `source`, falling back through the method chain as needed
    ///
    /// Always resolves to a `RenderResult`; failures are reported through
    /// `success == false` and the last classified error.
    pub async fn render_pdf(&self, source: RenderSource, options: RenderOptions) -> RenderResult {
        let rendering_id = options
            .rendering_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let bucket = DocumentBucket::from_size(options.size_hint.or_else(|| source.known_size()));
        let requested = options
            .method
            .unwrap_or_else(|| self.inner.methods.get_preferred_method(bucket));
        let settings = RenderSettings::resolve(&self.inner.engine, &self.inner.network_config, &options);
        // with fallbacks off the requested method runs or fails as is
        let method = if settings.enable_fallbacks {
            self.available_from(requested).unwrap_or(requested)
        } else {
            requested
        };

        let handle = Arc::new(ContextHandle::new(&rendering_id));
        {
            let mut contexts = self.inner.contexts.lock();
            if contexts.contains_key(&rendering_id) {
                tracing::warn!(rendering_id = %rendering_id, "Rendering id already in progress");
                let mut error = RenderError::new(
                    RenderErrorKind::Unknown,
                    format!("Rendering {} is already in progress", rendering_id),
                    RenderStage::Initializing,
                    method,
                );
                error.recoverable = false;
                return RenderResult::failed(rendering_id, method, error, 0, 0);
            }
            contexts.insert(rendering_id.clone(), Arc::clone(&handle));
        }
        let _registration = ActiveRendering {
            inner: Arc::clone(&self.inner),
            handle: Arc::clone(&handle),
        };

        tracing::info!(
            rendering_id = %rendering_id,
            source = %source.locator(),
            bucket = %bucket,
            method = %method,
            "Starting rendering"
        );
        self.inner
            .diagnostics
            .start_diagnostics(&rendering_id, method, RenderStage::Initializing);

        let mut ctx = RenderContext::new(handle, source, settings, bucket, method);
        let outcome = self.run_chain(&mut ctx).await;
        let total_time_ms = ctx.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(pages) => {
                tracing::info!(
                    rendering_id = %ctx.rendering_id,
                    method = %ctx.current_method,
                    pages = pages.len(),
                    attempts = ctx.attempt_count,
                    total_time_ms,
                    "Rendering complete"
                );
                RenderResult::succeeded(
                    ctx.rendering_id.clone(),
                    ctx.current_method,
                    pages,
                    ctx.attempt_count,
                    total_time_ms,
                )
            }
            Err(error) => {
                if error.is_cancelled() {
                    tracing::info!(rendering_id = %ctx.rendering_id, "Rendering cancelled");
                } else {
                    tracing::error!(
                        rendering_id = %ctx.rendering_id,
                        method = %ctx.current_method,
                        attempts = ctx.attempt_count,
                        error = %error,
                        "Rendering failed"
                    );
                }
                RenderResult::failed(
                    ctx.rendering_id.clone(),
                    ctx.current_method,
                    error,
                    ctx.attempt_count,
                    total_time_ms,
                )
            }
        };

        let record = self.inner.diagnostics.complete_diagnostics(&ctx.rendering_id);
        result.with_diagnostics(record)
    }

    /// Register a listener for progress of `rendering_id`
    ///
    /// May be called before `render_pdf` starts when the caller supplies
    /// the id through `RenderOptions::rendering_id`.
    pub fn on_progress_update<F>(&self, rendering_id: &str, listener: F) -> ProgressSubscription
    where
        F: Fn(&ProgressState) + Send + Sync + 'static,
    {
        let listener: ProgressListener = Arc::new(listener);
        self.inner.progress.subscribe(rendering_id, listener)
    }

    /// Latest progress of an in-flight rendering
    pub fn progress(&self, rendering_id: &str) -> Option<ProgressState> {
        self.context(rendering_id).map(|handle| handle.snapshot())
    }

    /// Cancel an in-flight rendering; returns false for unknown ids
    pub fn cancel_rendering(&self, rendering_id: &str) -> bool {
        let Some(handle) = self.context(rendering_id) else {
            return false;
        };

        handle.cancel.cancel();
        self.inner.progress.remove_all(rendering_id);
        tracing::info!(rendering_id = %rendering_id, "Cancellation requested");
        true
    }

    /// Re-issue the current attempt of a stuck rendering
    pub fn force_retry(&self, rendering_id: &str) -> ForceRetry {
        let Some(handle) = self.context(rendering_id) else {
            return ForceRetry::NotFound;
        };
        if !handle.is_stuck() {
            return ForceRetry::NotStuck;
        }

        handle.retry.notify_one();
        ForceRetry::Retrying
    }

    /// React to a memory pressure signal from the host; returns evicted entries
    pub async fn handle_memory_pressure(&self, level: MemoryPressureLevel) -> usize {
        let evicted = self.inner.network.apply_memory_pressure(level).await;
        tracing::info!(level = ?level, evicted, "Handled memory pressure");
        evicted
    }

    /// Ids of renderings currently in flight
    pub fn active_renderings(&self) -> Vec<String> {
        self.inner.contexts.lock().keys().cloned().collect()
    }

    /// First method at or after `method` in the chain with a registered backend
    fn available_from(&self, method: RenderMethod) -> Option<RenderMethod> {
        let mut candidate = Some(method);
        while let Some(method) = candidate {
            if self.inner.backends.contains(method) {
                return Some(method);
            }
            tracing::debug!(method = %method, "No backend registered, skipping method");
            candidate = self.inner.methods.get_next_method(method);
        }
        None
    }

    fn context(&self, rendering_id: &str) -> Option<Arc<ContextHandle>> {
        self.inner.contexts.lock().get(rendering_id).cloned()
    }

    async fn run_chain(&self, ctx: &mut RenderContext) -> Result<Vec<RenderedPage>, RenderError> {
        loop {
            let method = ctx.current_method;
            let method_started = Instant::now();

            let error = match self.run_attempt_supervised(ctx).await {
                Ok(pages) => {
                    let render_time_ms = method_started.elapsed().as_millis() as u64;
                    self.inner
                        .methods
                        .record_method_success(method, ctx.bucket, render_time_ms);
                    return Ok(pages);
                }
                Err(error) => error,
            };

            let state = ctx.handle.set_stage(RenderStage::Error);
            self.inner
                .diagnostics
                .update_stage(&ctx.rendering_id, RenderStage::Error);
            self.emit(&ctx.handle, &state);

            ctx.error_history.push(error.clone());
            self.inner.diagnostics.add_error(&ctx.rendering_id, error.clone());

            if error.is_cancelled() {
                return Err(error);
            }
            self.inner.methods.record_method_failure(method, ctx.bucket);

            if !error.recoverable {
                return Err(error);
            }

            let next = if ctx.settings.enable_fallbacks {
                self.inner
                    .methods
                    .get_next_method(method)
                    .and_then(|next| self.available_from(next))
            } else {
                None
            };
            let Some(next) = next else {
                return Err(error);
            };

            tracing::warn!(
                rendering_id = %ctx.rendering_id,
                failed = %method,
                next = %next,
                error = %error,
                "Method failed, falling back"
            );
            ctx.current_method = next;
            ctx.attempt_count += 1;
            self.inner.diagnostics.update_method(&ctx.rendering_id, next);
        }
    }

    async fn run_attempt_supervised(
        &self,
        ctx: &mut RenderContext,
    ) -> Result<Vec<RenderedPage>, RenderError> {
        let handle = Arc::clone(&ctx.handle);
        let timeout = ctx.settings.timeout;
        let stuck_threshold = ctx.settings.stuck_detection_threshold;

        let mut attempt = self.start_attempt(ctx);
        let mut deadline = Instant::now() + timeout;
        let mut ticker = tokio::time::interval(ctx.settings.progress_update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = handle.cancel.cancelled() => {
                    return Err(RenderError::cancelled(handle.stage(), ctx.current_method));
                }
                result = &mut attempt => return result,
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(
                        rendering_id = %ctx.rendering_id,
                        method = %ctx.current_method,
                        timeout_ms = timeout.as_millis() as u64,
                        "Attempt timed out"
                    );
                    return Err(RenderError::timeout(timeout, handle.stage(), ctx.current_method));
                }
                _ = handle.retry.notified() => {
                    // permit left over from an attempt that already ended
                    if !handle.is_stuck() {
                        continue;
                    }
                    tracing::info!(
                        rendering_id = %ctx.rendering_id,
                        method = %ctx.current_method,
                        "Force retry of stuck attempt"
                    );
                    ctx.attempt_count += 1;
                    attempt = self.start_attempt(ctx);
                    deadline = Instant::now() + timeout;
                }
                _ = ticker.tick() => {
                    if let Some(state) = handle.check_stuck(stuck_threshold) {
                        tracing::warn!(
                            rendering_id = %ctx.rendering_id,
                            stage = %state.stage,
                            percentage = state.percentage,
                            "Rendering appears stuck"
                        );
                        self.emit(&handle, &state);
                    }
                }
            }
        }
    }

    /// Reset progress to `INITIALIZING` and build the attempt future
    fn start_attempt(&self, ctx: &RenderContext) -> AttemptFuture {
        let state = ctx.handle.reset_for_attempt();
        self.inner
            .diagnostics
            .update_stage(&ctx.rendering_id, RenderStage::Initializing);
        self.emit(&ctx.handle, &state);

        tracing::debug!(
            rendering_id = %ctx.rendering_id,
            method = %ctx.current_method,
            attempt = ctx.attempt_count,
            "Starting attempt"
        );

        let this = self.clone();
        let plan = AttemptPlan {
            handle: Arc::clone(&ctx.handle),
            source: ctx.source.clone(),
            method: ctx.current_method,
            settings: ctx.settings.clone(),
        };
        async move { this.run_attempt(plan).await }.boxed()
    }

    async fn run_attempt(&self, plan: AttemptPlan) -> Result<Vec<RenderedPage>, RenderError> {
        let AttemptPlan {
            handle,
            source,
            method,
            settings,
        } = plan;
        let id = handle.rendering_id.as_str();

        let backend = self.inner.backends.get(method).ok_or_else(|| {
            RenderError::new(
                RenderErrorKind::Unknown,
                format!("No backend available for {}", method),
                RenderStage::Initializing,
                method,
            )
            .with_context("origin", "registry")
        })?;

        self.transition(&handle, method, RenderStage::Fetching)?;
        let document = if backend.requires_fetch() {
            self.fetch_document(&handle, &source, method, &settings).await?
        } else {
            FetchedDocument {
                locator: source.locator().to_string(),
                bytes: match &source {
                    RenderSource::Bytes { data, .. } => data.clone(),
                    RenderSource::Url(_) => Default::default(),
                },
                content_type: None,
            }
        };

        self.transition(&handle, method, RenderStage::Parsing)?;
        let parse_started = Instant::now();
        let parsed = backend
            .parse(&document)
            .await
            .map_err(|e| RenderError::from_backend(&e, RenderStage::Parsing, method))?;
        self.inner.diagnostics.update_performance_metrics(
            id,
            PerformanceMetrics {
                parse_time_ms: Some(parse_started.elapsed().as_millis() as u64),
                ..Default::default()
            },
        );

        self.transition(&handle, method, RenderStage::Rendering)?;
        let render_started = Instant::now();
        let pages = backend
            .render(&document, &parsed)
            .await
            .map_err(|e| RenderError::from_backend(&e, RenderStage::Rendering, method))?;
        let page_bytes: usize = pages.iter().map(|p| p.data.len()).sum();
        self.inner.diagnostics.update_performance_metrics(
            id,
            PerformanceMetrics {
                render_time_ms: Some(render_started.elapsed().as_millis() as u64),
                memory_usage_bytes: Some((document.bytes.len() + page_bytes) as u64),
                ..Default::default()
            },
        );

        self.transition(&handle, method, RenderStage::Complete)?;
        Ok(pages)
    }

    async fn fetch_document(
        &self,
        handle: &Arc<ContextHandle>,
        source: &RenderSource,
        method: RenderMethod,
        settings: &RenderSettings,
    ) -> Result<FetchedDocument, RenderError> {
        let url = match source {
            RenderSource::Bytes { name, data } => {
                let len = data.len() as u64;
                let state = handle.set_bytes(len, Some(len));
                self.emit(handle, &state);
                return Ok(FetchedDocument {
                    locator: name.clone(),
                    bytes: data.clone(),
                    content_type: None,
                });
            }
            RenderSource::Url(url) => url,
        };

        let on_progress: ProgressCallback = {
            let hub = self.inner.progress.clone();
            let handle = Arc::clone(handle);
            Arc::new(move |progress: FetchProgress| {
                if handle.is_cancelled() {
                    return;
                }
                let state = handle.set_bytes(progress.loaded, progress.total);
                hub.emit(&handle.rendering_id, &state);
            })
        };
        let options = FetchOptions {
            enable_cache: settings.enable_cache,
            cache_ttl: settings.cache_ttl,
            retry: settings.retry.clone(),
            timeout: Some(settings.timeout),
            on_progress: Some(on_progress),
            cancel: Some(handle.cancel.child_token()),
        };

        let started = Instant::now();
        let response = self
            .inner
            .network
            .optimized_fetch(url, options)
            .await
            .map_err(|e| RenderError::from_network(&e, RenderStage::Fetching, method))?;

        self.inner.diagnostics.update_performance_metrics(
            &handle.rendering_id,
            PerformanceMetrics {
                network_time_ms: Some(started.elapsed().as_millis() as u64),
                ..Default::default()
            },
        );
        tracing::debug!(
            rendering_id = %handle.rendering_id,
            bytes = response.len(),
            from_cache = response.from_cache,
            "Document fetched"
        );

        Ok(FetchedDocument {
            locator: url.clone(),
            bytes: response.body,
            content_type: response.content_type,
        })
    }

    /// Move to `stage` unless the rendering was cancelled
    fn transition(
        &self,
        handle: &ContextHandle,
        method: RenderMethod,
        stage: RenderStage,
    ) -> Result<(), RenderError> {
        if handle.is_cancelled() {
            return Err(RenderError::cancelled(handle.stage(), method));
        }

        let state = handle.set_stage(stage);
        tracing::debug!(
            rendering_id = %handle.rendering_id,
            method = %method,
            stage = %stage,
            percentage = state.percentage,
            "Stage transition"
        );
        self.inner.diagnostics.update_stage(&handle.rendering_id, stage);
        self.emit(handle, &state);
        Ok(())
    }

    fn emit(&self, handle: &ContextHandle, state: &ProgressState) {
        if !handle.is_cancelled() {
            self.inner.progress.emit(&handle.rendering_id, state);
        }
    }
}

impl std::fmt::Debug for RenderOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderOrchestrator")
            .field("backends", &self.inner.backends.methods())
            .field("active", &self.inner.contexts.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::methods::StatsKey;
    use crate::network::mock::{MockReply, MockTransport};
    use crate::network::{MemoryCacheStore, NetworkError};
    use crate::render::backend::mock::{MockBackend, MockOutcome};
    use crate::render::backend::{BackendError, DownloadFallbackBackend};

    const URL: &str = "https://example.test/doc.pdf";
    const PDF: &[u8] = b"%PDF-1.7 test document";

    fn engine() -> EngineConfig {
        EngineConfig {
            timeout: Duration::from_millis(1000),
            ..Default::default()
        }
    }

    fn orchestrator(transport: MockTransport, backends: &[Arc<MockBackend>]) -> RenderOrchestrator {
        let mut registry = BackendRegistry::empty();
        for backend in backends {
            registry.register(backend.clone());
        }
        with_registry(transport, registry)
    }

    fn with_registry(transport: MockTransport, registry: BackendRegistry) -> RenderOrchestrator {
        let network = NetworkClient::new(
            Arc::new(transport),
            Arc::new(MemoryCacheStore::open("test", 16)),
        );
        RenderOrchestrator::new(engine(), NetworkConfig::default(), network, registry)
    }

    fn backend(method: RenderMethod, outcome: MockOutcome) -> Arc<MockBackend> {
        Arc::new(MockBackend::new(method, outcome))
    }

    fn with_id(id: &str) -> RenderOptions {
        RenderOptions {
            rendering_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_server_side_conversion() {
        let primary = backend(
            RenderMethod::PrimaryCanvas,
            MockOutcome::FailRender(BackendError::Surface("context lost".into())),
        );
        let native = backend(
            RenderMethod::NativeFallback,
            MockOutcome::FailParse(BackendError::Unsupported("no native viewer".into())),
        );
        let server = Arc::new(
            MockBackend::new(RenderMethod::ServerSideConversion, MockOutcome::Pages(2))
                .with_delay(Duration::from_millis(600)),
        );
        let orch = orchestrator(
            MockTransport::new(MockReply::ok(PDF)),
            &[primary, native, server],
        );

        let result = orch.render_pdf(RenderSource::url(URL), RenderOptions::default()).await;

        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.method, RenderMethod::ServerSideConversion);
        assert_eq!(result.pages.len(), 2);
        assert_eq!(result.attempts, 3);

        let record = result.diagnostics.unwrap();
        assert_eq!(record.errors.len(), 2);
        assert_eq!(record.errors[0].kind, RenderErrorKind::RenderingSurface);
        assert_eq!(record.errors[1].kind, RenderErrorKind::Unknown);
        assert_eq!(record.method, RenderMethod::ServerSideConversion);
        assert_eq!(record.stage, RenderStage::Complete);

        let stats = orch.methods().get_method_statistics();
        let server_stats = &stats[&StatsKey::new(RenderMethod::ServerSideConversion, DocumentBucket::Unknown)];
        assert_eq!(server_stats.success_count, 1);
        assert!((server_stats.average_render_time_ms - 600.0).abs() < 5.0);
        let primary_stats = &stats[&StatsKey::new(RenderMethod::PrimaryCanvas, DocumentBucket::Unknown)];
        assert_eq!((primary_stats.success_count, primary_stats.total_attempts), (0, 1));

        assert!(orch.active_renderings().is_empty());
        assert_eq!(orch.network().in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_advances_chain() {
        let primary = backend(RenderMethod::PrimaryCanvas, MockOutcome::Hang);
        let native = backend(RenderMethod::NativeFallback, MockOutcome::Pages(1));
        let orch = orchestrator(MockTransport::new(MockReply::ok(PDF)), &[primary, native]);

        let result = orch.render_pdf(RenderSource::url(URL), RenderOptions::default()).await;

        assert!(result.success);
        assert_eq!(result.method, RenderMethod::NativeFallback);
        let errors = result.diagnostics.unwrap().errors;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, RenderErrorKind::Timeout);
        assert_eq!(errors[0].stage, RenderStage::Rendering);
        assert!(errors[0].recoverable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_chain_reports_last_error() {
        let surface = || MockOutcome::FailRender(BackendError::Surface("lost".into()));
        let orch = orchestrator(
            MockTransport::new(MockReply::ok(PDF)),
            &[
                backend(
                    RenderMethod::PrimaryCanvas,
                    MockOutcome::FailRender(BackendError::OutOfMemory("too big".into())),
                ),
                backend(RenderMethod::NativeFallback, surface()),
                backend(RenderMethod::ImageBased, surface()),
                backend(RenderMethod::ServerSideConversion, surface()),
                backend(
                    RenderMethod::DownloadFallback,
                    MockOutcome::FailParse(BackendError::Other("no handler".into())),
                ),
            ],
        );

        let result = orch.render_pdf(RenderSource::url(URL), RenderOptions::default()).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 5);
        assert_eq!(result.method, RenderMethod::DownloadFallback);
        let error = result.error.unwrap();
        assert_eq!(error.kind, RenderErrorKind::Unknown);
        assert_eq!(error.method, RenderMethod::DownloadFallback);

        let errors = result.diagnostics.unwrap().errors;
        assert_eq!(errors.len(), 5);
        assert_eq!(errors[0].kind, RenderErrorKind::Memory);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_fallback_ends_chain_successfully() {
        let primary = backend(
            RenderMethod::PrimaryCanvas,
            MockOutcome::FailRender(BackendError::Surface("lost".into())),
        );
        let mut registry = BackendRegistry::empty();
        registry
            .register(primary)
            .register(Arc::new(DownloadFallbackBackend));
        let orch = with_registry(MockTransport::new(MockReply::ok(PDF)), registry);

        let result = orch.render_pdf(RenderSource::url(URL), RenderOptions::default()).await;

        assert!(result.success);
        assert_eq!(result.method, RenderMethod::DownloadFallback);
        assert!(result.pages.is_empty());
        // methods without a backend are skipped, not attempted
        assert_eq!(result.attempts, 2);
        assert_eq!(result.diagnostics.unwrap().errors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_registry_skips_unregistered_methods() {
        let orch = with_registry(
            MockTransport::new(MockReply::ok(PDF)),
            BackendRegistry::default(),
        );

        let result = orch.render_pdf(RenderSource::url(URL), RenderOptions::default()).await;

        assert!(result.success);
        assert_eq!(result.method, RenderMethod::DownloadFallback);
        assert_eq!(result.attempts, 1);
        let record = result.diagnostics.unwrap();
        assert!(record.errors.is_empty());
        assert!(orch.diagnostics().identify_bottlenecks(&record).is_empty());

        let stats = orch.methods().get_method_statistics();
        assert_eq!(stats.len(), 1);
        let download = &stats[&StatsKey::new(RenderMethod::DownloadFallback, DocumentBucket::Unknown)];
        assert_eq!(download.success_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_moves_to_next_method() {
        let primary = backend(RenderMethod::PrimaryCanvas, MockOutcome::Pages(1));
        let native = backend(RenderMethod::NativeFallback, MockOutcome::Pages(1));
        let transport = MockTransport::new(MockReply::ok(PDF)).with_script(vec![MockReply::Fail(
            NetworkError::Transport("connection refused".into()),
        )]);
        let orch = orchestrator(transport, &[primary.clone(), native.clone()]);
        let options = RenderOptions {
            max_retries: Some(0),
            ..Default::default()
        };

        let result = orch.render_pdf(RenderSource::url(URL), options).await;

        assert!(result.success);
        assert_eq!(result.method, RenderMethod::NativeFallback);
        assert_eq!(result.attempts, 2);
        assert_eq!((primary.calls(), native.calls()), (0, 1));

        let errors = result.diagnostics.unwrap().errors;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, RenderErrorKind::Network);
        assert_eq!(errors[0].stage, RenderStage::Fetching);
        assert_eq!(errors[0].method, RenderMethod::PrimaryCanvas);
        assert!(errors[0].recoverable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_document_aborts_chain() {
        let primary = backend(
            RenderMethod::PrimaryCanvas,
            MockOutcome::FailParse(BackendError::InvalidDocument("bad xref".into())),
        );
        let native = backend(RenderMethod::NativeFallback, MockOutcome::Pages(1));
        let orch = orchestrator(
            MockTransport::new(MockReply::ok(PDF)),
            &[primary, native.clone()],
        );

        let result = orch.render_pdf(RenderSource::url(URL), RenderOptions::default()).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        let error = result.error.unwrap();
        assert_eq!(error.kind, RenderErrorKind::InvalidDocument);
        assert!(!error.recoverable);
        assert_eq!(native.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_status_aborts_chain() {
        let primary = backend(RenderMethod::PrimaryCanvas, MockOutcome::Pages(1));
        let transport = MockTransport::new(MockReply::status(404));
        let orch = orchestrator(transport, &[primary.clone()]);

        let result = orch.render_pdf(RenderSource::url(URL), RenderOptions::default()).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        let error = result.error.unwrap();
        assert_eq!(error.kind, RenderErrorKind::Http { status: 404 });
        assert_eq!(error.status_code, Some(404));
        assert_eq!(error.stage, RenderStage::Fetching);
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallbacks_disabled() {
        let primary = backend(
            RenderMethod::PrimaryCanvas,
            MockOutcome::FailRender(BackendError::Surface("lost".into())),
        );
        let native = backend(RenderMethod::NativeFallback, MockOutcome::Pages(1));
        let orch = orchestrator(
            MockTransport::new(MockReply::ok(PDF)),
            &[primary, native.clone()],
        );

        let options = RenderOptions {
            enable_fallbacks: Some(false),
            ..Default::default()
        };
        let result = orch.render_pdf(RenderSource::url(URL), options).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.error.unwrap().kind, RenderErrorKind::RenderingSurface);
        assert_eq!(native.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_learned_preference_picks_start_method() {
        let primary = backend(RenderMethod::PrimaryCanvas, MockOutcome::Pages(1));
        let image = backend(RenderMethod::ImageBased, MockOutcome::Pages(1));
        let orch = orchestrator(
            MockTransport::new(MockReply::ok(PDF)),
            &[primary.clone(), image.clone()],
        );
        orch.methods()
            .record_method_success(RenderMethod::ImageBased, DocumentBucket::Small, 100);

        let source = RenderSource::bytes("local.pdf", PDF.to_vec());
        let result = orch.render_pdf(source.clone(), RenderOptions::default()).await;

        assert!(result.success);
        assert_eq!(result.method, RenderMethod::ImageBased);
        assert_eq!(primary.calls(), 0);

        // explicit override wins over the learned preference
        let options = RenderOptions {
            method: Some(RenderMethod::PrimaryCanvas),
            ..Default::default()
        };
        let result = orch.render_pdf(source, options).await;
        assert_eq!(result.method, RenderMethod::PrimaryCanvas);
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_listener_sees_stages_in_order() {
        let primary = backend(RenderMethod::PrimaryCanvas, MockOutcome::Pages(1));
        let orch = orchestrator(MockTransport::new(MockReply::ok(PDF)), &[primary]);

        let seen = Arc::new(Mutex::new(Vec::<ProgressState>::new()));
        let sink = seen.clone();
        let _subscription = orch.on_progress_update("r-events", move |state| {
            sink.lock().push(state.clone());
        });

        let result = orch.render_pdf(RenderSource::url(URL), with_id("r-events")).await;
        assert!(result.success);

        let seen = seen.lock();
        let mut stages: Vec<RenderStage> = seen.iter().map(|s| s.stage).collect();
        stages.dedup();
        assert_eq!(
            stages,
            vec![
                RenderStage::Initializing,
                RenderStage::Fetching,
                RenderStage::Parsing,
                RenderStage::Rendering,
                RenderStage::Complete,
            ]
        );
        assert!(seen.windows(2).all(|w| w[0].percentage <= w[1].percentage));
        assert_eq!(seen.last().map(|s| s.percentage), Some(100.0));
        assert_eq!(seen.last().map(|s| s.bytes_loaded), Some(PDF.len() as u64));
        assert_eq!(orch.inner.progress.listener_count("r-events"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_resolves_and_silences_listeners() {
        let primary = backend(RenderMethod::PrimaryCanvas, MockOutcome::Hang);
        let orch = orchestrator(MockTransport::new(MockReply::ok(PDF)), &[primary]);

        let events = Arc::new(AtomicUsize::new(0));
        let counter = events.clone();
        let _subscription = orch.on_progress_update("r-cancel", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let task = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.render_pdf(RenderSource::url(URL), with_id("r-cancel")).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(orch.active_renderings(), vec!["r-cancel".to_string()]);

        let before = events.load(Ordering::SeqCst);
        assert!(before > 0);
        assert!(orch.cancel_rendering("r-cancel"));

        let result = task.await.unwrap();
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.is_cancelled());
        assert!(!error.recoverable);
        assert_eq!(events.load(Ordering::SeqCst), before);

        // cancellation does not count against the method
        assert!(orch.methods().get_method_statistics().is_empty());
        assert!(orch.active_renderings().is_empty());
        assert!(!orch.cancel_rendering("r-cancel"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_detection_and_force_retry() {
        let primary = backend(RenderMethod::PrimaryCanvas, MockOutcome::Hang);
        let orch = orchestrator(MockTransport::new(MockReply::ok(PDF)), &[primary.clone()]);
        let options = RenderOptions {
            rendering_id: Some("r-stuck".to_string()),
            timeout_ms: Some(60_000),
            stuck_detection_threshold_ms: Some(10_000),
            ..Default::default()
        };

        let task = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.render_pdf(RenderSource::url(URL), options).await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!orch.progress("r-stuck").unwrap().is_stuck);
        assert_eq!(orch.force_retry("r-stuck"), ForceRetry::NotStuck);

        tokio::time::sleep(Duration::from_secs(6)).await;
        let state = orch.progress("r-stuck").unwrap();
        assert!(state.is_stuck);
        assert_eq!(state.stage, RenderStage::Rendering);

        assert_eq!(orch.force_retry("r-stuck"), ForceRetry::Retrying);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(primary.calls(), 2);
        assert!(!orch.progress("r-stuck").unwrap().is_stuck);
        assert_eq!(orch.force_retry("unknown"), ForceRetry::NotFound);

        orch.cancel_rendering("r-stuck");
        let result = task.await.unwrap();
        assert_eq!(result.attempts, 2);
        assert!(result.error.unwrap().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_signal_ignored_when_not_stuck() {
        let primary = backend(RenderMethod::PrimaryCanvas, MockOutcome::Hang);
        let orch = orchestrator(MockTransport::new(MockReply::ok(PDF)), &[primary.clone()]);
        let options = RenderOptions {
            rendering_id: Some("r-stale".to_string()),
            timeout_ms: Some(60_000),
            ..Default::default()
        };

        let task = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.render_pdf(RenderSource::url(URL), options).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        orch.context("r-stale").unwrap().retry.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(primary.calls(), 1);

        orch.cancel_rendering("r-stale");
        assert_eq!(task.await.unwrap().attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_rendering_id_rejected() {
        let primary = backend(RenderMethod::PrimaryCanvas, MockOutcome::Hang);
        let orch = orchestrator(MockTransport::new(MockReply::ok(PDF)), &[primary]);

        let task = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.render_pdf(RenderSource::url(URL), with_id("dup")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = orch.render_pdf(RenderSource::url(URL), with_id("dup")).await;
        assert!(!result.success);
        assert!(!result.error.unwrap().recoverable);
        assert_eq!(orch.active_renderings().len(), 1);

        orch.cancel_rendering("dup");
        assert!(!task.await.unwrap().success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_pressure_clears_document_cache() {
        let primary = backend(RenderMethod::PrimaryCanvas, MockOutcome::Pages(1));
        let orch = orchestrator(MockTransport::new(MockReply::ok(PDF)), &[primary]);

        assert!(orch.render_pdf(RenderSource::url(URL), RenderOptions::default()).await.success);
        assert_eq!(orch.network().get_cache_size().await, 1);

        assert_eq!(orch.handle_memory_pressure(MemoryPressureLevel::Normal).await, 0);
        assert_eq!(orch.handle_memory_pressure(MemoryPressureLevel::Critical).await, 1);
        assert_eq!(orch.network().get_cache_size().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_diagnostics_capture_metrics() {
        let primary = Arc::new(
            MockBackend::new(RenderMethod::PrimaryCanvas, MockOutcome::Pages(3))
                .with_delay(Duration::from_millis(200)),
        );
        let orch = orchestrator(MockTransport::new(MockReply::ok(PDF)), &[primary]);

        let result = orch.render_pdf(RenderSource::url(URL), with_id("r-metrics")).await;
        let metrics = result.diagnostics.unwrap().performance_metrics;

        assert_eq!(metrics.render_time_ms, Some(200));
        assert_eq!(metrics.memory_usage_bytes, Some((PDF.len() + 3 * 2) as u64));
        assert!(metrics.network_time_ms.is_some());
        assert!(orch.diagnostics().export_diagnostics("r-metrics").is_some());
    }
}
