//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::network::{MemoryCacheStore, NetworkClient, ReqwestTransport};
use crate::render::{BackendRegistry, RemoteConversionBackend, RenderOrchestrator};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    orchestrator: RenderOrchestrator,
}

impl AppState {
    /// Build the network client, backend registry and orchestrator from `config`
    pub fn new(config: Config) -> Self {
        let network = NetworkClient::new(
            Arc::new(ReqwestTransport::new()),
            Arc::new(MemoryCacheStore::open("documents", config.network.cache_capacity)),
        );

        let mut backends = BackendRegistry::default();
        if let Some(url) = &config.conversion_service_url {
            tracing::info!(url = %url, "Server-side conversion enabled");
            backends.register(Arc::new(RemoteConversionBackend::new(url)));
        }

        let orchestrator = RenderOrchestrator::new(
            config.engine.clone(),
            config.network.clone(),
            network,
            backends,
        );

        Self::with_orchestrator(config, orchestrator)
    }

    /// State around an existing orchestrator
    pub fn with_orchestrator(config: Config, orchestrator: RenderOrchestrator) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                orchestrator,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the rendering orchestrator
    pub fn orchestrator(&self) -> &RenderOrchestrator {
        &self.inner.orchestrator
    }
}
