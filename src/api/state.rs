use std::sync::Arc;

use crate::{
    cache::{ResponseCache, TtlCache},
    config::Config,
    error::AppResult,
    services::{
        providers::{GeminiGateway, ModelGateway},
        Orchestrator,
    },
};

/// Shared application state
///
/// Built once per process; the cache handle is shared with the orchestrator
/// so the health endpoint can report on it.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub cache: Arc<dyn ResponseCache>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the orchestrator from explicit collaborators
    pub fn new(
        config: Config,
        cache: Arc<dyn ResponseCache>,
        gateway: Arc<dyn ModelGateway>,
    ) -> Self {
        let orchestrator = Orchestrator::from_config(&config, Arc::clone(&cache), gateway);
        Self {
            orchestrator: Arc::new(orchestrator),
            cache,
            config: Arc::new(config),
        }
    }

    /// Production wiring: in-memory TTL cache and the Gemini gateway
    pub fn from_config(config: Config) -> AppResult<Self> {
        let cache = Arc::new(TtlCache::new(config.cache_ttl(), config.cache_max_size));
        let gateway = Arc::new(GeminiGateway::from_config(&config)?);

        tracing::info!(
            credential_configured = config.has_credential(),
            cache_ttl_ms = config.cache_ttl_ms,
            cache_max_size = config.cache_max_size,
            fast_timeout_ms = config.fast_timeout_ms,
            "Application state initialized"
        );

        Ok(Self::new(config, cache, gateway))
    }
}
