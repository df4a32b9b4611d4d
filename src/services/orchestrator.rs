use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::{
    cache::{CacheKey, ResponseCache},
    config::{Config, TierLimits},
    error::{AppError, AppResult},
    models::{ChatRequest, ChatResponse, ReplyMode},
    services::{normalizer, providers::ModelGateway},
};

/// Outcome of racing the model call against the fast timeout
#[derive(Debug)]
enum RaceOutcome {
    /// The gateway answered in time with raw text
    Answered(String),
    /// The gateway failed in time (credential, transport, status, panic)
    Failed(AppError),
    /// The timer fired first
    TimedOut,
}

/// Runs a chat request end to end
///
/// Flow: cache lookup → (miss) race the gateway against the fast timeout →
/// normalize whatever arrived → write the cache → respond. `handle` never
/// fails; every error path degrades into fallback cards.
pub struct Orchestrator {
    cache: Arc<dyn ResponseCache>,
    gateway: Arc<dyn ModelGateway>,
    fast_timeout: Duration,
    limits: TierLimits,
}

impl Orchestrator {
    pub fn new(
        cache: Arc<dyn ResponseCache>,
        gateway: Arc<dyn ModelGateway>,
        fast_timeout: Duration,
        limits: TierLimits,
    ) -> Self {
        Self {
            cache,
            gateway,
            fast_timeout,
            limits,
        }
    }

    pub fn from_config(
        config: &Config,
        cache: Arc<dyn ResponseCache>,
        gateway: Arc<dyn ModelGateway>,
    ) -> Self {
        Self::new(cache, gateway, config.fast_timeout(), config.tier_limits())
    }

    pub fn fast_timeout(&self) -> Duration {
        self.fast_timeout
    }

    pub fn limits(&self) -> TierLimits {
        self.limits
    }

    /// Produces the response for `request`
    pub async fn handle(&self, request: ChatRequest) -> ChatResponse {
        let started = Instant::now();
        let count = self.limits.count_for(request.tier());

        let mut response = match self.resolve(&request, count).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    tier = %request.tier(),
                    "Chat pipeline failed, serving fallback"
                );
                normalizer::fallback_response(&request, count)
            }
        };

        response.meta.latency_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            tier = %request.tier(),
            cached = response.meta.cached,
            mode = ?response.meta.mode,
            latency_ms = response.meta.latency_ms,
            "Chat request completed"
        );

        response
    }

    async fn resolve(&self, request: &ChatRequest, count: usize) -> AppResult<ChatResponse> {
        let key = CacheKey::for_request(request);

        match self.cache.get(&key).await {
            Ok(Some(mut hit)) => {
                tracing::debug!(key = %key, "Cache hit");
                hit.meta.cached = true;
                return Ok(hit);
            }
            Ok(None) => tracing::debug!(key = %key, "Cache miss"),
            // A broken cache must not take the endpoint down.
            Err(e) => tracing::warn!(error = %e, cache = self.cache.name(), "Cache read failed"),
        }

        let (raw, mode) = match self.race_model(request).await {
            RaceOutcome::Answered(text) => (Some(text), ReplyMode::Model),
            RaceOutcome::Failed(e) => {
                tracing::warn!(
                    error = %e,
                    gateway = self.gateway.name(),
                    "Model call failed, using fallback"
                );
                (None, ReplyMode::Fallback)
            }
            RaceOutcome::TimedOut => {
                tracing::warn!(
                    timeout_ms = self.fast_timeout.as_millis() as u64,
                    gateway = self.gateway.name(),
                    "Model call timed out, using fallback"
                );
                (None, ReplyMode::Timeout)
            }
        };

        let mut response =
            contain_panic("normalize", || normalizer::normalize(raw.as_deref(), request, count))?;
        response.meta.mode = mode;

        // Degraded answers are cached too, so a failing upstream is not
        // hammered by the same query.
        if let Err(e) = self.cache.set(key, response.clone()).await {
            tracing::warn!(error = %e, cache = self.cache.name(), "Cache write failed");
        }

        Ok(response)
    }

    /// Races the gateway call against the fast timeout.
    ///
    /// The call runs on its own task. If the timer wins, the task's handle is
    /// dropped: the call keeps running until its own transport timeout, and
    /// its result is discarded without touching the cache or any other state.
    async fn race_model(&self, request: &ChatRequest) -> RaceOutcome {
        let gateway = Arc::clone(&self.gateway);
        let owned_request = request.clone();
        let call = tokio::spawn(async move { gateway.invoke(&owned_request).await });

        tokio::select! {
            biased;
            joined = call => match joined {
                Ok(Ok(text)) => RaceOutcome::Answered(text),
                Ok(Err(e)) => RaceOutcome::Failed(e),
                Err(e) => {
                    RaceOutcome::Failed(AppError::Internal(format!("model task failed: {}", e)))
                }
            },
            _ = tokio::time::sleep(self.fast_timeout) => RaceOutcome::TimedOut,
        }
    }
}

/// Runs a synchronous pipeline stage, turning a panic into `AppError::Internal`.
fn contain_panic<T>(stage: &str, f: impl FnOnce() -> T) -> AppResult<T> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|_| AppError::Internal(format!("{} stage panicked", stage)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{NoopCache, TtlCache},
        models::{Label, Tier, PRICE_VARIES},
        services::providers::MockModelGateway,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MODEL_JSON: &str = r#"{
        "text": "Você pediu: fone bluetooth.",
        "recommendations": [
            { "label": "CHEAPEST", "title": "Fone QCY H2", "searchQuery": "QCY H2", "priceHint": "R$ 120" },
            { "label": "BEST_VALUE", "title": "JBL Tune 510BT", "searchQuery": "JBL Tune 510BT" },
            { "label": "PREMIUM", "title": "Sony WH-1000XM5", "searchQuery": "Sony WH-1000XM5" }
        ]
    }"#;

    /// Gateway that answers after a fixed delay and counts its calls
    struct DelayedGateway {
        delay: Duration,
        reply: String,
        calls: AtomicUsize,
    }

    impl DelayedGateway {
        fn answering(delay: Duration, text: &str) -> Self {
            Self {
                delay,
                reply: text.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ModelGateway for DelayedGateway {
        async fn invoke(&self, _request: &ChatRequest) -> AppResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.clone())
        }

        fn name(&self) -> &'static str {
            "delayed"
        }
    }

    struct PanickingGateway;

    #[async_trait::async_trait]
    impl ModelGateway for PanickingGateway {
        async fn invoke(&self, _request: &ChatRequest) -> AppResult<String> {
            panic!("gateway exploded")
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest::new(message, Tier::Free, "tag-1")
    }

    fn orchestrator(
        cache: Arc<dyn ResponseCache>,
        gateway: Arc<dyn ModelGateway>,
    ) -> Orchestrator {
        Orchestrator::new(
            cache,
            gateway,
            Duration::from_millis(1_200),
            TierLimits::new(3, 4, 5),
        )
    }

    fn mock_answering(times: usize) -> MockModelGateway {
        let mut gateway = MockModelGateway::new();
        gateway
            .expect_invoke()
            .times(times)
            .returning(|_| Ok(MODEL_JSON.to_string()));
        gateway.expect_name().return_const("mock");
        gateway
    }

    #[tokio::test]
    async fn test_model_answer_is_normalized() {
        let orchestrator = orchestrator(Arc::new(NoopCache), Arc::new(mock_answering(1)));

        let response = orchestrator.handle(request("fone bluetooth")).await;

        assert_eq!(response.meta.mode, ReplyMode::Model);
        assert!(!response.meta.cached);
        assert_eq!(response.meta.affiliate_tag_used, "tag-1");
        assert_eq!(response.recommendations.len(), 3);
        assert_eq!(response.recommendations[0].label, Label::Cheapest);
        assert_eq!(response.recommendations[0].price_hint, "R$ 120");
    }

    #[tokio::test]
    async fn test_second_identical_request_is_served_from_cache() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60), 10));
        let orchestrator = orchestrator(cache, Arc::new(mock_answering(1)));

        let first = orchestrator.handle(request("fone bluetooth")).await;
        let second = orchestrator.handle(request("  fone   bluetooth ")).await;

        assert!(!first.meta.cached);
        assert!(second.meta.cached);
        assert_eq!(first.recommendations, second.recommendations);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_invokes_gateway_again() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60), 10));
        let orchestrator = orchestrator(cache, Arc::new(mock_answering(2)));

        orchestrator.handle(request("fone bluetooth")).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        let again = orchestrator.handle(request("fone bluetooth")).await;

        assert!(!again.meta.cached);
        assert_eq!(again.meta.mode, ReplyMode::Model);
    }

    #[tokio::test]
    async fn test_gateway_error_degrades_to_fallback() {
        let mut gateway = MockModelGateway::new();
        gateway
            .expect_invoke()
            .times(1)
            .returning(|_| Err(AppError::MissingCredential("API_KEY".to_string())));
        gateway.expect_name().return_const("mock");

        let orchestrator = orchestrator(Arc::new(NoopCache), Arc::new(gateway));
        let response = orchestrator.handle(request("cafeteira")).await;

        assert_eq!(response.meta.mode, ReplyMode::Fallback);
        assert_eq!(response.recommendations.len(), 3);
        assert!(response
            .recommendations
            .iter()
            .all(|r| r.price_hint == PRICE_VARIES && r.title.starts_with("cafeteira")));
    }

    #[test]
    fn test_contain_panic_maps_to_internal_error() {
        let ok = contain_panic("normalize", || 7);
        assert_eq!(ok.unwrap(), 7);

        let err = contain_panic("normalize", || -> usize { panic!("bad index") }).unwrap_err();
        assert!(matches!(err, AppError::Internal(ref msg) if msg.contains("normalize")));
    }

    #[tokio::test]
    async fn test_gateway_panic_degrades_to_fallback() {
        let orchestrator = orchestrator(Arc::new(NoopCache), Arc::new(PanickingGateway));
        let response = orchestrator.handle(request("cafeteira")).await;

        assert_eq!(response.meta.mode, ReplyMode::Fallback);
        assert_eq!(response.recommendations.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_model_loses_race_and_never_overwrites_cache() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(600), 10));
        let gateway = Arc::new(DelayedGateway::answering(Duration::from_secs(5), MODEL_JSON));
        let orchestrator = orchestrator(cache.clone(), gateway.clone());

        let response = orchestrator.handle(request("fone bluetooth")).await;

        assert_eq!(response.meta.mode, ReplyMode::Timeout);
        assert_eq!(response.recommendations.len(), 3);
        assert!(response
            .recommendations
            .iter()
            .all(|r| r.price_hint == PRICE_VARIES));
        assert_eq!(response.recommendations[0].title, "fone bluetooth mais barato");

        // Let the abandoned call finish in the background.
        tokio::time::sleep(Duration::from_secs(10)).await;

        let key = CacheKey::for_request(&request("fone bluetooth"));
        let stored = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.meta.mode, ReplyMode::Timeout);
        assert_eq!(stored.recommendations, response.recommendations);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_inside_timeout_wins() {
        let gateway = Arc::new(DelayedGateway::answering(Duration::from_millis(800), MODEL_JSON));
        let orchestrator = orchestrator(Arc::new(NoopCache), gateway);

        let response = orchestrator.handle(request("fone bluetooth")).await;
        assert_eq!(response.meta.mode, ReplyMode::Model);
        assert_eq!(response.recommendations[0].title, "Fone QCY H2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_for_same_key_leave_complete_entry() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60), 10));
        let gateway = Arc::new(DelayedGateway::answering(Duration::from_millis(20), MODEL_JSON));
        let orchestrator = Arc::new(orchestrator(cache.clone(), gateway));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move { orchestrator.handle(request("fone bluetooth")).await })
            })
            .collect();

        for task in tasks {
            let response = task.await.unwrap();
            assert_eq!(response.recommendations.len(), 3);
        }

        let key = CacheKey::for_request(&request("fone bluetooth"));
        let stored = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.recommendations.len(), 3);
        assert!(stored
            .recommendations
            .iter()
            .all(|r| !r.title.is_empty() && r.url.contains("tag=tag-1")));
        assert!(!stored.meta.cached);
    }

    #[tokio::test]
    async fn test_tier_controls_recommendation_count() {
        let orchestrator = orchestrator(Arc::new(NoopCache), Arc::new(mock_answering(2)));

        let pro = orchestrator
            .handle(ChatRequest::new("notebook", Tier::Pro, "t"))
            .await;
        let exec = orchestrator
            .handle(ChatRequest::new("notebook", Tier::Exec, "t"))
            .await;

        assert_eq!(pro.recommendations.len(), 4);
        assert_eq!(exec.recommendations.len(), 5);
        assert_eq!(exec.meta.tier, Tier::Exec);
    }
}
