//! Request lifecycle orchestration.
//!
//! Flow for a request:
//! 1. Validate
//! 2. Cache lookup (hits bypass everything below)
//! 3. Coalesce with an identical in-flight request, if any
//! 4. Queue admission
//! 5. Rate limit check
//! 6. Candidate selection
//! 7. Walk candidates through their circuit breakers and call the provider,
//!    retrying on provider failures within the retry budget
//! 8. Cache store and usage report on success

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use switchyard_core::{
    config::{AppConfig, GatewayConfig},
    traits::{EmbeddingGenerator, ProviderAdapter, UsageRecord},
    types::{HealthStatus, InferenceRequest, InferenceResponse, ProviderHealth},
    Error, Result,
};
use switchyard_governance::{track_request, track_tokens, RateLimiter};
use switchyard_model_gateway::{Candidate, CircuitBreaker, LlmRouter, ModelRegistry, ProviderMap};

use crate::inflight::{Flight, InflightRequests};
use crate::queue::{QueueSlot, RequestQueue};
use crate::semantic_cache::SemanticCache;
use crate::stream::{GatewayStream, StreamOutcome, StreamSettlement, TrialGuard};
use crate::usage::UsageBridge;

/// Tunables of the request pipeline.
#[derive(Debug, Clone)]
struct PipelineSettings {
    default_max_latency: Duration,
    provider_timeout: Duration,
    max_retries: usize,
    enable_coalescing: bool,
    default_output_tokens: u32,
}

impl From<&GatewayConfig> for PipelineSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            default_max_latency: Duration::from_millis(config.default_max_latency_ms),
            provider_timeout: config.provider_timeout(),
            max_retries: config.max_retries,
            enable_coalescing: config.enable_coalescing,
            default_output_tokens: config.default_output_tokens,
        }
    }
}

/// Builder for [`ModelGateway`].
pub struct ModelGatewayBuilder {
    registry: Arc<ModelRegistry>,
    providers: ProviderMap,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    cache: Option<SemanticCache>,
    queue: RequestQueue,
    usage: UsageBridge,
    settings: PipelineSettings,
}

impl ModelGatewayBuilder {
    /// Builder with default settings over `registry`.
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        let defaults = AppConfig::default();
        Self {
            registry,
            providers: ProviderMap::new(),
            breaker: CircuitBreaker::from_config(&defaults.circuit_breaker),
            limiter: RateLimiter::from_config(&defaults.rate_limit),
            cache: Some(SemanticCache::new()),
            queue: RequestQueue::from_config(&defaults.queue),
            usage: UsageBridge::disabled(),
            settings: PipelineSettings::from(&defaults.gateway),
        }
    }

    /// Builder configured from `config`. Providers are added separately.
    pub fn from_config(
        config: &AppConfig,
        registry: Arc<ModelRegistry>,
        embedder: Option<Arc<dyn EmbeddingGenerator>>,
    ) -> Result<Self> {
        let cache = config
            .cache
            .enabled
            .then(|| SemanticCache::from_config(&config.cache, embedder));
        Ok(Self {
            registry,
            providers: ProviderMap::new(),
            breaker: CircuitBreaker::from_config(&config.circuit_breaker),
            limiter: RateLimiter::from_config(&config.rate_limit),
            cache,
            queue: RequestQueue::from_config(&config.queue),
            usage: UsageBridge::from_config(&config.usage)?,
            settings: PipelineSettings::from(&config.gateway),
        })
    }

    pub fn with_provider(self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.providers.register(adapter);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_cache(mut self, cache: SemanticCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn with_queue(mut self, queue: RequestQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_usage(mut self, usage: UsageBridge) -> Self {
        self.usage = usage;
        self
    }

    /// Apply deadline, retry, coalescing and sizing settings.
    pub fn with_gateway_config(mut self, config: &GatewayConfig) -> Self {
        self.settings = PipelineSettings::from(config);
        self
    }

    pub fn build(self) -> ModelGateway {
        let breaker = Arc::new(self.breaker);
        let router = LlmRouter::new(self.registry.clone(), breaker.clone())
            .with_default_output_tokens(self.settings.default_output_tokens);

        ModelGateway {
            registry: self.registry,
            providers: self.providers,
            breaker,
            router: Arc::new(router),
            limiter: self.limiter,
            cache: self.cache,
            queue: self.queue,
            inflight: InflightRequests::new(),
            usage: Arc::new(self.usage),
            settings: self.settings,
            closed: AtomicBool::new(false),
        }
    }
}

/// Entry point for inference requests.
pub struct ModelGateway {
    registry: Arc<ModelRegistry>,
    providers: ProviderMap,
    breaker: Arc<CircuitBreaker>,
    router: Arc<LlmRouter>,
    limiter: RateLimiter,
    cache: Option<SemanticCache>,
    queue: RequestQueue,
    inflight: InflightRequests,
    usage: Arc<UsageBridge>,
    settings: PipelineSettings,
    closed: AtomicBool,
}

impl ModelGateway {
    pub fn builder(registry: Arc<ModelRegistry>) -> ModelGatewayBuilder {
        ModelGatewayBuilder::new(registry)
    }

    /// Serve `request`.
    pub async fn complete(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        self.complete_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Serve `request`, stopping early when `cancel` fires.
    pub async fn complete_with_cancellation(
        &self,
        request: InferenceRequest,
        cancel: CancellationToken,
    ) -> Result<InferenceResponse> {
        let started = Instant::now();
        let request_id = request.request_id.clone();
        let result = self.run_complete(request, &cancel, started).await;

        let outcome = match &result {
            Ok(response) if response.cached => "cached",
            Ok(_) => "success",
            Err(e) => e.code(),
        };
        track_request(outcome, started.elapsed().as_secs_f64());

        match &result {
            Ok(response) => tracing::info!(
                request_id = %request_id,
                model = %response.model_id,
                cached = response.cached,
                latency_ms = response.latency_ms,
                "Request completed"
            ),
            Err(e) => tracing::info!(request_id = %request_id, error = %e, "Request failed"),
        }
        result
    }

    async fn run_complete(
        &self,
        request: InferenceRequest,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<InferenceResponse> {
        self.ensure_open()?;
        request.validate()?;
        let deadline = started + self.deadline_for(&request);

        let pipeline = async {
            let lookup = match &self.cache {
                Some(cache) => cache.lookup(&request).await,
                None => Default::default(),
            };
            if let Some((response, _)) = lookup.hit {
                return Ok(response);
            }

            let coalesce = self.settings.enable_coalescing
                && self.cache.as_ref().is_some_and(|c| c.is_cacheable(&request));
            if !coalesce {
                return self
                    .run_admitted(&request, lookup.embedding, cancel, deadline, started)
                    .await;
            }

            match self.inflight.join(&request) {
                Flight::Leader(leader) => {
                    let response = self
                        .run_admitted(&request, lookup.embedding, cancel, deadline, started)
                        .await?;
                    leader.complete(&response);
                    Ok(response)
                }
                Flight::Follower(follower) => match follower.wait().await {
                    Some(mut shared) => {
                        shared.request_id = request.request_id.clone();
                        shared.cached = true;
                        shared.latency_ms = started.elapsed().as_millis() as u64;
                        shared.cost = 0.0;
                        Ok(shared)
                    }
                    None => {
                        tracing::debug!(request_id = %request.request_id, "Coalesced leader failed, running independently");
                        self.run_admitted(&request, lookup.embedding, cancel, deadline, started)
                            .await
                    }
                },
            }
        };

        let bounded = async {
            tokio::time::timeout_at(deadline, pipeline)
                .await
                .unwrap_or_else(|_| Err(Error::TimeoutExceeded(elapsed_ms(started))))
        };

        tokio::select! {
            biased;
            result = bounded => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Queue, limiter, routing and provider calls for a cache miss.
    async fn run_admitted(
        &self,
        request: &InferenceRequest,
        embedding: Option<Vec<f32>>,
        cancel: &CancellationToken,
        deadline: Instant,
        started: Instant,
    ) -> Result<InferenceResponse> {
        let _slot = self.admit(request, cancel, deadline).await?;
        let candidates = self.router.select(request)?;
        let retry_budget = self.retry_budget(&candidates);
        let mut failures = 0usize;
        let mut last_error: Option<Error> = None;

        for candidate in &candidates {
            let Some((adapter, guard)) = self.gate(candidate) else {
                continue;
            };

            let attempt = tokio::time::timeout(
                self.settings.provider_timeout,
                adapter.complete(&candidate.model, request),
            )
            .await
            .unwrap_or_else(|_| Err(self.provider_timeout_error(candidate)));

            match attempt {
                Ok(completion) => {
                    guard.succeed();
                    let latency_ms = elapsed_ms(started);
                    self.router.record_latency(&candidate.model.model_id, latency_ms);

                    let usage = completion.usage;
                    let response = InferenceResponse {
                        request_id: request.request_id.clone(),
                        content: completion.content,
                        usage,
                        status: completion.status,
                        provider_id: candidate.provider_id().to_string(),
                        model_id: candidate.model.model_id.clone(),
                        latency_ms,
                        cached: false,
                        cost: candidate
                            .model
                            .estimate_cost(usage.prompt_tokens, usage.completion_tokens),
                    };

                    if let Some(cache) = &self.cache {
                        cache.put_with_embedding(request, &response, embedding).await;
                    }
                    self.report_usage(request, &response);
                    return Ok(response);
                }
                Err(e) => {
                    guard.fail();
                    tracing::warn!(
                        request_id = %request.request_id,
                        provider = %candidate.provider_id(),
                        model = %candidate.model.model_id,
                        error = %e,
                        "Provider attempt failed"
                    );
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = Some(e);
                    failures += 1;
                    if failures > retry_budget {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(Error::AllProvidersUnavailable))
    }

    /// Stream `request`.
    pub async fn stream(&self, request: InferenceRequest) -> Result<GatewayStream> {
        self.stream_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Stream `request`. The deadline bounds the time until the provider
    /// stream is open; afterwards `cancel` or dropping the stream ends it.
    pub async fn stream_with_cancellation(
        &self,
        request: InferenceRequest,
        cancel: CancellationToken,
    ) -> Result<GatewayStream> {
        let started = Instant::now();
        self.ensure_open()?;
        request.validate()?;
        let deadline = started + self.deadline_for(&request);

        let open = async {
            if let Some(cache) = &self.cache {
                if let Some((response, _)) = cache.lookup(&request).await.hit {
                    track_request(StreamOutcome::Cached.code(), started.elapsed().as_secs_f64());
                    return Ok(GatewayStream::from_cached(response, &cancel));
                }
            }
            self.open_stream(&request, &cancel, deadline, started).await
        };

        let bounded = async {
            tokio::time::timeout_at(deadline, open)
                .await
                .unwrap_or_else(|_| Err(Error::TimeoutExceeded(elapsed_ms(started))))
        };

        let result = tokio::select! {
            biased;
            result = bounded => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };
        if let Err(e) = &result {
            track_request(e.code(), started.elapsed().as_secs_f64());
        }
        result
    }

    async fn open_stream(
        &self,
        request: &InferenceRequest,
        cancel: &CancellationToken,
        deadline: Instant,
        started: Instant,
    ) -> Result<GatewayStream> {
        let mut slot = Some(self.admit(request, cancel, deadline).await?);
        let candidates = self.router.select(request)?;
        let retry_budget = self.retry_budget(&candidates);
        let mut failures = 0usize;
        let mut last_error: Option<Error> = None;

        for candidate in &candidates {
            let Some((adapter, guard)) = self.gate(candidate) else {
                continue;
            };

            let opened = tokio::time::timeout(
                self.settings.provider_timeout,
                adapter.stream(&candidate.model, request),
            )
            .await
            .unwrap_or_else(|_| Err(self.provider_timeout_error(candidate)));

            match opened {
                Ok(chunks) => {
                    let Some(slot) = slot.take() else {
                        return Err(Error::internal("queue slot already consumed"));
                    };
                    let settlement = StreamSettlement {
                        guard,
                        slot,
                        router: self.router.clone(),
                        usage: self.usage.clone(),
                        model: candidate.model.clone(),
                        agent_id: request.agent_id.clone(),
                        started,
                    };
                    return Ok(GatewayStream::from_provider(chunks, settlement, cancel));
                }
                Err(e) => {
                    guard.fail();
                    tracing::warn!(
                        request_id = %request.request_id,
                        provider = %candidate.provider_id(),
                        error = %e,
                        "Provider stream failed to open"
                    );
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = Some(e);
                    failures += 1;
                    if failures > retry_budget {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(Error::AllProvidersUnavailable))
    }

    /// Stop admitting requests, wait for admitted ones and pending usage
    /// reports, then release every provider. Later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Closing model gateway");
        self.queue.close().await;
        self.usage.drain().await;
        self.providers.shutdown_all().await;
        tracing::info!("Model gateway closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Health of every provider, combining its own health check with breaker state.
    pub async fn health(&self) -> Vec<ProviderHealth> {
        let mut report = Vec::new();
        for provider_id in self.providers.ids() {
            let Some(adapter) = self.providers.get(&provider_id) else {
                continue;
            };
            let checked = adapter.health_check().await;
            let breaker = self.breaker.health(&provider_id);
            report.push(ProviderHealth {
                status: worse(checked.status, breaker.status),
                circuit_state: breaker.circuit_state,
                ..checked
            });
        }
        report
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> Option<&SemanticCache> {
        self.cache.as_ref()
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn router(&self) -> &LlmRouter {
        &self.router
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Backpressure("gateway is closed".into()));
        }
        Ok(())
    }

    fn deadline_for(&self, request: &InferenceRequest) -> Duration {
        request
            .constraints
            .max_latency_ms
            .map(Duration::from_millis)
            .unwrap_or(self.settings.default_max_latency)
    }

    /// Queue slot plus rate limit charge.
    async fn admit(
        &self,
        request: &InferenceRequest,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<QueueSlot> {
        let slot = tokio::time::timeout_at(deadline, self.queue.enqueue(cancel))
            .await
            .unwrap_or_else(|_| {
                Err(Error::Backpressure("timed out waiting for a queue slot".into()))
            })?;

        let tokens = request.estimate_total_tokens(self.settings.default_output_tokens);
        if !self.limiter.check_and_consume(&request.agent_id, tokens) {
            return Err(Error::RateLimitExceeded {
                agent_id: request.agent_id.clone(),
            });
        }
        Ok(slot)
    }

    /// Alternates tried after the first failure.
    fn retry_budget(&self, candidates: &[Candidate]) -> usize {
        self.settings
            .max_retries
            .min(candidates.len().saturating_sub(1))
    }

    /// Breaker admission and adapter for a candidate, if it may be tried.
    fn gate(&self, candidate: &Candidate) -> Option<(Arc<dyn ProviderAdapter>, TrialGuard)> {
        let provider_id = candidate.provider_id();
        let admission = self.breaker.allow_request(provider_id);
        if !admission.is_allowed() {
            tracing::debug!(provider = %provider_id, model = %candidate.model.model_id, "Skipping candidate, circuit open");
            return None;
        }
        let guard = TrialGuard::new(self.breaker.clone(), provider_id, admission);

        match self.providers.get(provider_id) {
            Some(adapter) => Some((adapter, guard)),
            None => {
                tracing::warn!(provider = %provider_id, "No adapter registered for provider");
                None
            }
        }
    }

    fn provider_timeout_error(&self, candidate: &Candidate) -> Error {
        Error::ProviderTimeout {
            provider_id: candidate.provider_id().to_string(),
            timeout_ms: self.settings.provider_timeout.as_millis() as u64,
        }
    }

    fn report_usage(&self, request: &InferenceRequest, response: &InferenceResponse) {
        track_tokens(
            &response.model_id,
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
        );
        self.usage.notify(UsageRecord {
            request_id: response.request_id.clone(),
            agent_id: request.agent_id.clone(),
            model_id: response.model_id.clone(),
            provider_id: response.provider_id.clone(),
            usage: response.usage,
            cost: response.cost,
        });
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn worse(a: HealthStatus, b: HealthStatus) -> HealthStatus {
    let rank = |s: HealthStatus| match s {
        HealthStatus::Healthy => 0,
        HealthStatus::Degraded => 1,
        HealthStatus::Unhealthy => 2,
    };
    if rank(a) >= rank(b) {
        a
    } else {
        b
    }
}
