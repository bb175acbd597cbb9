//! Candidate selection for inference requests.

use dashmap::DashMap;
use std::cmp::Ordering;
use std::sync::Arc;

use switchyard_core::{
    types::{InferenceRequest, ModelConfig},
    Error, Result,
};

use crate::circuit_breaker::CircuitBreaker;
use crate::registry::{ModelFilter, ModelRegistry};

/// Weight of the newest sample in the latency moving average.
const LATENCY_EWMA_ALPHA: f64 = 0.3;

/// A model the gateway may try, in preference order.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub model: ModelConfig,
    /// Estimated USD cost of serving the request with this model.
    pub estimated_cost: f64,
    /// Moving average of observed latency, if any call completed yet.
    pub observed_latency_ms: Option<f64>,
    registration_rank: usize,
}

impl Candidate {
    pub fn provider_id(&self) -> &str {
        &self.model.provider
    }
}

/// Selects and orders candidate models for a request.
pub struct LlmRouter {
    registry: Arc<ModelRegistry>,
    breaker: Arc<CircuitBreaker>,
    latencies: DashMap<String, f64>,
    default_output_tokens: u32,
}

impl LlmRouter {
    /// Create a router over a registry and breaker set.
    pub fn new(registry: Arc<ModelRegistry>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            registry,
            breaker,
            latencies: DashMap::new(),
            default_output_tokens: 256,
        }
    }

    /// Completion size assumed when the request does not bound it.
    pub fn with_default_output_tokens(mut self, tokens: u32) -> Self {
        self.default_output_tokens = tokens;
        self
    }

    /// Ordered candidates for `request`.
    ///
    /// Fails `NoEligibleModel` when no active model satisfies the capability,
    /// context and cost constraints, and `AllProvidersUnavailable` when every
    /// eligible model's provider has an open circuit.
    pub fn select(&self, request: &InferenceRequest) -> Result<Vec<Candidate>> {
        let prompt_tokens = request.prompt.estimate_tokens();
        let required = &request.requirements.capabilities;
        let requested_output = request
            .constraints
            .max_output_tokens
            .unwrap_or(self.default_output_tokens);

        let eligible: Vec<Candidate> = self
            .registry
            .list(&ModelFilter::active())
            .into_iter()
            .enumerate()
            .filter(|(_, model)| model.capabilities.satisfies(required))
            .filter(|(_, model)| prompt_tokens <= u64::from(model.context_window))
            .map(|(rank, model)| {
                let output = requested_output.min(model.max_output_tokens);
                Candidate {
                    estimated_cost: model.estimate_cost(prompt_tokens, u64::from(output)),
                    observed_latency_ms: self.observed_latency(&model.model_id),
                    model,
                    registration_rank: rank,
                }
            })
            .filter(|c| {
                request
                    .constraints
                    .max_cost
                    .map_or(true, |max| c.estimated_cost <= max)
            })
            .collect();

        if eligible.is_empty() {
            return Err(Error::NoEligibleModel(format!(
                "no active model supports {:?} within a {}-token prompt{}",
                required,
                prompt_tokens,
                request
                    .constraints
                    .max_cost
                    .map(|c| format!(" and max cost ${}", c))
                    .unwrap_or_default()
            )));
        }

        let mut available: Vec<Candidate> = eligible
            .into_iter()
            .filter(|c| !self.breaker.is_open(c.provider_id()))
            .collect();

        if available.is_empty() {
            tracing::warn!(request_id = %request.request_id, "Every eligible provider has an open circuit");
            return Err(Error::AllProvidersUnavailable);
        }

        available.sort_by(compare_candidates);

        tracing::debug!(
            request_id = %request.request_id,
            candidates = ?available.iter().map(|c| c.model.model_id.as_str()).collect::<Vec<_>>(),
            "Selected candidates"
        );
        Ok(available)
    }

    /// Feed an observed call latency into the model's moving average.
    pub fn record_latency(&self, model_id: &str, latency_ms: u64) {
        let sample = latency_ms as f64;
        self.latencies
            .entry(model_id.to_string())
            .and_modify(|avg| *avg = LATENCY_EWMA_ALPHA * sample + (1.0 - LATENCY_EWMA_ALPHA) * *avg)
            .or_insert(sample);
    }

    pub fn observed_latency(&self, model_id: &str) -> Option<f64> {
        self.latencies.get(model_id).map(|v| *v)
    }
}

/// Cost, then observed latency (unobserved last), then registration order.
fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    let latency = |c: &Candidate| c.observed_latency_ms.unwrap_or(f64::INFINITY);
    a.estimated_cost
        .total_cmp(&b.estimated_cost)
        .then_with(|| latency(a).total_cmp(&latency(b)))
        .then_with(|| a.registration_rank.cmp(&b.registration_rank))
}
