//! Provider adapter implementations and the provider map.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use switchyard_core::{
    config::{ProviderDefinition, ProviderKind},
    traits::{ChunkStream, ProviderAdapter},
    types::{
        HealthStatus, InferenceRequest, ModelConfig, ProviderCompletion, ProviderHealth,
        ResponseStatus, StreamChunk, TokenUsage,
    },
    Error, Result,
};

use crate::rig_client::{RigBackend, RigProvider};

/// Adapters keyed by provider id.
pub struct ProviderMap {
    providers: DashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
        }
    }

    /// Register an adapter under its own provider id, replacing any previous one.
    pub fn register(&self, adapter: Arc<dyn ProviderAdapter>) {
        let id = adapter.provider_id().to_string();
        tracing::info!(provider = %id, "Registered provider adapter");
        self.providers.insert(id, adapter);
    }

    /// Get an adapter.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.get(provider_id).map(|entry| entry.value().clone())
    }

    /// Registered provider ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Remove every adapter and shut each one down.
    pub async fn shutdown_all(&self) {
        let ids = self.ids();
        for id in ids {
            if let Some((_, adapter)) = self.providers.remove(&id) {
                adapter.shutdown().await;
                tracing::debug!(provider = %id, "Provider adapter released");
            }
        }
    }
}

impl Default for ProviderMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Build an adapter from its configuration.
pub fn build_provider(definition: &ProviderDefinition) -> Result<Arc<dyn ProviderAdapter>> {
    if definition.id.trim().is_empty() {
        return Err(Error::config("provider id must not be empty"));
    }
    let adapter: Arc<dyn ProviderAdapter> = match definition.kind {
        ProviderKind::Openai => Arc::new(RigProvider::from_definition(definition, RigBackend::OpenAI)),
        ProviderKind::Anthropic => {
            Arc::new(RigProvider::from_definition(definition, RigBackend::Anthropic))
        }
        ProviderKind::Mock => {
            let mut mock = MockProvider::new(&definition.id);
            if let Some(response) = &definition.response {
                mock = mock.with_response(response.clone());
            }
            if let Some(ms) = definition.latency_ms {
                mock = mock.with_latency(Duration::from_millis(ms));
            }
            Arc::new(mock)
        }
    };
    Ok(adapter)
}

// =============================================================================
// Mock Provider for Testing
// =============================================================================

/// What the mock does on its next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Succeed,
    Fail,
    /// Never answers; only a deadline or cancellation ends the call.
    Hang,
}

/// Deterministic provider without network access.
pub struct MockProvider {
    id: String,
    response: String,
    latency: Option<Duration>,
    chunk_delay: Option<Duration>,
    script: Mutex<VecDeque<MockOutcome>>,
    fallback: MockOutcome,
    calls: AtomicUsize,
    chunks_emitted: Arc<AtomicUsize>,
    shut_down: AtomicBool,
}

impl MockProvider {
    /// Create a mock that always succeeds.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            response: "mock response".to_string(),
            latency: None,
            chunk_delay: None,
            script: Mutex::new(VecDeque::new()),
            fallback: MockOutcome::Succeed,
            calls: AtomicUsize::new(0),
            chunks_emitted: Arc::new(AtomicUsize::new(0)),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Create a mock that always fails.
    pub fn failing(id: impl Into<String>) -> Self {
        Self {
            fallback: MockOutcome::Fail,
            ..Self::new(id)
        }
    }

    /// Reply prefix.
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    /// Delay before every answer.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delay between streamed chunks.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Outcomes for the next calls; afterwards the default outcome applies.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(outcomes);
        self
    }

    /// Outcome once the script is exhausted.
    pub fn with_default_outcome(mut self, outcome: MockOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    /// Number of `complete` and `stream` calls received.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of stream chunks produced so far.
    pub fn chunks_emitted(&self) -> usize {
        self.chunks_emitted.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    async fn begin_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let outcome = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.fallback);
        match outcome {
            MockOutcome::Succeed => Ok(()),
            MockOutcome::Fail => Err(Error::provider(&self.id, "mock failure")),
            MockOutcome::Hang => std::future::pending().await,
        }
    }

    fn reply(&self, request: &InferenceRequest) -> String {
        let messages = request.prompt.to_messages();
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        format!("{}: {}", self.response, last)
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn complete(
        &self,
        model: &ModelConfig,
        request: &InferenceRequest,
    ) -> Result<ProviderCompletion> {
        self.begin_call().await?;

        let content = self.reply(request);
        let completion_tokens = (content.len() as u64).div_ceil(4);
        let status = if completion_tokens > u64::from(model.max_output_tokens) {
            ResponseStatus::Truncated
        } else {
            ResponseStatus::Success
        };
        Ok(ProviderCompletion {
            usage: TokenUsage::new(request.prompt.estimate_tokens(), completion_tokens),
            content,
            status,
        })
    }

    async fn health_check(&self) -> ProviderHealth {
        let status = if self.fallback == MockOutcome::Succeed {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        ProviderHealth::healthy(&self.id).with_status(status)
    }

    async fn stream(&self, model: &ModelConfig, request: &InferenceRequest) -> Result<ChunkStream> {
        self.begin_call().await?;

        let words: Vec<String> = self
            .reply(request)
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        let usage = TokenUsage::new(
            request.prompt.estimate_tokens(),
            (words.iter().map(String::len).sum::<usize>() as u64).div_ceil(4),
        );
        let request_id = request.request_id.clone();
        let model_id = model.model_id.clone();
        let provider_id = self.id.clone();
        let delay = self.chunk_delay;
        let emitted = self.chunks_emitted.clone();
        let total = words.len();

        // Chunks are produced only when polled, so a dropped stream stops generation.
        let chunks = stream::unfold(0usize, move |index| {
            let word = words.get(index).cloned();
            let request_id = request_id.clone();
            let model_id = model_id.clone();
            let provider_id = provider_id.clone();
            let emitted = emitted.clone();
            async move {
                let word = word?;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                emitted.fetch_add(1, Ordering::SeqCst);
                let is_final = index + 1 == total;
                let chunk = StreamChunk {
                    request_id,
                    index: index as u32,
                    delta: word,
                    is_final,
                    usage: is_final.then_some(usage),
                    model_id,
                    provider_id,
                };
                Some((Ok(chunk), index + 1))
            }
        });
        Ok(chunks.boxed())
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}
