//! Streaming responses and breaker bookkeeping for in-flight attempts.

use futures::stream::{self, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use switchyard_core::{
    traits::{ChunkStream, UsageRecord},
    types::{InferenceResponse, ModelConfig, StreamChunk},
    Error, Result,
};
use switchyard_governance::{track_request, track_tokens};
use switchyard_model_gateway::{Admission, CircuitBreaker, LlmRouter};

use crate::queue::QueueSlot;
use crate::usage::UsageBridge;

/// Resolves one breaker admission exactly once.
///
/// An unresolved half-open trial (caller cancelled, deadline hit) frees the
/// trial slot on drop without a state transition.
pub(crate) struct TrialGuard {
    breaker: Arc<CircuitBreaker>,
    provider_id: String,
    admission: Admission,
    resolved: bool,
}

impl TrialGuard {
    pub(crate) fn new(breaker: Arc<CircuitBreaker>, provider_id: &str, admission: Admission) -> Self {
        Self {
            breaker,
            provider_id: provider_id.to_string(),
            admission,
            resolved: false,
        }
    }

    pub(crate) fn succeed(mut self) {
        self.resolved = true;
        self.breaker
            .record_outcome(&self.provider_id, self.admission, true);
    }

    pub(crate) fn fail(mut self) {
        self.resolved = true;
        self.breaker
            .record_outcome(&self.provider_id, self.admission, false);
    }
}

impl Drop for TrialGuard {
    fn drop(&mut self) {
        if !self.resolved && self.admission.is_trial() {
            tracing::debug!(provider = %self.provider_id, "Releasing unresolved half-open trial");
            self.breaker.release_trial(&self.provider_id);
        }
    }
}

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Terminal chunk delivered.
    Completed,
    /// Served from the cache.
    Cached,
    /// Provider error, or the provider stream ended without a terminal chunk.
    Failed,
    Cancelled,
}

impl StreamOutcome {
    /// Label used for the request outcome metric.
    pub fn code(self) -> &'static str {
        match self {
            Self::Completed => "success",
            Self::Cached => "cached",
            Self::Failed => "provider_error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// What a provider-backed stream settles when it ends.
pub(crate) struct StreamSettlement {
    pub(crate) guard: TrialGuard,
    pub(crate) slot: QueueSlot,
    pub(crate) router: Arc<LlmRouter>,
    pub(crate) usage: Arc<UsageBridge>,
    pub(crate) model: ModelConfig,
    pub(crate) agent_id: String,
    pub(crate) started: Instant,
}

impl StreamSettlement {
    fn finished(self, chunk: &StreamChunk) {
        self.guard.succeed();
        track_request(StreamOutcome::Completed.code(), self.started.elapsed().as_secs_f64());
        self.router
            .record_latency(&self.model.model_id, self.started.elapsed().as_millis() as u64);

        if let Some(usage) = chunk.usage {
            track_tokens(&self.model.model_id, usage.prompt_tokens, usage.completion_tokens);
            self.usage.notify(UsageRecord {
                request_id: chunk.request_id.clone(),
                agent_id: self.agent_id,
                model_id: self.model.model_id.clone(),
                provider_id: chunk.provider_id.clone(),
                usage,
                cost: self
                    .model
                    .estimate_cost(usage.prompt_tokens, usage.completion_tokens),
            });
        }
        drop(self.slot);
    }

    fn failed(self) {
        self.guard.fail();
        track_request(StreamOutcome::Failed.code(), self.started.elapsed().as_secs_f64());
        drop(self.slot);
    }

    fn cancelled(self) {
        // Dropping the guard releases a pending trial without a verdict.
        track_request(StreamOutcome::Cancelled.code(), self.started.elapsed().as_secs_f64());
    }
}

/// Chunks of one streamed completion.
///
/// Dropping the stream drops the provider stream, which stops upstream
/// generation, and frees the queue slot. Cancelling the token ends the
/// stream with a `Cancelled` error.
pub struct GatewayStream {
    inner: ChunkStream,
    cancelled: Pin<Box<dyn Future<Output = ()> + Send>>,
    settlement: Option<StreamSettlement>,
    outcome: Option<StreamOutcome>,
    done: bool,
}

impl GatewayStream {
    pub(crate) fn from_provider(
        inner: ChunkStream,
        settlement: StreamSettlement,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            inner,
            cancelled: cancellation(cancel),
            settlement: Some(settlement),
            outcome: None,
            done: false,
        }
    }

    /// A single terminal chunk replaying a cached response.
    pub(crate) fn from_cached(response: InferenceResponse, cancel: &CancellationToken) -> Self {
        let chunk = StreamChunk {
            request_id: response.request_id,
            index: 0,
            delta: response.content,
            is_final: true,
            usage: Some(response.usage),
            model_id: response.model_id,
            provider_id: response.provider_id,
        };
        Self {
            inner: stream::iter(vec![Ok(chunk)]).boxed(),
            cancelled: cancellation(cancel),
            settlement: None,
            outcome: None,
            done: false,
        }
    }

    /// How the stream ended, once it has.
    pub fn outcome(&self) -> Option<StreamOutcome> {
        self.outcome
    }

    fn finish(&mut self, outcome: StreamOutcome) {
        self.done = true;
        self.outcome = Some(outcome);
        self.inner = stream::empty().boxed();
    }
}

fn cancellation(cancel: &CancellationToken) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let token = cancel.clone();
    Box::pin(async move { token.cancelled().await })
}

impl Stream for GatewayStream {
    type Item = Result<StreamChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        if this.cancelled.as_mut().poll(cx).is_ready() {
            if let Some(settlement) = this.settlement.take() {
                settlement.cancelled();
            }
            this.finish(StreamOutcome::Cancelled);
            return Poll::Ready(Some(Err(Error::Cancelled)));
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                if chunk.is_final {
                    let outcome = match this.settlement.take() {
                        Some(settlement) => {
                            settlement.finished(&chunk);
                            StreamOutcome::Completed
                        }
                        None => StreamOutcome::Cached,
                    };
                    this.finish(outcome);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(error = %e, "Provider stream failed");
                if let Some(settlement) = this.settlement.take() {
                    settlement.failed();
                }
                this.finish(StreamOutcome::Failed);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                if let Some(settlement) = this.settlement.take() {
                    tracing::warn!(model = %settlement.model.model_id, "Provider stream ended without a final chunk");
                    settlement.failed();
                }
                this.finish(StreamOutcome::Failed);
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use switchyard_core::types::CircuitState;

    fn half_open_breaker() -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::ZERO));
        breaker.record_failure("p");
        breaker
    }

    #[tokio::test]
    async fn test_dropped_trial_is_released() {
        let breaker = half_open_breaker();
        let admission = breaker.allow_request("p");
        assert_eq!(admission, Admission::Trial);

        drop(TrialGuard::new(breaker.clone(), "p", admission));
        assert_eq!(breaker.allow_request("p"), Admission::Trial);
    }

    #[tokio::test]
    async fn test_resolved_trial_transitions() {
        let breaker = half_open_breaker();
        let admission = breaker.allow_request("p");
        TrialGuard::new(breaker.clone(), "p", admission).succeed();
        assert_eq!(breaker.state("p"), CircuitState::Closed);
    }

    async fn settled_stream(
        chunks: Vec<Result<StreamChunk>>,
        breaker: Arc<CircuitBreaker>,
        queue: &crate::queue::RequestQueue,
    ) -> GatewayStream {
        let registry = Arc::new(switchyard_model_gateway::ModelRegistry::new());
        let settlement = StreamSettlement {
            guard: TrialGuard::new(breaker.clone(), "p", breaker.allow_request("p")),
            slot: queue.enqueue(&CancellationToken::new()).await.unwrap(),
            router: Arc::new(LlmRouter::new(registry, breaker)),
            usage: Arc::new(UsageBridge::disabled()),
            model: ModelConfig::new("m", "p"),
            agent_id: "agent".into(),
            started: Instant::now(),
        };
        GatewayStream::from_provider(
            stream::iter(chunks).boxed(),
            settlement,
            &CancellationToken::new(),
        )
    }

    fn chunk(index: u32, is_final: bool) -> StreamChunk {
        StreamChunk {
            request_id: "r".into(),
            index,
            delta: format!("{} ", index),
            is_final,
            usage: is_final.then(|| switchyard_core::types::TokenUsage::new(1, 1)),
            model_id: "m".into(),
            provider_id: "p".into(),
        }
    }

    #[tokio::test]
    async fn test_mid_stream_error_settles_as_failure() {
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(30)));
        let queue = crate::queue::RequestQueue::new(1);
        let mut stream = settled_stream(
            vec![Ok(chunk(0, false)), Err(Error::provider("p", "connection reset"))],
            breaker.clone(),
            &queue,
        )
        .await;

        assert!(stream.next().await.unwrap().is_ok());
        assert_eq!(stream.outcome(), None);
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());

        assert_eq!(stream.outcome(), Some(StreamOutcome::Failed));
        assert_eq!(breaker.consecutive_failures("p"), 1);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_stream_without_final_chunk_settles_as_failure() {
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(30)));
        let queue = crate::queue::RequestQueue::new(1);
        let mut stream = settled_stream(vec![Ok(chunk(0, false))], breaker.clone(), &queue).await;

        while stream.next().await.is_some() {}
        assert_eq!(stream.outcome(), Some(StreamOutcome::Failed));
        assert_eq!(breaker.consecutive_failures("p"), 1);
    }

    #[tokio::test]
    async fn test_terminal_chunk_settles_as_completed() {
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(30)));
        breaker.record_failure("p");
        let queue = crate::queue::RequestQueue::new(1);
        let mut stream = settled_stream(
            vec![Ok(chunk(0, false)), Ok(chunk(1, true))],
            breaker.clone(),
            &queue,
        )
        .await;

        while stream.next().await.is_some() {}
        assert_eq!(stream.outcome(), Some(StreamOutcome::Completed));
        assert_eq!(breaker.consecutive_failures("p"), 0);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_from_closed_circuit_cannot_resolve_trial() {
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(30)));
        let early = TrialGuard::new(breaker.clone(), "p", breaker.allow_request("p"));
        breaker.record_failure("p");

        tokio::time::advance(Duration::from_secs(30)).await;
        let trial = TrialGuard::new(breaker.clone(), "p", breaker.allow_request("p"));

        early.fail();
        assert_eq!(breaker.state("p"), CircuitState::HalfOpen);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(breaker.allow_request("p"), Admission::Denied);

        trial.succeed();
        assert_eq!(breaker.state("p"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cached_stream_yields_single_final_chunk() {
        let response = InferenceResponse {
            request_id: "r".into(),
            content: "cached".into(),
            usage: switchyard_core::types::TokenUsage::new(1, 1),
            status: switchyard_core::types::ResponseStatus::Success,
            provider_id: "p".into(),
            model_id: "m".into(),
            latency_ms: 0,
            cached: true,
            cost: 0.0,
        };
        let mut stream = GatewayStream::from_cached(response, &CancellationToken::new());
        assert!(stream.next().await.unwrap().unwrap().is_final);
        assert!(stream.next().await.is_none());
        assert_eq!(stream.outcome(), Some(StreamOutcome::Cached));
    }
}
