//! Provider adapter contract.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::Result;
use crate::types::{InferenceRequest, ModelConfig, ProviderCompletion, ProviderHealth, StreamChunk};

/// A lazy, finite sequence of chunks ending with a terminal chunk.
///
/// Dropping the stream cancels it; adapters must stop upstream generation
/// when that happens.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk>>;

/// Backend inference provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider id this adapter serves (matches `ModelConfig::provider`).
    fn provider_id(&self) -> &str;

    /// Run a completion against `model`.
    ///
    /// Fails with `ProviderError` or `ProviderTimeout`.
    async fn complete(
        &self,
        model: &ModelConfig,
        request: &InferenceRequest,
    ) -> Result<ProviderCompletion>;

    /// Check whether the provider is reachable.
    async fn health_check(&self) -> ProviderHealth;

    /// Stream a completion. Adapters without native streaming yield the full
    /// completion as one terminal chunk.
    async fn stream(&self, model: &ModelConfig, request: &InferenceRequest) -> Result<ChunkStream> {
        let completion = self.complete(model, request).await?;
        let chunk = StreamChunk {
            request_id: request.request_id.clone(),
            index: 0,
            delta: completion.content,
            is_final: true,
            usage: Some(completion.usage),
            model_id: model.model_id.clone(),
            provider_id: self.provider_id().to_string(),
        };
        Ok(stream::iter(vec![Ok(chunk)]).boxed())
    }

    /// Release held resources. Called once when the gateway closes.
    async fn shutdown(&self) {}
}
