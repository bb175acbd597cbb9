//! Rig-backed provider adapter and embedding generator.

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};

use switchyard_core::{
    config::ProviderDefinition,
    traits::{EmbeddingGenerator, ProviderAdapter},
    types::{
        ChatMessage, HealthStatus, InferenceRequest, ModelConfig, ProviderCompletion,
        ProviderHealth, ResponseStatus, TokenUsage,
    },
    Error, Result,
};

// Import required Rig traits
use rig::client::{CompletionClient, EmbeddingsClient, ProviderClient};
use rig::completion::Prompt;

/// Backend served through Rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigBackend {
    OpenAI,
    Anthropic,
}

impl RigBackend {
    /// Environment variable Rig reads the API key from.
    pub fn api_key_var(self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

/// Provider adapter that calls OpenAI or Anthropic through Rig.
///
/// A configured key belongs to this provider only; without one the key is
/// read from the backend's environment variable.
pub struct RigProvider {
    id: String,
    backend: RigBackend,
    api_key: Option<Secret<String>>,
}

impl RigProvider {
    pub fn new(id: impl Into<String>, backend: RigBackend) -> Self {
        Self {
            id: id.into(),
            backend,
            api_key: None,
        }
    }

    pub fn from_definition(definition: &ProviderDefinition, backend: RigBackend) -> Self {
        let provider = Self::new(&definition.id, backend);
        match &definition.api_key {
            Some(key) => provider.with_api_key(key.clone()),
            None => provider,
        }
    }

    pub fn with_api_key(mut self, key: Secret<String>) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Whether a key was configured for this provider.
    pub fn has_configured_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn ensure_api_key(&self) -> Result<()> {
        // Rig's from_env panics on a missing key.
        if self.api_key.is_none() && std::env::var(self.backend.api_key_var()).is_err() {
            return Err(Error::provider(
                &self.id,
                format!("no api_key configured and {} not set", self.backend.api_key_var()),
            ));
        }
        Ok(())
    }

    fn client_error(&self, e: impl std::fmt::Display) -> Error {
        Error::provider(&self.id, format!("Failed to build client: {}", e))
    }

    fn openai_client(&self) -> Result<rig::providers::openai::Client> {
        use rig::providers::openai;

        match &self.api_key {
            Some(key) => openai::Client::new(key.expose_secret()).map_err(|e| self.client_error(e)),
            None => Ok(openai::Client::from_env()),
        }
    }

    fn anthropic_client(&self) -> Result<rig::providers::anthropic::Client> {
        use rig::providers::anthropic;

        match &self.api_key {
            Some(key) => {
                anthropic::Client::new(key.expose_secret()).map_err(|e| self.client_error(e))
            }
            None => Ok(anthropic::Client::from_env()),
        }
    }

    async fn call_openai(&self, model: &ModelConfig, request: &InferenceRequest) -> Result<String> {
        let client = self.openai_client()?;
        let (preamble, prompt) = split_prompt(&request.prompt.to_messages());

        let mut agent_builder = client.agent(&model.model_id);
        if let Some(system) = preamble {
            agent_builder = agent_builder.preamble(&system);
        }
        if let Some(temperature) = request.constraints.temperature {
            agent_builder = agent_builder.temperature(f64::from(temperature));
        }
        agent_builder = agent_builder.max_tokens(u64::from(output_limit(model, request)));
        let agent = agent_builder.build();

        agent
            .prompt(prompt.as_str())
            .await
            .map_err(|e| Error::provider(&self.id, format!("OpenAI error: {}", e)))
    }

    async fn call_anthropic(
        &self,
        model: &ModelConfig,
        request: &InferenceRequest,
    ) -> Result<String> {
        let client = self.anthropic_client()?;
        let (preamble, prompt) = split_prompt(&request.prompt.to_messages());

        let mut agent_builder = client.agent(&model.model_id);
        if let Some(system) = preamble {
            agent_builder = agent_builder.preamble(&system);
        }
        if let Some(temperature) = request.constraints.temperature {
            agent_builder = agent_builder.temperature(f64::from(temperature));
        }
        agent_builder = agent_builder.max_tokens(u64::from(output_limit(model, request)));
        let agent = agent_builder.build();

        agent
            .prompt(prompt.as_str())
            .await
            .map_err(|e| Error::provider(&self.id, format!("Anthropic error: {}", e)))
    }
}

#[async_trait]
impl ProviderAdapter for RigProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn complete(
        &self,
        model: &ModelConfig,
        request: &InferenceRequest,
    ) -> Result<ProviderCompletion> {
        self.ensure_api_key()?;

        tracing::debug!(
            provider = %self.id,
            backend = ?self.backend,
            model = %model.model_id,
            request_id = %request.request_id,
            "Calling LLM"
        );

        let content = match self.backend {
            RigBackend::OpenAI => self.call_openai(model, request).await?,
            RigBackend::Anthropic => self.call_anthropic(model, request).await?,
        };

        // Rig's prompt API returns text only; usage is estimated.
        let completion_tokens = (content.len() as u64).div_ceil(4);
        let status = if completion_tokens >= u64::from(output_limit(model, request)) {
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
        let status = if self.ensure_api_key().is_ok() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        ProviderHealth::healthy(&self.id).with_status(status)
    }
}

/// Completion ceiling sent upstream.
fn output_limit(model: &ModelConfig, request: &InferenceRequest) -> u32 {
    request
        .constraints
        .max_output_tokens
        .map_or(model.max_output_tokens, |n| n.min(model.max_output_tokens))
}

/// Separate system messages into a preamble and flatten the rest into a prompt.
fn split_prompt(messages: &[ChatMessage]) -> (Option<String>, String) {
    let mut preamble: Vec<&str> = Vec::new();
    let mut prompt = String::new();
    let single_turn = messages.iter().filter(|m| m.role != "system").count() == 1;

    for msg in messages {
        match msg.role.as_str() {
            "system" => preamble.push(&msg.content),
            "user" if single_turn => prompt.push_str(&msg.content),
            "user" => prompt.push_str(&format!("User: {}\n\n", msg.content)),
            "assistant" => prompt.push_str(&format!("Assistant: {}\n\n", msg.content)),
            "tool" => prompt.push_str(&format!("Tool Result: {}\n\n", msg.content)),
            _ => prompt.push_str(&format!("{}: {}\n\n", msg.role, msg.content)),
        }
    }

    let preamble = (!preamble.is_empty()).then(|| preamble.join("\n\n"));
    (preamble, prompt.trim_end().to_string())
}

// =============================================================================
// Embeddings
// =============================================================================

/// OpenAI embeddings through Rig.
pub struct RigEmbedder {
    model: String,
}

impl RigEmbedder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    /// Embedder if an OpenAI key is available.
    pub fn from_env(model: impl Into<String>) -> Option<Self> {
        std::env::var(RigBackend::OpenAI.api_key_var())
            .ok()
            .map(|_| Self::new(model))
    }
}

#[async_trait]
impl EmbeddingGenerator for RigEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        use rig::embeddings::EmbeddingsBuilder;
        use rig::providers::openai;

        if std::env::var(RigBackend::OpenAI.api_key_var()).is_err() {
            return Err(Error::provider("openai", "OPENAI_API_KEY not set for embeddings"));
        }

        let client = openai::Client::from_env();
        let embedding_model = client.embedding_model(&self.model);

        let result = EmbeddingsBuilder::new(embedding_model)
            .document(text)
            .map_err(|e| Error::provider("openai", format!("Embedding builder error: {}", e)))?
            .build()
            .await
            .map_err(|e| Error::provider("openai", format!("Embedding error: {}", e)))?;

        // Rig returns Vec<(document, OneOrMany<Embedding>)> with f64 components.
        if let Some((_, one_or_many)) = result.into_iter().next() {
            if let Some(embedding) = one_or_many.into_iter().next() {
                return Ok(embedding.vec.into_iter().map(|x| x as f32).collect());
            }
        }

        Err(Error::provider("openai", "No embedding returned"))
    }
}
