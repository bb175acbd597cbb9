use serde::{Deserialize, Serialize};

// =============================================================================
// Response Types
// =============================================================================

/// Token usage of a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Completion status reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    #[default]
    Success,
    /// Generation stopped at the output token limit.
    Truncated,
}

/// What a provider adapter returns for one completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCompletion {
    pub content: String,
    pub usage: TokenUsage,
    pub status: ResponseStatus,
}

/// Response returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub request_id: String,
    pub content: String,
    pub usage: TokenUsage,
    pub status: ResponseStatus,
    pub provider_id: String,
    pub model_id: String,
    pub latency_ms: u64,
    /// Served without calling a provider.
    pub cached: bool,
    /// Estimated cost in USD.
    #[serde(default)]
    pub cost: f64,
}

/// One piece of a streamed completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub request_id: String,
    pub index: u32,
    pub delta: String,
    /// Set on the terminal chunk only.
    pub is_final: bool,
    /// Present on the terminal chunk when the provider reports it.
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    pub model_id: String,
    pub provider_id: String,
}
