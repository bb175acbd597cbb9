//! Error types for Switchyard.

use thiserror::Error;

/// Result type alias using Switchyard's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Switchyard.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Admission Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Rate limit exceeded for agent {agent_id}")]
    RateLimitExceeded { agent_id: String },

    #[error("Backpressure: {0}")]
    Backpressure(String),

    #[error("Deadline of {0}ms exceeded")]
    TimeoutExceeded(u64),

    #[error("Request cancelled by caller")]
    Cancelled,

    // =========================================================================
    // Routing Errors
    // =========================================================================
    #[error("No eligible model: {0}")]
    NoEligibleModel(String),

    #[error("All providers unavailable")]
    AllProvidersUnavailable,

    #[error("Not found: {0}")]
    NotFound(String),

    // =========================================================================
    // Provider Errors
    // =========================================================================
    #[error("Provider {provider_id} timed out after {timeout_ms}ms")]
    ProviderTimeout { provider_id: String, timeout_ms: u64 },

    #[error("Provider {provider_id} error: {message}")]
    ProviderError { provider_id: String, message: String },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a provider error.
    pub fn provider(provider_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderError {
            provider_id: provider_id.into(),
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether another candidate may be tried after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderError { .. } | Self::ProviderTimeout { .. })
    }

    /// Short machine-readable code, used in API error bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Backpressure(_) => "backpressure",
            Self::TimeoutExceeded(_) => "timeout_exceeded",
            Self::Cancelled => "cancelled",
            Self::NoEligibleModel(_) => "no_eligible_model",
            Self::AllProvidersUnavailable => "all_providers_unavailable",
            Self::NotFound(_) => "not_found",
            Self::ProviderTimeout { .. } => "provider_timeout",
            Self::ProviderError { .. } => "provider_error",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) | Self::Other(_) => "internal_error",
        }
    }
}
