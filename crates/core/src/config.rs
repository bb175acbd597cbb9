use config::{Config, ConfigError, Environment, File};
use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::ModelConfig;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub queue: QueueConfig,
    pub usage: UsageConfig,
    pub observability: ObservabilityConfig,
    pub providers: Vec<ProviderDefinition>,
    /// Inline model catalog.
    pub models: Vec<ModelConfig>,
    /// Optional catalog file (JSON, YAML or TOML) loaded at startup.
    pub catalog_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub enable_tracing: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            enable_cors: true,
            enable_tracing: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Deadline applied when a request carries no `max_latency_ms`.
    pub default_max_latency_ms: u64,
    /// Per-attempt ceiling for a single provider call.
    pub provider_timeout_ms: u64,
    /// Upper bound on alternate candidates tried after a provider failure.
    pub max_retries: usize,
    /// Share one upstream call between concurrent identical requests.
    pub enable_coalescing: bool,
    /// Completion size assumed when a request does not bound it.
    pub default_output_tokens: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_max_latency_ms: 60_000,
            provider_timeout_ms: 30_000,
            max_retries: 3,
            enable_coalescing: true,
            default_output_tokens: 256,
        }
    }
}

impl GatewayConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub similarity_threshold: f32,
    /// Entry count above which least-recently-used entries are evicted.
    pub capacity: usize,
    /// When false only exact-hash lookups are performed.
    pub enable_embeddings: bool,
    pub embedding_model: String,
    pub embedding_timeout_seconds: f64,
    /// Responses to requests with a higher temperature are not stored.
    pub max_cacheable_temperature: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 3600,
            similarity_threshold: 0.95,
            capacity: 10_000,
            enable_embeddings: true,
            embedding_model: "text-embedding-3-small".into(),
            embedding_timeout_seconds: 2.0,
            max_cacheable_temperature: 0.5,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.embedding_timeout_seconds.max(0.0))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    pub default_rpm: u32,
    pub default_tpm: u64,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_rpm: 60,
            default_tpm: 100_000,
            window_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 30,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_seconds)
    }
}

/// Largest admissible `queue.max_size`: closing acquires every slot in one
/// `u32` request, and the semaphore caps its own permit count.
pub const MAX_QUEUE_SIZE: usize = if (u32::MAX as usize) < tokio::sync::Semaphore::MAX_PERMITS {
    u32::MAX as usize
} else {
    tokio::sync::Semaphore::MAX_PERMITS
};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub max_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_size: 64 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UsageConfig {
    pub enabled: bool,
    /// Endpoint receiving usage records as JSON.
    pub endpoint: Option<String>,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub timeout_ms: u64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            max_retries: 3,
            retry_backoff_ms: 200,
            timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub json_logs: bool,
    pub enable_metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            enable_metrics: true,
        }
    }
}

/// Which adapter implementation backs a provider.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(alias = "open_ai")]
    Openai,
    Anthropic,
    Mock,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderDefinition {
    /// Provider id referenced by `ModelConfig::provider`.
    pub id: String,
    pub kind: ProviderKind,
    pub api_key: Option<Secret<String>>,
    /// Simulated latency (mock providers only).
    pub latency_ms: Option<u64>,
    /// Fixed reply (mock providers only).
    pub response: Option<String>,
}

impl AppConfig {
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("SWITCHYARD_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map APP__QUEUE__MAX_SIZE=128 to queue.max_size
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.cache.similarity_threshold) {
            return Err(Error::config("cache.similarity_threshold must be within 0.0..=1.0"));
        }
        if self.cache.capacity == 0 {
            return Err(Error::config("cache.capacity must be positive"));
        }
        if self.queue.max_size == 0 {
            return Err(Error::config("queue.max_size must be positive"));
        }
        if self.queue.max_size > MAX_QUEUE_SIZE {
            return Err(Error::config(format!(
                "queue.max_size must not exceed {}",
                MAX_QUEUE_SIZE
            )));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(Error::config("circuit_breaker.failure_threshold must be positive"));
        }
        if self.rate_limit.default_rpm == 0 || self.rate_limit.default_tpm == 0 {
            return Err(Error::config("rate_limit defaults must be positive"));
        }
        if self.rate_limit.window_seconds == 0 {
            return Err(Error::config("rate_limit.window_seconds must be positive"));
        }
        if self.usage.enabled && self.usage.endpoint.is_none() {
            return Err(Error::config("usage.endpoint is required when usage is enabled"));
        }
        Ok(())
    }
}
