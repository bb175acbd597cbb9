//! Usage-reporting sink.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::TokenUsage;

/// Usage of one served request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub request_id: String,
    pub agent_id: String,
    pub model_id: String,
    pub provider_id: String,
    pub usage: TokenUsage,
    /// Estimated cost in USD.
    pub cost: f64,
}

/// External usage sink (e.g. a persistence service).
#[async_trait]
pub trait UsageReporter: Send + Sync {
    async fn notify_usage(&self, record: &UsageRecord) -> Result<()>;
}
