use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Circuit breaker state of a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Coarse health of a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    /// Reachable but recently failing.
    Degraded,
    Unhealthy,
}

/// Provider health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub status: HealthStatus,
    pub circuit_state: CircuitState,
    pub last_checked: DateTime<Utc>,
}

impl ProviderHealth {
    /// A healthy, closed snapshot taken now.
    pub fn healthy(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            status: HealthStatus::Healthy,
            circuit_state: CircuitState::Closed,
            last_checked: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: HealthStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_circuit_state(mut self, state: CircuitState) -> Self {
        self.circuit_state = state;
        self
    }
}
