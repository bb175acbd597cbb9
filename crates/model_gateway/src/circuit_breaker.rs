//! Per-provider circuit breaker.
//!
//! ## States
//! - **Closed**: requests flow; consecutive failures are counted and reaching
//!   the threshold opens the circuit
//! - **Open**: requests are denied until the recovery timeout has elapsed
//! - **Half-Open**: a single trial request is admitted; its success closes the
//!   circuit, its failure reopens it and restarts the timer. Outcomes of
//!   requests admitted before the circuit opened are ignored from here on
//!
//! State is keyed by provider id. Each key is mutated under its own map shard
//! lock, which is what makes the half-open trial single-flight.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use switchyard_core::{
    config::CircuitBreakerConfig,
    types::{CircuitState, HealthStatus, ProviderHealth},
};

/// Outcome of [`CircuitBreaker::allow_request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, request may proceed.
    Allowed,
    /// Circuit half-open and this caller holds the single trial slot.
    Trial,
    /// Circuit open (or a trial is already in flight).
    Denied,
}

impl Admission {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Self::Denied)
    }

    pub fn is_trial(self) -> bool {
        matches!(self, Self::Trial)
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    last_checked: DateTime<Utc>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
            last_checked: Utc::now(),
        }
    }
}

/// Circuit breakers for all providers.
pub struct CircuitBreaker {
    breakers: DashMap<String, BreakerState>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    /// Create a breaker set.
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.recovery_timeout())
    }

    fn recovery_elapsed(&self, breaker: &BreakerState) -> bool {
        breaker
            .opened_at
            .map_or(true, |at| at.elapsed() >= self.recovery_timeout)
    }

    fn transition(provider_id: &str, breaker: &mut BreakerState, to: CircuitState) {
        let from = breaker.state;
        breaker.state = to;
        match to {
            CircuitState::Open => {
                breaker.opened_at = Some(Instant::now());
                breaker.trial_in_flight = false;
                tracing::warn!(provider = provider_id, from = ?from, failures = breaker.consecutive_failures, "Circuit breaker OPENED");
            }
            CircuitState::HalfOpen => {
                tracing::info!(provider = provider_id, "Circuit breaker half-open, admitting trial");
            }
            CircuitState::Closed => {
                breaker.consecutive_failures = 0;
                breaker.opened_at = None;
                breaker.trial_in_flight = false;
                tracing::info!(provider = provider_id, "Circuit breaker closed (provider recovered)");
            }
        }
        metrics::counter!(
            "circuit_breaker_transitions_total",
            "provider" => provider_id.to_string(),
            "to" => format!("{:?}", to).to_lowercase()
        )
        .increment(1);
    }

    /// Gate a request to `provider_id`.
    pub fn allow_request(&self, provider_id: &str) -> Admission {
        let mut entry = self.breakers.entry(provider_id.to_string()).or_default();
        let breaker = entry.value_mut();
        breaker.last_checked = Utc::now();

        match breaker.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                if self.recovery_elapsed(breaker) {
                    Self::transition(provider_id, breaker, CircuitState::HalfOpen);
                    breaker.trial_in_flight = true;
                    Admission::Trial
                } else {
                    tracing::debug!(provider = provider_id, "Request denied (circuit open)");
                    Admission::Denied
                }
            }
            CircuitState::HalfOpen => {
                if breaker.trial_in_flight {
                    Admission::Denied
                } else {
                    breaker.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    /// Record a successful call admitted as [`Admission::Allowed`].
    ///
    /// Only a closed circuit is affected; the half-open state is decided by
    /// its trial alone.
    pub fn record_success(&self, provider_id: &str) {
        let mut entry = self.breakers.entry(provider_id.to_string()).or_default();
        let breaker = entry.value_mut();
        if breaker.state == CircuitState::Closed {
            breaker.consecutive_failures = 0;
        } else {
            tracing::debug!(provider = provider_id, state = ?breaker.state, "Ignoring late success");
        }
    }

    /// Record a failed call admitted as [`Admission::Allowed`].
    pub fn record_failure(&self, provider_id: &str) {
        let mut entry = self.breakers.entry(provider_id.to_string()).or_default();
        let breaker = entry.value_mut();
        if breaker.state != CircuitState::Closed {
            tracing::debug!(provider = provider_id, state = ?breaker.state, "Ignoring late failure");
            return;
        }
        breaker.consecutive_failures += 1;
        if breaker.consecutive_failures >= self.failure_threshold {
            Self::transition(provider_id, breaker, CircuitState::Open);
        }
    }

    /// Record the success of the half-open trial; closes the circuit.
    pub fn record_trial_success(&self, provider_id: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(provider_id) {
            if breaker.state == CircuitState::HalfOpen && breaker.trial_in_flight {
                Self::transition(provider_id, &mut breaker, CircuitState::Closed);
            }
        }
    }

    /// Record the failure of the half-open trial; reopens the circuit.
    pub fn record_trial_failure(&self, provider_id: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(provider_id) {
            if breaker.state == CircuitState::HalfOpen && breaker.trial_in_flight {
                breaker.consecutive_failures += 1;
                Self::transition(provider_id, &mut breaker, CircuitState::Open);
            }
        }
    }

    /// Record the outcome of a call according to how it was admitted.
    pub fn record_outcome(&self, provider_id: &str, admission: Admission, success: bool) {
        match (admission, success) {
            (Admission::Trial, true) => self.record_trial_success(provider_id),
            (Admission::Trial, false) => self.record_trial_failure(provider_id),
            (Admission::Allowed, true) => self.record_success(provider_id),
            (Admission::Allowed, false) => self.record_failure(provider_id),
            (Admission::Denied, _) => {}
        }
    }

    /// Free the trial slot of a trial that ended without an outcome
    /// (e.g. cancelled by its caller). No transition happens.
    pub fn release_trial(&self, provider_id: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(provider_id) {
            if breaker.state == CircuitState::HalfOpen {
                breaker.trial_in_flight = false;
            }
        }
    }

    /// Raw state of a provider's circuit.
    pub fn state(&self, provider_id: &str) -> CircuitState {
        self.breakers
            .get(provider_id)
            .map(|b| b.state)
            .unwrap_or_default()
    }

    /// Whether the circuit is open and still within its recovery timeout.
    pub fn is_open(&self, provider_id: &str) -> bool {
        self.breakers.get(provider_id).is_some_and(|b| {
            b.state == CircuitState::Open && !self.recovery_elapsed(&b)
        })
    }

    pub fn consecutive_failures(&self, provider_id: &str) -> u32 {
        self.breakers
            .get(provider_id)
            .map(|b| b.consecutive_failures)
            .unwrap_or(0)
    }

    /// Health snapshot derived from breaker state.
    pub fn health(&self, provider_id: &str) -> ProviderHealth {
        let (state, failures, last_checked) = self
            .breakers
            .get(provider_id)
            .map(|b| (b.state, b.consecutive_failures, b.last_checked))
            .unwrap_or((CircuitState::Closed, 0, Utc::now()));

        let status = match state {
            CircuitState::Closed if failures == 0 => HealthStatus::Healthy,
            CircuitState::Closed | CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Open => HealthStatus::Unhealthy,
        };

        ProviderHealth {
            provider_id: provider_id.to_string(),
            status,
            circuit_state: state,
            last_checked,
        }
    }
}
