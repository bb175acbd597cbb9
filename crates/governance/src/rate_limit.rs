//! Per-agent request and token rate limiter.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use switchyard_core::config::RateLimitConfig;

/// Requests-per-window and tokens-per-window limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub rpm: u32,
    pub tpm: u64,
}

/// Sliding-window usage for one agent.
#[derive(Debug, Default)]
struct AgentBudget {
    /// Admitted requests as (admission time, tokens), oldest first.
    events: VecDeque<(Instant, u64)>,
    /// Sum of tokens in `events`.
    tokens: u64,
    overrides: Option<RateLimits>,
}

impl AgentBudget {
    fn evict_expired(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, tokens)) = self.events.front() {
            if now.duration_since(at) < window {
                break;
            }
            self.events.pop_front();
            self.tokens -= tokens;
        }
    }
}

/// Sliding-window RPM/TPM limiter keyed by agent id.
///
/// Each agent is checked and charged under its own map shard lock, so two
/// concurrent requests for one agent can never jointly overshoot the budget.
pub struct RateLimiter {
    budgets: DashMap<String, AgentBudget>,
    defaults: RateLimits,
    window: Duration,
}

impl RateLimiter {
    /// Create a limiter with default limits and a 60 s window.
    pub fn new(default_rpm: u32, default_tpm: u64) -> Self {
        Self {
            budgets: DashMap::new(),
            defaults: RateLimits {
                rpm: default_rpm,
                tpm: default_tpm,
            },
            window: Duration::from_secs(60),
        }
    }

    /// Set the window length.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.default_rpm, config.default_tpm)
            .with_window(Duration::from_secs(config.window_seconds))
    }

    /// Admit and charge one request of `tokens` if neither window would be exceeded.
    ///
    /// A denied call leaves the agent's budget untouched.
    pub fn check_and_consume(&self, agent_id: &str, tokens: u64) -> bool {
        let now = Instant::now();
        let mut budget = self.budgets.entry(agent_id.to_string()).or_default();
        budget.evict_expired(now, self.window);

        let limits = budget.overrides.unwrap_or(self.defaults);
        let requests_ok = (budget.events.len() as u64) < u64::from(limits.rpm);
        let tokens_ok = budget.tokens.saturating_add(tokens) <= limits.tpm;

        if !(requests_ok && tokens_ok) {
            tracing::debug!(
                agent_id = agent_id,
                tokens = tokens,
                window_requests = budget.events.len(),
                window_tokens = budget.tokens,
                "Rate limit denied"
            );
            metrics::counter!("rate_limit_denials_total").increment(1);
            return false;
        }

        budget.events.push_back((now, tokens));
        budget.tokens += tokens;

        tracing::debug!(
            agent_id = agent_id,
            tokens = tokens,
            window_requests = budget.events.len(),
            window_tokens = budget.tokens,
            "Rate limit consumed"
        );
        true
    }

    /// Override the limits for one agent.
    pub fn set_limits(&self, agent_id: &str, limits: RateLimits) {
        self.budgets.entry(agent_id.to_string()).or_default().overrides = Some(limits);
    }

    /// Requests and tokens still available to `agent_id` in the current window.
    pub fn remaining(&self, agent_id: &str) -> RateLimits {
        let now = Instant::now();
        match self.budgets.get_mut(agent_id) {
            Some(mut budget) => {
                budget.evict_expired(now, self.window);
                let limits = budget.overrides.unwrap_or(self.defaults);
                RateLimits {
                    rpm: limits.rpm.saturating_sub(budget.events.len() as u32),
                    tpm: limits.tpm.saturating_sub(budget.tokens),
                }
            }
            None => self.defaults,
        }
    }

    /// Drop agents with no activity in the last window and no overrides.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let window = self.window;
        self.budgets.retain(|_, budget| {
            budget.evict_expired(now, window);
            budget.overrides.is_some() || !budget.events.is_empty()
        });
    }

    /// Number of tracked agents.
    pub fn tracked_agents(&self) -> usize {
        self.budgets.len()
    }
}
