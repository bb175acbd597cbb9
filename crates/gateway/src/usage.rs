//! Fire-and-forget usage reporting.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;

use switchyard_core::{
    config::UsageConfig,
    traits::{UsageRecord, UsageReporter},
    Error, Result,
};

/// Delivers usage records in the background with bounded retries.
///
/// Delivery never blocks or fails the request that produced the record.
pub struct UsageBridge {
    reporter: Option<Arc<dyn UsageReporter>>,
    tracker: TaskTracker,
    max_retries: u32,
    retry_backoff: Duration,
}

impl UsageBridge {
    pub fn new(reporter: Arc<dyn UsageReporter>) -> Self {
        Self {
            reporter: Some(reporter),
            tracker: TaskTracker::new(),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }

    /// A bridge that drops every record.
    pub fn disabled() -> Self {
        Self {
            reporter: None,
            tracker: TaskTracker::new(),
            max_retries: 0,
            retry_backoff: Duration::ZERO,
        }
    }

    /// Build from configuration; disabled unless an endpoint is configured.
    pub fn from_config(config: &UsageConfig) -> Result<Self> {
        match (&config.endpoint, config.enabled) {
            (Some(endpoint), true) => {
                let reporter = HttpUsageReporter::new(
                    endpoint.clone(),
                    Duration::from_millis(config.timeout_ms),
                )?;
                Ok(Self::new(Arc::new(reporter))
                    .with_retries(config.max_retries, Duration::from_millis(config.retry_backoff_ms)))
            }
            _ => Ok(Self::disabled()),
        }
    }

    /// Retry count and linear backoff step.
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.reporter.is_some()
    }

    /// Queue `record` for delivery and return immediately.
    pub fn notify(&self, record: UsageRecord) {
        let Some(reporter) = self.reporter.clone() else {
            return;
        };
        let max_retries = self.max_retries;
        let backoff = self.retry_backoff;

        self.tracker.spawn(async move {
            for attempt in 0..=max_retries {
                match reporter.notify_usage(&record).await {
                    Ok(()) => {
                        tracing::debug!(request_id = %record.request_id, attempt = attempt, "Usage reported");
                        return;
                    }
                    Err(e) if attempt < max_retries => {
                        tracing::debug!(request_id = %record.request_id, attempt = attempt, error = %e, "Usage report failed, retrying");
                        tokio::time::sleep(backoff * (attempt + 1)).await;
                    }
                    Err(e) => {
                        tracing::warn!(request_id = %record.request_id, error = %e, "Dropping usage report after retries");
                    }
                }
            }
        });
    }

    /// Wait for outstanding deliveries.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Deliveries still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }
}

/// Posts usage records as JSON to an HTTP endpoint.
pub struct HttpUsageReporter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUsageReporter {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build usage client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl UsageReporter for HttpUsageReporter {
    async fn notify_usage(&self, record: &UsageRecord) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(record)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| Error::internal(format!("Usage endpoint error: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::mocks::RecordingUsageReporter;
    use switchyard_core::types::TokenUsage;

    fn record(id: &str) -> UsageRecord {
        UsageRecord {
            request_id: id.into(),
            agent_id: "agent".into(),
            model_id: "m".into(),
            provider_id: "p".into(),
            usage: TokenUsage::new(10, 5),
            cost: 0.0,
        }
    }

    #[tokio::test]
    async fn test_delivers_records() {
        let reporter = Arc::new(RecordingUsageReporter::new());
        let bridge = UsageBridge::new(reporter.clone());

        bridge.notify(record("r1"));
        bridge.notify(record("r2"));
        bridge.drain().await;

        assert_eq!(reporter.records().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let reporter = Arc::new(RecordingUsageReporter::failing_first(2));
        let bridge = UsageBridge::new(reporter.clone()).with_retries(3, Duration::from_millis(100));

        bridge.notify(record("r1"));
        bridge.drain().await;

        assert_eq!(reporter.attempts(), 3);
        assert_eq!(reporter.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retries() {
        let reporter = Arc::new(RecordingUsageReporter::failing_first(10));
        let bridge = UsageBridge::new(reporter.clone()).with_retries(2, Duration::from_millis(100));

        bridge.notify(record("r1"));
        bridge.drain().await;

        assert_eq!(reporter.attempts(), 3);
        assert!(reporter.records().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_drops_records() {
        let bridge = UsageBridge::disabled();
        bridge.notify(record("r1"));
        assert_eq!(bridge.pending(), 0);
        bridge.drain().await;
    }
}
