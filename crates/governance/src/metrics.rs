//! Metrics implementation using Prometheus.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use switchyard_core::{Error, Result};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::internal(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Count a finished gateway request and record its latency.
pub fn track_request(outcome: &str, latency_sec: f64) {
    metrics::counter!("gateway_requests_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "outcome" => outcome.to_string())
        .record(latency_sec);
}

/// Helper to track token usage.
pub fn track_tokens(model: &str, prompt: u64, completion: u64) {
    metrics::counter!("llm_token_usage_total", "model" => model.to_string(), "type" => "prompt").increment(prompt);
    metrics::counter!("llm_token_usage_total", "model" => model.to_string(), "type" => "completion").increment(completion);
}

/// Count a cache lookup by result (`exact`, `semantic`, `miss`).
pub fn track_cache_lookup(result: &'static str) {
    metrics::counter!("gateway_cache_lookups_total", "result" => result).increment(1);
}
