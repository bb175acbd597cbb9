use futures::StreamExt;
use std::sync::Arc;

use switchyard_core::config::AppConfig;
use switchyard_core::types::{Capability, InferenceRequest};
use switchyard_core::Error;
use switchyard_gateway::{ModelGateway, ModelGatewayBuilder};
use switchyard_model_gateway::{build_provider, ModelRegistry};

// =============================================================================
// Helpers
// =============================================================================

/// Gateway assembled the way the binary does it, from `config/default.toml`.
fn gateway_from_default_config() -> (AppConfig, ModelGateway) {
    let config = AppConfig::load().expect("default config should load");
    config.validate().expect("default config should be valid");

    let registry = Arc::new(ModelRegistry::new());
    for model in &config.models {
        registry.register(model.clone());
    }

    let mut builder = ModelGatewayBuilder::from_config(&config, registry, None).unwrap();
    for definition in &config.providers {
        builder = builder.with_provider(build_provider(definition).unwrap());
    }
    (config, builder.build())
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_default_config_declares_catalog() {
    let config = AppConfig::load().unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.providers.len(), 3);
    assert!(config.models.iter().any(|m| m.model_id == "local-echo"));
    assert!(config
        .models
        .iter()
        .all(|m| config.providers.iter().any(|p| p.id == m.provider)));
}

#[tokio::test]
async fn test_cheapest_model_serves_plain_requests() {
    let (_, gateway) = gateway_from_default_config();

    let response = gateway
        .complete(InferenceRequest::text("system-test", "ping"))
        .await
        .unwrap();

    assert_eq!(response.model_id, "local-echo");
    assert_eq!(response.content, "local echo: ping");
    assert_eq!(response.cost, 0.0);

    let again = gateway
        .complete(InferenceRequest::text("system-test", "PING"))
        .await
        .unwrap();
    assert!(again.cached);

    gateway.close().await;
}

#[tokio::test]
async fn test_stream_from_default_config() {
    let (_, gateway) = gateway_from_default_config();

    let chunks: Vec<_> = gateway
        .stream(
            InferenceRequest::text("system-test", "count to three")
                .with_capability(Capability::Streaming),
        )
        .await
        .unwrap()
        .collect()
        .await;

    let text: String = chunks
        .into_iter()
        .map(|chunk| chunk.unwrap().delta)
        .collect();
    assert_eq!(text, "local echo: count to three");

    gateway.close().await;
    let closed = gateway
        .complete(InferenceRequest::text("system-test", "late"))
        .await;
    assert!(matches!(closed, Err(Error::Backpressure(_))));
}

#[tokio::test]
async fn test_unsatisfiable_budget_is_rejected() {
    let (_, gateway) = gateway_from_default_config();

    // Only the remote models can use tools, and none of them is free.
    let result = gateway
        .complete(
            InferenceRequest::text("system-test", "use a tool")
                .with_capability(Capability::ToolUse)
                .with_max_cost(0.0),
        )
        .await;
    assert!(matches!(result, Err(Error::NoEligibleModel(_))));
}
