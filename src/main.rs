#![deny(unused)]
//! Switchyard - model-serving gateway for agent workloads.
//!
//! Loads the model catalog and provider definitions, assembles the request
//! pipeline (cache, queue, rate limits, circuit breakers, routing) and serves
//! it over HTTP until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use switchyard_core::config::AppConfig;
use switchyard_core::traits::EmbeddingGenerator;
use switchyard_gateway::{GatewayServer, ModelGateway, ModelGatewayBuilder};
use switchyard_model_gateway::{build_provider, ModelCatalog, ModelRegistry, RigEmbedder};

/// How often expired cache entries and idle rate-limit windows are pruned.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    config.validate()?;

    switchyard_governance::configure_tracing(config.observability.json_logs)?;
    tracing::info!("Starting Switchyard v{}", env!("CARGO_PKG_VERSION"));

    // =========================================================================
    // Model catalog
    // =========================================================================
    let registry = Arc::new(ModelRegistry::new());
    for model in &config.models {
        registry.register(model.clone());
    }
    if let Some(path) = &config.catalog_path {
        let catalog = ModelCatalog::load(path).await?;
        let added = catalog.register_into(&registry);
        tracing::info!(path = %path, models = added, "Loaded model catalog");
    }
    if registry.is_empty() {
        tracing::warn!("Model catalog is empty, every request will fail with no_eligible_model");
    }

    // =========================================================================
    // Semantic cache embeddings
    // =========================================================================
    let embedder: Option<Arc<dyn EmbeddingGenerator>> =
        if config.cache.enabled && config.cache.enable_embeddings {
            match RigEmbedder::from_env(config.cache.embedding_model.clone()) {
                Some(embedder) => Some(Arc::new(embedder)),
                None => {
                    tracing::warn!("No embedding credentials found, semantic cache falls back to exact match");
                    None
                }
            }
        } else {
            None
        };

    // =========================================================================
    // Gateway
    // =========================================================================
    let mut builder = ModelGatewayBuilder::from_config(&config, registry.clone(), embedder)?;
    for definition in &config.providers {
        let adapter = build_provider(definition)?;
        tracing::info!(provider = %definition.id, kind = ?definition.kind, "Registered provider");
        builder = builder.with_provider(adapter);
    }
    let gateway = Arc::new(builder.build());

    tracing::info!(
        models = registry.len(),
        providers = config.providers.len(),
        queue = config.queue.max_size,
        "Model gateway initialized"
    );

    let maintenance = spawn_maintenance(gateway.clone());

    // =========================================================================
    // HTTP server
    // =========================================================================
    let mut server = GatewayServer::new(config.server.clone(), gateway.clone());
    if config.observability.enable_metrics {
        server = server.with_metrics(switchyard_governance::setup_metrics_recorder()?);
    }

    server.run(shutdown_signal()).await?;

    maintenance.abort();
    gateway.close().await;
    tracing::info!("Switchyard stopped");

    Ok(())
}

fn spawn_maintenance(gateway: Arc<ModelGateway>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            gateway.rate_limiter().cleanup();
            if let Some(cache) = gateway.cache() {
                cache.cleanup();
                tracing::debug!(entries = cache.len(), "Pruned expired cache entries");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
