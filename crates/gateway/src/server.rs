//! Axum-based HTTP server for the gateway.

use axum::{
    extract::{rejection::JsonRejection, Json, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use futures::stream::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use switchyard_core::{
    config::ServerConfig,
    types::{Capability, InferenceRequest, ModelConfig, ModelStatus, ProviderHealth},
    Error, Result,
};
use switchyard_model_gateway::ModelFilter;

use crate::gateway::ModelGateway;

/// Shared application state.
pub struct AppState {
    pub gateway: Arc<ModelGateway>,
}

/// Gateway server.
pub struct GatewayServer {
    config: ServerConfig,
    state: Arc<AppState>,
    metrics_handle: Option<PrometheusHandle>,
}

impl GatewayServer {
    /// Create a new gateway server.
    pub fn new(config: ServerConfig, gateway: Arc<ModelGateway>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { gateway }),
            metrics_handle: None,
        }
    }

    /// Set metrics handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/v1/models", get(list_models_handler))
            .route("/v1/models/:model_id", get(get_model_handler))
            .route("/v1/providers/health", get(provider_health_handler))
            .route("/v1/completions", post(complete_handler))
            .route("/v1/completions/stream", post(stream_handler))
            .with_state(self.state.clone());

        if let Some(handle) = &self.metrics_handle {
            let handle = handle.clone();
            router = router.route("/metrics", get(move || async move { handle.render() }));
        }

        if self.config.enable_cors {
            router = router.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any));
        }

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::internal(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!(addr = %addr, "Gateway server starting");

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::internal(format!("Server error: {}", e)))?;

        Ok(())
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub models: usize,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable error code.
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

/// Filters for `GET /v1/models`.
#[derive(Debug, Default, Deserialize)]
pub struct ModelQuery {
    pub status: Option<ModelStatus>,
    pub capability: Option<Capability>,
}

/// HTTP status for a gateway error.
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::NoEligibleModel(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::ProviderError { .. } => StatusCode::BAD_GATEWAY,
        Error::AllProvidersUnavailable | Error::Backpressure(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::ProviderTimeout { .. } | Error::TimeoutExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        // Client closed request.
        Error::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Error::Config(_) | Error::Internal(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error returned by handlers.
pub struct ApiError {
    error: Error,
    request_id: Option<String>,
}

impl ApiError {
    fn new(error: Error, request_id: Option<String>) -> Self {
        Self { error, request_id }
    }

    fn body(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error.code().to_string(),
            message: self.error.to_string(),
            request_id: self.request_id.clone(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::new(error, None)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(Error::validation(rejection.body_text()), None)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (status_for(&self.error), Json(self.body())).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = if state.gateway.is_closed() { "closing" } else { "ok" };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        models: state.gateway.registry().len(),
    })
}

async fn list_models_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ModelQuery>,
) -> Json<Vec<ModelConfig>> {
    let filter = ModelFilter {
        status: query.status,
        capability: query.capability,
    };
    Json(state.gateway.registry().list(&filter))
}

async fn get_model_handler(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> std::result::Result<Json<ModelConfig>, ApiError> {
    Ok(Json(state.gateway.registry().get(&model_id)?))
}

async fn provider_health_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ProviderHealth>> {
    Json(state.gateway.health().await)
}

async fn complete_handler(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<InferenceRequest>, JsonRejection>,
) -> std::result::Result<Response, ApiError> {
    let Json(request) = payload?;
    let request_id = request.request_id.clone();

    let response = state
        .gateway
        .complete(request)
        .await
        .map_err(|e| ApiError::new(e, Some(request_id)))?;
    Ok(Json(response).into_response())
}

async fn stream_handler(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<InferenceRequest>, JsonRejection>,
) -> std::result::Result<Response, ApiError> {
    let Json(request) = payload?;
    let request_id = request.request_id.clone();

    let chunks = state
        .gateway
        .stream(request)
        .await
        .map_err(|e| ApiError::new(e, Some(request_id.clone())))?;

    // Dropping the response body (client disconnect) drops the provider stream.
    let events = chunks.map(move |item| match item {
        Ok(chunk) => Event::default().event("chunk").json_data(&chunk),
        Err(e) => Event::default()
            .event("error")
            .json_data(ApiError::new(e, Some(request_id.clone())).body()),
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&Error::RateLimitExceeded { agent_id: "a".into() }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status_for(&Error::AllProvidersUnavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(&Error::TimeoutExceeded(5)), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(&Error::Cancelled).as_u16(), 499);
    }
}
