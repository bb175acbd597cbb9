use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use switchyard_core::config::ServerConfig;
use switchyard_core::types::{Capability, ModelConfig, ModelStatus};
use switchyard_gateway::{GatewayServer, ModelGateway};
use switchyard_model_gateway::{MockProvider, ModelRegistry};

fn app() -> Router {
    let registry = Arc::new(ModelRegistry::new());
    registry.register(ModelConfig::new("small", "mock").with_pricing(0.1, 0.2));
    registry.register(
        ModelConfig::new("large", "mock")
            .with_capability(Capability::ToolUse)
            .with_pricing(3.0, 15.0),
    );
    registry.register(ModelConfig::new("legacy", "mock").with_status(ModelStatus::Deprecated));

    let gateway = ModelGateway::builder(registry)
        .with_provider(Arc::new(MockProvider::new("mock").with_response("hello")))
        .build();
    GatewayServer::new(ServerConfig::default(), Arc::new(gateway)).build_router()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["models"], 3);
}

#[tokio::test]
async fn test_list_models_with_filters() {
    let response = app()
        .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let all = body_json(response).await;
    assert_eq!(all.as_array().unwrap().len(), 3);

    let response = app()
        .oneshot(
            Request::builder()
                .uri("/v1/models?capability=tool_use")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let tools = body_json(response).await;
    assert_eq!(tools.as_array().unwrap().len(), 1);
    assert_eq!(tools[0]["model_id"], "large");

    let response = app()
        .oneshot(
            Request::builder()
                .uri("/v1/models?status=deprecated")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let deprecated = body_json(response).await;
    assert_eq!(deprecated[0]["model_id"], "legacy");
}

#[tokio::test]
async fn test_get_model_and_not_found() {
    let response = app()
        .oneshot(Request::builder().uri("/v1/models/small").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["provider"], "mock");

    let response = app()
        .oneshot(Request::builder().uri("/v1/models/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "not_found");
}

#[tokio::test]
async fn test_completion_endpoint() {
    let request = json!({
        "request_id": "req-1",
        "agent_id": "agent-1",
        "prompt": { "type": "text", "user": "ping" }
    });
    let response = app().oneshot(post_json("/v1/completions", request)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["request_id"], "req-1");
    assert_eq!(body["model_id"], "small");
    assert_eq!(body["content"], "hello: ping");
    assert_eq!(body["cached"], false);
}

#[tokio::test]
async fn test_completion_error_mapping() {
    let empty = json!({
        "request_id": "req-2",
        "agent_id": "agent-1",
        "prompt": { "type": "text", "user": "" }
    });
    let response = app().oneshot(post_json("/v1/completions", empty)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "validation_error");
    assert_eq!(body["request_id"], "req-2");

    let vision = json!({
        "agent_id": "agent-1",
        "prompt": { "type": "text", "user": "look" },
        "requirements": { "capabilities": ["vision"] }
    });
    let response = app().oneshot(post_json("/v1/completions", vision)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["code"], "no_eligible_model");

    let malformed = Request::builder()
        .method("POST")
        .uri("/v1/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app().oneshot(malformed).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_endpoint_emits_sse() {
    let request = json!({
        "agent_id": "agent-1",
        "prompt": { "type": "text", "user": "stream me" }
    });
    let response = app()
        .oneshot(post_json("/v1/completions/stream", request))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: chunk"));
    assert!(text.contains("\"is_final\":true"));
}

#[tokio::test]
async fn test_provider_health_endpoint() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/v1/providers/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body[0]["provider_id"], "mock");
    assert_eq!(body[0]["status"], "healthy");
    assert_eq!(body[0]["circuit_state"], "closed");
}
