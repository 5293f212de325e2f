// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! HTTP-level tests for the JSON-RPC surface

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use toolgate_server::mock_dependencies::{test_state, test_state_with, MockDispatcher};
use toolgate_server::{build_router, ServerConfig};
use toolgate_pool::DispatchError;

fn router() -> (Router, Arc<MockDispatcher>) {
    let (state, dispatcher) = test_state();
    let config = state.config.clone();
    (build_router(state, &config), dispatcher)
}

fn rpc_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/rpc")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn successful_call_returns_result_envelope() {
    let (app, dispatcher) = router();

    let response = app
        .oneshot(rpc_request(json!({
            "jsonrpc": "2.0",
            "method": "tools/list",
            "params": {},
            "id": 1,
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["id"], 1);
    assert!(body["result"]["tools"].is_array());
    assert_eq!(dispatcher.calls(), vec!["tools/list".to_string()]);
}

#[tokio::test]
async fn malformed_envelope_is_a_400_with_invalid_request_code() {
    let (app, dispatcher) = router();

    let response = app
        .oneshot(rpc_request(json!({ "method": "tools/list", "id": 1 })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(body["id"], Value::Null);
    assert!(dispatcher.calls().is_empty());
}

#[tokio::test]
async fn notification_is_acked_without_reaching_the_pool() {
    let (app, dispatcher) = router();

    let response = app
        .oneshot(rpc_request(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body, json!({ "jsonrpc": "2.0", "result": true, "id": null }));
    assert!(dispatcher.calls().is_empty());
}

#[tokio::test]
async fn backend_failure_maps_to_500_with_server_error_code() {
    let (app, _dispatcher) = router();

    let response = app
        .oneshot(rpc_request(json!({
            "jsonrpc": "2.0",
            "method": "explode",
            "id": 9,
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["id"], 9);
}

#[tokio::test]
async fn saturation_timeout_maps_to_429() {
    let dispatcher = MockDispatcher::with_handler(|_, _| Err(DispatchError::Timeout));
    let (state, _) = test_state_with(dispatcher, ServerConfig::default());
    let config = state.config.clone();
    let app = build_router(state, &config);

    let response = app
        .oneshot(rpc_request(json!({
            "jsonrpc": "2.0",
            "method": "tools/list",
            "id": 2,
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32002);
}

#[tokio::test]
async fn forbidden_tool_calls_map_to_403() {
    let dispatcher =
        MockDispatcher::with_handler(|_, _| Err(DispatchError::Forbidden("disabled".into())));
    let (state, _) = test_state_with(dispatcher, ServerConfig::default());
    let config = state.config.clone();
    let app = build_router(state, &config);

    let response = app
        .oneshot(rpc_request(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": { "name": "echo", "arguments": {} },
            "id": 3,
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32003);
}

#[tokio::test]
async fn missing_credentials_are_rejected_with_401_when_auth_is_configured() {
    let mut config = ServerConfig::default();
    config.api_key = Some("sekrit".to_string());
    let (state, dispatcher) = test_state_with(MockDispatcher::new(), config);
    let config = state.config.clone();
    let app = build_router(state, &config);

    let response = app
        .clone()
        .oneshot(rpc_request(json!({
            "jsonrpc": "2.0",
            "method": "tools/list",
            "id": 1,
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(dispatcher.calls().is_empty());

    // The same request with the key goes through.
    let authed = Request::builder()
        .method("POST")
        .uri("/rpc")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "ApiKey sekrit")
        .body(Body::from(
            json!({ "jsonrpc": "2.0", "method": "tools/list", "id": 1 }).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(authed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_endpoints_skip_authentication() {
    let mut config = ServerConfig::default();
    config.api_key = Some("sekrit".to_string());
    let (state, _) = test_state_with(MockDispatcher::new(), config);
    let config = state.config.clone();
    let app = build_router(state, &config);

    for path in ["/healthz", "/readyz"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "path {}", path);
    }
}

#[tokio::test]
async fn listing_generations_returns_only_the_callers_rows() {
    let (state, _) = test_state();
    state
        .db
        .insert_generation("gen-mine", "anonymous", "anonymous/gen-mine/spec.json", "anonymous/gen-mine/project.tar.gz")
        .unwrap();
    state.db.mark_generation_success("gen-mine", 42).unwrap();
    state
        .db
        .insert_generation("gen-other", "someone-else", "someone-else/gen-other/spec.json", "someone-else/gen-other/project.tar.gz")
        .unwrap();
    let config = state.config.clone();
    let app = build_router(state, &config);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/generations")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let generations = body["generations"].as_array().unwrap();
    assert_eq!(generations.len(), 1);
    assert_eq!(generations[0]["id"], "gen-mine");
    assert_eq!(generations[0]["status"], "success");
    assert_eq!(generations[0]["durationMs"], 42);
}

#[tokio::test]
async fn unknown_generation_is_a_404() {
    let (app, _) = router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/generations/no-such-id")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
