// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! JSON-RPC 2.0 protocol router
//!
//! One processing path serves both transports: `POST /rpc` feeds a
//! request body straight through [`process_rpc`], and the SSE message
//! endpoint feeds session-posted bodies through the same function
//! before pushing the result onto the event stream.

use crate::generation;
use crate::state::AppState;
use axum::http::StatusCode;
use serde_json::{json, Value};
use toolgate_pool::{AuthContext, DispatchError};
use tracing::{debug, warn};

/// JSON-RPC error codes used by the gateway itself
pub const CODE_BACKEND: i64 = -32000;
pub const CODE_UNAUTHORIZED: i64 = -32001;
pub const CODE_TIMEOUT: i64 = -32002;
pub const CODE_FORBIDDEN: i64 = -32003;
pub const CODE_INVALID_REQUEST: i64 = -32600;

/// Process one JSON-RPC envelope and produce the HTTP status plus the
/// response envelope to return (or push to a session stream).
pub async fn process_rpc(state: &AppState, ctx: &AuthContext, body: Value) -> (StatusCode, Value) {
    let id = body.get("id").cloned();

    // Envelope validation happens before anything touches the pool.
    let valid_version = body.get("jsonrpc").and_then(Value::as_str) == Some("2.0");
    let method = body
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if !valid_version || method.is_empty() {
        // Invalid envelopes always answer with a null id.
        return (
            StatusCode::BAD_REQUEST,
            error_envelope(None, CODE_INVALID_REQUEST, "Invalid Request"),
        );
    }

    // Notifications are acknowledged and dropped; backends never see them.
    let Some(id) = id.filter(|id| !id.is_null()) else {
        debug!(method = %method, "dropping notification");
        return (
            StatusCode::OK,
            json!({ "jsonrpc": "2.0", "result": true, "id": null }),
        );
    };

    let params = body.get("params").cloned().unwrap_or(Value::Null);

    let outcome = if is_generation_call(state, &method, &params) {
        generation::run(state, ctx, params).await
    } else {
        state.dispatcher.dispatch(ctx, &method, params).await
    };

    match outcome {
        Ok(result) => (
            StatusCode::OK,
            json!({ "jsonrpc": "2.0", "result": result, "id": id }),
        ),
        Err(err) => {
            warn!(method = %method, error = %err, "rpc call failed");
            let (status, code) = map_dispatch_error(&err);
            (status, error_envelope(Some(id), code, &err.to_string()))
        }
    }
}

/// Whether this call should be intercepted by the generation pipeline
fn is_generation_call(state: &AppState, method: &str, params: &Value) -> bool {
    method == "tools/call"
        && params.get("name").and_then(Value::as_str) == Some(&state.config.generation.tool_name)
}

fn map_dispatch_error(err: &DispatchError) -> (StatusCode, i64) {
    match err {
        DispatchError::Unauthorized(_) => (StatusCode::FORBIDDEN, CODE_UNAUTHORIZED),
        DispatchError::Forbidden(_) => (StatusCode::FORBIDDEN, CODE_FORBIDDEN),
        DispatchError::Timeout => (StatusCode::TOO_MANY_REQUESTS, CODE_TIMEOUT),
        DispatchError::Backend(_) => (StatusCode::INTERNAL_SERVER_ERROR, CODE_BACKEND),
    }
}

fn error_envelope(id: Option<Value>, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": id.unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_dependencies::test_state;
    use serde_json::json;
    use toolgate_pool::SCOPE_TOOLS;

    fn ctx() -> AuthContext {
        AuthContext::new("tester", vec![SCOPE_TOOLS.to_string()])
    }

    #[tokio::test]
    async fn missing_version_is_rejected_without_touching_the_pool() {
        let (state, dispatcher) = test_state();
        let (status, envelope) =
            process_rpc(&state, &ctx(), json!({ "method": "tools/list", "id": 1 })).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(envelope["error"]["code"], CODE_INVALID_REQUEST);
        assert_eq!(envelope["id"], Value::Null);
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_method_is_rejected() {
        let (state, dispatcher) = test_state();
        let (status, envelope) = process_rpc(
            &state,
            &ctx(),
            json!({ "jsonrpc": "2.0", "method": "", "id": 1 }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(envelope["error"]["code"], CODE_INVALID_REQUEST);
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn notifications_are_acked_and_never_dispatched() {
        let (state, dispatcher) = test_state();
        let (status, envelope) = process_rpc(
            &state,
            &ctx(),
            json!({ "jsonrpc": "2.0", "method": "notifications/progress" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            envelope,
            json!({ "jsonrpc": "2.0", "result": true, "id": null })
        );
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn successful_call_echoes_the_request_id() {
        let (state, dispatcher) = test_state();
        let (status, envelope) = process_rpc(
            &state,
            &ctx(),
            json!({ "jsonrpc": "2.0", "method": "tools/list", "params": {}, "id": "req-7" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(envelope["id"], "req-7");
        assert!(envelope["result"].is_object());
        assert_eq!(dispatcher.calls(), vec!["tools/list".to_string()]);
    }

    #[tokio::test]
    async fn dispatch_errors_map_to_protocol_codes() {
        let cases = [
            (
                DispatchError::Unauthorized("missing scope".into()),
                StatusCode::FORBIDDEN,
                CODE_UNAUTHORIZED,
            ),
            (
                DispatchError::Forbidden("disabled".into()),
                StatusCode::FORBIDDEN,
                CODE_FORBIDDEN,
            ),
            (DispatchError::Timeout, StatusCode::TOO_MANY_REQUESTS, CODE_TIMEOUT),
            (
                DispatchError::Backend("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                CODE_BACKEND,
            ),
        ];

        for (err, want_status, want_code) in cases {
            let (status, code) = map_dispatch_error(&err);
            assert_eq!(status, want_status);
            assert_eq!(code, want_code);
        }
    }

    #[tokio::test]
    async fn backend_failure_surfaces_as_error_envelope() {
        let (state, _dispatcher) = test_state();
        let (status, envelope) = process_rpc(
            &state,
            &ctx(),
            json!({ "jsonrpc": "2.0", "method": "explode", "params": {}, "id": 3 }),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(envelope["error"]["code"], CODE_BACKEND);
        assert_eq!(envelope["id"], 3);
    }
}
