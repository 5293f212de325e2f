// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! HTTP request handlers

use crate::error::{ServerError, ServerResult};
use crate::rpc;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};
use toolgate_pool::AuthContext;

/// POST /rpc
pub async fn handle_rpc(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    body: Json<Value>,
) -> (StatusCode, Json<Value>) {
    let (status, envelope) = rpc::process_rpc(&state, &ctx, body.0).await;
    (status, Json(envelope))
}

/// GET /generations
pub async fn list_generations(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ServerResult<Json<Value>> {
    let records = state.db.list_generations(&ctx.principal_id)?;
    let generations: Vec<Value> = records.iter().map(generation_json).collect();
    Ok(Json(json!({ "generations": generations })))
}

/// GET /generations/:id
pub async fn get_generation(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let record = state.db.get_generation(&id).map_err(|e| match e {
        toolgate_local_db::Error::GenerationNotFound(id) => ServerError::GenerationNotFound(id),
        other => ServerError::Database(other),
    })?;

    // Rows are scoped to the principal that created them.
    if record.user_id != ctx.principal_id {
        return Err(ServerError::GenerationNotFound(id));
    }

    Ok(Json(generation_json(&record)))
}

fn generation_json(record: &toolgate_local_db::GenerationRecord) -> Value {
    json!({
        "id": record.id,
        "status": record.status.as_str(),
        "durationMs": record.duration_ms,
        "error": record.error,
        "createdAt": record.created_at,
    })
}

/// GET /healthz
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /readyz
pub async fn readiness_check(State(state): State<AppState>) -> ServerResult<Json<Value>> {
    state.db.ping()?;
    Ok(Json(json!({ "status": "ready" })))
}
