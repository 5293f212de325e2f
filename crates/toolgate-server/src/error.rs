// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Server result type
pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types for the non-RPC surface
///
/// JSON-RPC call outcomes are mapped to error envelopes in the protocol
/// router instead; these errors cover middleware and plain REST
/// endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Database error: {0}")]
    Database(#[from] toolgate_local_db::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] toolgate_storage::StorageError),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Generation not found: {0}")]
    GenerationNotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Database(_) | ServerError::Storage(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServerError::Auth(_) => StatusCode::UNAUTHORIZED,
            ServerError::SessionNotFound(_) | ServerError::GenerationNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ServerError::Database(_) => "Database Error",
            ServerError::Storage(_) => "Storage Error",
            ServerError::Auth(_) => "Authentication Failed",
            ServerError::SessionNotFound(_) => "Session Not Found",
            ServerError::GenerationNotFound(_) => "Generation Not Found",
            ServerError::BadRequest(_) => "Bad Request",
            ServerError::Internal(_) => "Internal Server Error",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "title": self.title(),
            "status": status.as_u16(),
            "detail": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Convert any error to ServerError
impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

/// Convert IO errors
impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(format!("IO error: {}", err))
    }
}
