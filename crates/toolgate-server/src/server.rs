// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Main server implementation

use crate::auth::{auth_middleware, AuthConfig};
use crate::config::ServerConfig;
use crate::dependencies::DefaultServerDependencies;
use crate::error::{ServerError, ServerResult};
use crate::handlers;
use crate::sse;
use crate::state::AppState;
use axum::{
    http::HeaderValue,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

/// JSON-RPC gateway server
pub struct Server {
    config: ServerConfig,
    app: Router,
}

impl Server {
    /// Create a new server instance
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        let state = DefaultServerDependencies::new(config.clone()).await?.into_state();
        Self::with_state(config, state)
    }

    /// Construct a server from an already-built app state (used for custom dependencies)
    pub fn with_state(config: ServerConfig, state: AppState) -> ServerResult<Self> {
        let app = build_router(state, &config);
        Ok(Self { config, app })
    }

    /// Run the server
    pub async fn run(self) -> ServerResult<()> {
        let addr = self.config.bind_addr;
        info!("Starting server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.app)
            .await
            .map_err(|err| ServerError::Internal(format!("server error: {err}")))?;

        Ok(())
    }

    /// Get the bind address
    pub fn addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

/// Build the Axum application with routes and middleware
///
/// Exposed separately so tests can drive the router without binding a
/// socket.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let auth_config = AuthConfig {
        api_key: config.api_key.clone(),
        jwt_secret: config.jwt_secret.clone(),
    };

    let middleware_stack = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(move |req, next| {
            let auth_config = auth_config.clone();
            auth_middleware(auth_config, req, next)
        }))
        .layer({
            if config.enable_cors {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new()
                    .allow_origin(vec![
                        HeaderValue::from_static("http://localhost:3000"),
                        HeaderValue::from_static("http://127.0.0.1:3000"),
                    ])
                    .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                    .allow_headers([
                        axum::http::header::AUTHORIZATION,
                        axum::http::header::CONTENT_TYPE,
                    ])
            }
        });

    Router::new()
        // Protocol endpoints
        .route("/rpc", post(handlers::handle_rpc))
        .route("/sse", get(sse::open_session))
        .route("/message", post(sse::post_message))
        // Generation inspection
        .route("/generations", get(handlers::list_generations))
        .route("/generations/:id", get(handlers::get_generation))
        // Health and status
        .route("/healthz", get(handlers::health_check))
        .route("/readyz", get(handlers::readiness_check))
        .with_state(state)
        .layer(middleware_stack)
}
