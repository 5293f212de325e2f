// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Authentication and authorization
//!
//! Requests authenticate with either a shared API key or a JWT. The
//! middleware resolves the credential to an [`AuthContext`] and stores
//! it in request extensions before any handler runs, so routing and
//! policy checks downstream never re-parse headers.

use crate::error::ServerError;
use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use toolgate_pool::{AuthContext, SCOPE_TOOLS};

/// Authentication configuration
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub api_key: Option<String>,
    pub jwt_secret: Option<String>,
}

impl AuthConfig {
    /// Create auth config from API key
    pub fn with_api_key(api_key: String) -> Self {
        Self {
            api_key: Some(api_key),
            jwt_secret: None,
        }
    }

    /// Create auth config from JWT secret
    pub fn with_jwt_secret(secret: String) -> Self {
        Self {
            api_key: None,
            jwt_secret: Some(secret),
        }
    }

    /// Check if authentication is required
    pub fn requires_auth(&self) -> bool {
        self.api_key.is_some() || self.jwt_secret.is_some()
    }

    /// Validate API key authentication
    ///
    /// The API key is the root credential; it carries every scope.
    pub fn validate_api_key(&self, provided_key: &str) -> Result<AuthContext, ServerError> {
        if let Some(expected_key) = &self.api_key {
            if expected_key == provided_key {
                Ok(AuthContext::new("api-key", vec![SCOPE_TOOLS.to_string()]))
            } else {
                Err(ServerError::Auth("Invalid API key".to_string()))
            }
        } else {
            Err(ServerError::Auth(
                "API key authentication not configured".to_string(),
            ))
        }
    }

    /// Validate JWT token and build the caller's context from its claims
    pub fn validate_jwt(&self, token: &str) -> Result<AuthContext, ServerError> {
        if let Some(secret) = &self.jwt_secret {
            let decoding_key = DecodingKey::from_secret(secret.as_ref());
            let validation = Validation::default();

            let token_data = decode::<Claims>(token, &decoding_key, &validation)
                .map_err(|_| ServerError::Auth("Invalid JWT token".to_string()))?;

            let claims = token_data.claims;
            Ok(AuthContext::new(&claims.sub, claims.scopes))
        } else {
            Err(ServerError::Auth(
                "JWT authentication not configured".to_string(),
            ))
        }
    }

    /// Context used when no authentication is configured (development)
    pub fn anonymous_context() -> AuthContext {
        AuthContext::new("anonymous", vec![SCOPE_TOOLS.to_string()])
    }
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (principal ID)
    pub exp: usize,  // Expiration time
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Authentication middleware
///
/// On success the resolved [`AuthContext`] is inserted into request
/// extensions. Failures short-circuit with 401 before any routing
/// decision is made.
pub async fn auth_middleware(
    auth_config: AuthConfig,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // Health probes stay reachable without credentials
    let path = req.uri().path();
    if path == "/healthz" || path == "/readyz" {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.to_string());

    let auth_result = match auth_header.as_deref() {
        Some(auth) if auth.starts_with("ApiKey ") => {
            let api_key = auth.trim_start_matches("ApiKey ");
            auth_config.validate_api_key(api_key)
        }
        Some(auth) if auth.starts_with("Bearer ") => {
            let token = auth.trim_start_matches("Bearer ");
            auth_config.validate_jwt(token)
        }
        _ => {
            if auth_config.requires_auth() {
                Err(ServerError::Auth(
                    "Missing or invalid authorization header".to_string(),
                ))
            } else {
                Ok(AuthConfig::anonymous_context())
            }
        }
    };

    match auth_result {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            Ok(next.run(req).await)
        }
        Err(err) => Ok(err.into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn api_key_grants_the_tools_scope() {
        let config = AuthConfig::with_api_key("secret".to_string());
        let ctx = config.validate_api_key("secret").unwrap();
        assert_eq!(ctx.principal_id, "api-key");
        assert!(ctx.has_scope(SCOPE_TOOLS));

        assert!(config.validate_api_key("wrong").is_err());
    }

    #[test]
    fn jwt_claims_become_the_auth_context() {
        let secret = "jwt-test-secret";
        let claims = Claims {
            sub: "user-42".to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
            scopes: vec![SCOPE_TOOLS.to_string()],
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_ref()),
        )
        .unwrap();

        let config = AuthConfig::with_jwt_secret(secret.to_string());
        let ctx = config.validate_jwt(&token).unwrap();
        assert_eq!(ctx.principal_id, "user-42");
        assert!(ctx.has_scope(SCOPE_TOOLS));
    }

    #[test]
    fn expired_jwt_is_rejected() {
        let secret = "jwt-test-secret";
        let claims = Claims {
            sub: "user-42".to_string(),
            exp: (chrono::Utc::now().timestamp() - 3600) as usize,
            scopes: vec![],
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_ref()),
        )
        .unwrap();

        let config = AuthConfig::with_jwt_secret(secret.to_string());
        assert!(config.validate_jwt(&token).is_err());
    }

    #[test]
    fn scopeless_jwt_still_identifies_the_principal() {
        let secret = "jwt-test-secret";
        let claims = Claims {
            sub: "reader".to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
            scopes: vec![],
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_ref()),
        )
        .unwrap();

        let config = AuthConfig::with_jwt_secret(secret.to_string());
        let ctx = config.validate_jwt(&token).unwrap();
        assert_eq!(ctx.principal_id, "reader");
        assert!(!ctx.has_scope(SCOPE_TOOLS));
    }
}
