// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! SSE session bridge
//!
//! Pairs a long-lived `GET /sse` event stream with a `POST` message
//! endpoint. The first event on every stream names the endpoint the
//! client must post to, tagged with the session's id; responses to
//! posted calls arrive as `message` events on the stream rather than in
//! the POST body.

use crate::error::ServerError;
use crate::rpc;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::{StatusCode, Uri},
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use toolgate_pool::AuthContext;
use tracing::{debug, info};
use uuid::Uuid;

/// Live SSE sessions keyed by session id
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

/// Sender side of one session's event stream plus the identity it was
/// opened with
#[derive(Clone)]
struct SessionHandle {
    tx: mpsc::Sender<Value>,
    ctx: AuthContext,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently open sessions
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, id: String, handle: SessionHandle) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(id, handle);
        }
    }

    fn remove(&self, id: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(id);
        }
    }

    fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.read().ok().and_then(|s| s.get(id).cloned())
    }
}

/// Removes the session from the registry when the stream is dropped,
/// whichever way the connection ends.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        debug!(session_id = %self.id, "sse session closed");
        self.registry.remove(&self.id);
    }
}

/// Derive the message endpoint path from the SSE endpoint path
///
/// A trailing `/sse` segment is replaced with `/message`; any other
/// path gets `/message` appended.
pub fn message_endpoint_for(sse_path: &str) -> String {
    if let Some(base) = sse_path.strip_suffix("/sse") {
        format!("{}/message", base)
    } else {
        format!("{}/message", sse_path.trim_end_matches('/'))
    }
}

/// Open an SSE session
pub async fn open_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    uri: Uri,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<Value>(32);

    state
        .sessions
        .insert(session_id.clone(), SessionHandle { tx, ctx });
    info!(session_id = %session_id, "sse session opened");

    let endpoint = format!(
        "{}?sessionId={}",
        message_endpoint_for(uri.path()),
        session_id
    );
    let guard = SessionGuard {
        registry: state.sessions.clone(),
        id: session_id,
    };

    let endpoint_event = futures::stream::once(async move {
        Ok(Event::default().event("endpoint").data(endpoint))
    });
    let messages = ReceiverStream::new(rx).map(move |envelope| {
        // Guard lives inside the stream so it drops with the connection
        let _ = &guard;
        let payload = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".into());
        Ok(Event::default().event("message").data(payload))
    });

    Sse::new(endpoint_event.chain(messages)).keep_alive(
        KeepAlive::new()
            .interval(state.config.keepalive_interval)
            .text("keep-alive"),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub session_id: String,
}

/// Accept a JSON-RPC message for an open session
///
/// The call is processed with the identity captured when the session
/// was opened, not the identity on this POST. The response envelope
/// goes out on the session's event stream; the POST itself only
/// acknowledges receipt.
pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: axum::Json<Value>,
) -> Result<StatusCode, ServerError> {
    let handle = state
        .sessions
        .get(&query.session_id)
        .ok_or_else(|| ServerError::SessionNotFound(query.session_id.clone()))?;

    let (_status, envelope) = rpc::process_rpc(&state, &handle.ctx, body.0).await;

    // The stream may have closed while the call was in flight.
    handle
        .tx
        .send(envelope)
        .await
        .map_err(|_| ServerError::SessionNotFound(query.session_id.clone()))?;

    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_suffix_is_replaced_with_message() {
        assert_eq!(message_endpoint_for("/sse"), "/message");
        assert_eq!(message_endpoint_for("/mcp/sse"), "/mcp/message");
    }

    #[test]
    fn other_paths_get_message_appended() {
        assert_eq!(message_endpoint_for("/events"), "/events/message");
        assert_eq!(message_endpoint_for("/events/"), "/events/message");
    }

    #[test]
    fn registry_lookup_round_trip() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());

        let (tx, _rx) = mpsc::channel(1);
        registry.insert(
            "s1".to_string(),
            SessionHandle {
                tx,
                ctx: AuthContext::new("tester", Vec::<String>::new()),
            },
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.get("s1").is_some());
        assert!(registry.get("s2").is_none());

        registry.remove("s1");
        assert!(registry.is_empty());
    }
}
