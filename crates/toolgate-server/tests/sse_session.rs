// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! SSE session bridge tests over a real socket
//!
//! The router is served on an ephemeral port and exercised with a real
//! HTTP client, since the session bridge's behavior spans two
//! connections.

use futures::StreamExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use toolgate_server::mock_dependencies::test_state;
use toolgate_server::build_router;

async fn serve() -> SocketAddr {
    let (state, _dispatcher) = test_state();
    let config = state.config.clone();
    let app = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Read SSE frames off a byte stream until a frame with the wanted
/// event name arrives, returning its data payload
async fn next_event<B: AsRef<[u8]>>(
    stream: &mut (impl StreamExt<Item = reqwest::Result<B>> + Unpin),
    buffer: &mut String,
    event_name: &str,
) -> String {
    loop {
        // Keepalives and other frames are skipped.
        while let Some(frame) = take_frame(buffer) {
            if let Some(data) = parse_event(&frame, event_name) {
                return data;
            }
        }
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for sse event")
            .expect("stream ended")
            .expect("stream error");
        buffer.push_str(&String::from_utf8_lossy(chunk.as_ref()));
    }
}

fn take_frame(buffer: &mut String) -> Option<String> {
    let frame_end = buffer.find("\n\n")?;
    Some(buffer.drain(..frame_end + 2).collect())
}

fn parse_event(frame: &str, event_name: &str) -> Option<String> {
    let mut name = None;
    let mut data = String::new();
    for line in frame.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push_str(value.trim());
        }
    }
    (name.as_deref() == Some(event_name)).then_some(data)
}

#[tokio::test]
async fn first_event_announces_the_message_endpoint() {
    let addr = serve().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/sse", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let endpoint = next_event(&mut stream, &mut buffer, "endpoint").await;

    assert!(
        endpoint.starts_with("/message?sessionId="),
        "unexpected endpoint: {}",
        endpoint
    );
}

#[tokio::test]
async fn posted_message_is_answered_on_the_stream() {
    let addr = serve().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/sse", addr))
        .send()
        .await
        .unwrap();
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let endpoint = next_event(&mut stream, &mut buffer, "endpoint").await;

    let post = client
        .post(format!("http://{}{}", addr, endpoint))
        .json(&json!({ "jsonrpc": "2.0", "method": "tools/list", "params": {}, "id": 11 }))
        .send()
        .await
        .unwrap();
    assert_eq!(post.status(), reqwest::StatusCode::ACCEPTED);

    let message = next_event(&mut stream, &mut buffer, "message").await;
    let envelope: Value = serde_json::from_str(&message).unwrap();
    assert_eq!(envelope["id"], 11);
    assert!(envelope["result"]["tools"].is_array());
}

#[tokio::test]
async fn unknown_session_id_is_a_404() {
    let addr = serve().await;
    let client = reqwest::Client::new();

    let post = client
        .post(format!("http://{}/message?sessionId=not-a-session", addr))
        .json(&json!({ "jsonrpc": "2.0", "method": "tools/list", "id": 1 }))
        .send()
        .await
        .unwrap();

    assert_eq!(post.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn closed_session_is_removed_from_the_registry() {
    let addr = serve().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/sse", addr))
        .send()
        .await
        .unwrap();
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let endpoint = next_event(&mut stream, &mut buffer, "endpoint").await;

    // Drop the stream, then poll until the server notices the close.
    drop(stream);
    let mut last_status = reqwest::StatusCode::ACCEPTED;
    for _ in 0..50 {
        let post = client
            .post(format!("http://{}{}", addr, endpoint))
            .json(&json!({ "jsonrpc": "2.0", "method": "tools/list", "id": 1 }))
            .send()
            .await
            .unwrap();
        last_status = post.status();
        if last_status == reqwest::StatusCode::NOT_FOUND {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(last_status, reqwest::StatusCode::NOT_FOUND);
}
