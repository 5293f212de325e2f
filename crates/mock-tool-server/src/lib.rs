// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Scriptable stdio tool server
//!
//! Speaks newline-delimited JSON-RPC 2.0 on stdin/stdout, the protocol
//! the Toolgate worker pool expects from its backends. Behavior is
//! driven by [`ServerOptions`] so integration tests can exercise
//! success, failure, crash, and slow-backend paths without bespoke
//! fixtures.

use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Protocol version echoed back during the handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Behavior switches for the mock server
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Tools whose invocation returns a JSON-RPC error envelope
    pub fail_tools: Vec<String>,

    /// Exit the process (status 1) upon receiving this method
    pub exit_on_method: Option<String>,

    /// Artificial delay before every reply
    pub delay: Option<Duration>,
}

/// Run the server loop over arbitrary streams until EOF
pub async fn serve<R, W>(reader: R, mut writer: W, options: ServerOptions) -> anyhow::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let frame: Value = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("ignoring undecodable frame: {}", err);
                continue;
            }
        };

        let method = frame.get("method").and_then(Value::as_str).unwrap_or_default().to_string();
        if options.exit_on_method.as_deref() == Some(method.as_str()) {
            std::process::exit(1);
        }
        if let Some(delay) = options.delay {
            tokio::time::sleep(delay).await;
        }

        let id = frame.get("id").cloned();
        let Some(id) = id else {
            // Notification; nothing to answer.
            debug!(method, "notification received");
            continue;
        };

        let reply = handle_request(&method, frame.get("params"), &options);
        let envelope = match reply {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": message },
            }),
        };

        let mut out = serde_json::to_vec(&envelope)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }

    Ok(())
}

fn handle_request(
    method: &str,
    params: Option<&Value>,
    options: &ServerOptions,
) -> Result<Value, (i64, String)> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": { "name": "mock-tool-server", "version": env!("CARGO_PKG_VERSION") },
            "capabilities": { "tools": {} },
        })),
        "tools/list" => Ok(json!({
            "tools": [
                {
                    "name": "echo",
                    "description": "Echo a message back to the caller",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "message": { "type": "string" } },
                    },
                },
                {
                    "name": "generate_project",
                    "description": "Generate a project skeleton into output_dir",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "spec": { "type": "string" },
                            "output_dir": { "type": "string" },
                        },
                        "required": ["spec", "output_dir"],
                    },
                },
            ],
        })),
        "tools/call" => {
            let name = params
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
                .ok_or((-32602, "missing tool name".to_string()))?;
            if options.fail_tools.iter().any(|t| t == name) {
                return Err((-32000, format!("tool '{}' failed as scripted", name)));
            }
            let arguments = params.and_then(|p| p.get("arguments")).cloned().unwrap_or(json!({}));
            call_tool(name, &arguments)
        }
        _ => Err((-32601, format!("method '{}' not found", method))),
    }
}

fn call_tool(name: &str, arguments: &Value) -> Result<Value, (i64, String)> {
    match name {
        "echo" => {
            let message = arguments.get("message").and_then(Value::as_str).unwrap_or("");
            Ok(text_content(message))
        }
        "generate_project" => {
            let output_dir = arguments
                .get("output_dir")
                .and_then(Value::as_str)
                .ok_or((-32602, "generate_project requires output_dir".to_string()))?;
            let spec = arguments.get("spec").and_then(Value::as_str).unwrap_or("");
            generate_project(Path::new(output_dir), spec)
                .map_err(|err| (-32000, format!("generation failed: {}", err)))?;
            Ok(text_content(&format!(
                "generated project at {} ({} bytes of spec)",
                output_dir,
                spec.len()
            )))
        }
        other => Err((-32602, format!("unknown tool '{}'", other))),
    }
}

/// Write a small deterministic project tree
fn generate_project(output_dir: &Path, spec: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(output_dir.join("src"))?;
    std::fs::write(
        output_dir.join("README.md"),
        format!("# Generated project\n\nSpec excerpt:\n{}\n", spec),
    )?;
    std::fs::write(
        output_dir.join("src").join("main.rs"),
        "fn main() { println!(\"generated\"); }\n",
    )?;
    Ok(())
}

fn text_content(text: &str) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_reports_tool_capability() {
        let result = handle_request("initialize", None, &ServerOptions::default()).unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[test]
    fn echo_round_trips_message() {
        let result = call_tool("echo", &json!({ "message": "hi" })).unwrap();
        assert_eq!(result["content"][0]["text"], "hi");
    }

    #[test]
    fn scripted_failures_return_rpc_errors() {
        let options = ServerOptions {
            fail_tools: vec!["echo".into()],
            ..Default::default()
        };
        let err = handle_request(
            "tools/call",
            Some(&json!({ "name": "echo", "arguments": {} })),
            &options,
        )
        .unwrap_err();
        assert_eq!(err.0, -32000);
    }

    #[test]
    fn unknown_methods_are_rejected() {
        let err = handle_request("resources/list", None, &ServerOptions::default()).unwrap_err();
        assert_eq!(err.0, -32601);
    }

    #[test]
    fn generate_project_writes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("proj");
        call_tool(
            "generate_project",
            &json!({
                "spec": "a tiny app",
                "output_dir": out.to_str().unwrap(),
            }),
        )
        .unwrap();

        assert!(out.join("README.md").exists());
        assert!(out.join("src/main.rs").exists());
    }
}
