// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Intercepted generation pipeline
//!
//! Calls to the configured generation tool do not pass straight through
//! to the backend. The gateway gives the tool a private scratch
//! workspace, archives whatever the tool produced, uploads the caller's
//! original arguments and the archive to durable storage, and records
//! the run in the local database. The scratch workspace is removed
//! exactly once per run regardless of outcome, and a cleanup failure
//! never replaces the error the caller is owed.

use crate::state::AppState;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tar::Builder;
use tokio::io::BufReader;
use toolgate_pool::{AuthContext, DispatchError, SCOPE_TOOLS};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Storage keys for one generation, derived from the principal and the
/// generation id and nothing else
pub fn derive_keys(principal_id: &str, generation_id: &str) -> (String, String) {
    (
        format!("{}/{}/spec.json", principal_id, generation_id),
        format!("{}/{}/project.tar.gz", principal_id, generation_id),
    )
}

/// Run the generation pipeline for one tool call
#[instrument(skip(state, ctx, params), fields(principal = %ctx.principal_id))]
pub async fn run(
    state: &AppState,
    ctx: &AuthContext,
    params: Value,
) -> Result<Value, DispatchError> {
    // Same policy gate the pool applies, checked before any side effects
    // so a rejected call leaves no row and no workspace behind.
    if !state.config.pool.allow_tool_calls {
        return Err(DispatchError::Forbidden(
            "tool calls are disabled on this server".to_string(),
        ));
    }
    if !ctx.has_scope(SCOPE_TOOLS) {
        return Err(DispatchError::Unauthorized(format!(
            "missing required scope '{}'",
            SCOPE_TOOLS
        )));
    }

    let generation_id = Uuid::new_v4().to_string();
    let (spec_key, zip_key) = derive_keys(&ctx.principal_id, &generation_id);
    let workspace = state.config.generation.workspace_root.join(&generation_id);

    info!(generation_id = %generation_id, "starting generation");

    state
        .db
        .insert_generation(&generation_id, &ctx.principal_id, &spec_key, &zip_key)
        .map_err(|e| DispatchError::Backend(format!("failed to record generation: {}", e)))?;

    let started = Instant::now();
    let outcome = execute(state, ctx, &generation_id, &spec_key, &zip_key, &workspace, &params).await;

    // The terminal row update happens after everything fallible,
    // presigning included, so the recorded status always matches the
    // answer the caller receives.
    match &outcome {
        Ok(completed) => {
            if let Err(e) = state.db.mark_generation_success(&generation_id, completed.duration_ms)
            {
                error!(generation_id = %generation_id, error = %e, "failed to record success");
            }
        }
        Err(err) => {
            let elapsed_ms = started.elapsed().as_millis() as i64;
            if let Err(e) =
                state.db.mark_generation_error(&generation_id, elapsed_ms, &err.to_string())
            {
                error!(generation_id = %generation_id, error = %e, "failed to record error");
            }
        }
    }

    // Exactly one cleanup per generation; failures are logged, never
    // allowed to mask the call's outcome.
    cleanup_workspace(&workspace, &staged_archive_path(state, &generation_id)).await;

    let completed = outcome?;

    info!(generation_id = %generation_id, duration_ms = completed.duration_ms, "generation succeeded");

    Ok(json!({
        "generationId": generation_id,
        "status": "success",
        "durationMs": completed.duration_ms,
        "specUrl": completed.spec_url,
        "archiveUrl": completed.archive_url,
    }))
}

/// What a run that made it all the way through hands back to the caller
struct Completed {
    duration_ms: i64,
    spec_url: String,
    archive_url: String,
}

/// Steps that may fail and turn the run terminal-error: backend
/// execution, spec upload, packaging, archive upload, link minting.
async fn execute(
    state: &AppState,
    ctx: &AuthContext,
    generation_id: &str,
    spec_key: &str,
    zip_key: &str,
    workspace: &Path,
    params: &Value,
) -> Result<Completed, DispatchError> {
    tokio::fs::create_dir_all(workspace)
        .await
        .map_err(|e| DispatchError::Backend(format!("failed to create workspace: {}", e)))?;

    // The backend writes into our workspace, not wherever the caller
    // pointed it.
    let mut rewritten = params.clone();
    if let Some(arguments) = rewritten.get_mut("arguments").and_then(Value::as_object_mut) {
        arguments.insert(
            "output_dir".to_string(),
            Value::String(workspace.to_string_lossy().into_owned()),
        );
    }

    let started = Instant::now();
    state.dispatcher.dispatch(ctx, "tools/call", rewritten).await?;
    let duration_ms = started.elapsed().as_millis() as i64;

    // The caller's original arguments, untouched by the rewrite
    let original_arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
    let spec_bytes = serde_json::to_vec_pretty(&original_arguments)
        .map_err(|e| DispatchError::Backend(format!("failed to serialize spec: {}", e)))?;
    state
        .storage
        .put_object(spec_key, &spec_bytes, "application/json")
        .await
        .map_err(|e| DispatchError::Backend(format!("failed to upload spec: {}", e)))?;

    let staged = staged_archive_path(state, generation_id);
    pack_workspace(workspace, &staged).await?;

    let file = tokio::fs::File::open(&staged)
        .await
        .map_err(|e| DispatchError::Backend(format!("failed to open archive: {}", e)))?;
    let mut reader = BufReader::new(file);
    state
        .storage
        .put_stream(zip_key, &mut reader, "application/gzip")
        .await
        .map_err(|e| DispatchError::Backend(format!("failed to upload archive: {}", e)))?;

    // Both objects exist by now; mint the download links while the run
    // is still non-terminal so a minting failure lands in the error row.
    let spec_url = state
        .storage
        .presign(spec_key, state.config.generation.link_ttl)
        .await
        .map_err(|e| DispatchError::Backend(format!("failed to presign spec: {}", e)))?;
    let archive_url = state
        .storage
        .presign(zip_key, state.config.generation.link_ttl)
        .await
        .map_err(|e| DispatchError::Backend(format!("failed to presign archive: {}", e)))?;

    Ok(Completed {
        duration_ms,
        spec_url,
        archive_url,
    })
}

/// Staged archive location, a sibling of the workspace so the archive
/// never ends up inside itself
fn staged_archive_path(state: &AppState, generation_id: &str) -> PathBuf {
    state
        .config
        .generation
        .workspace_root
        .join(format!("{}.tar.gz", generation_id))
}

/// Archive the workspace into a compressed tarball at `dest_path`
async fn pack_workspace(workspace: &Path, dest_path: &Path) -> Result<(), DispatchError> {
    let workspace = workspace.to_path_buf();
    let dest_path = dest_path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = File::create(&dest_path)
            .map_err(|e| DispatchError::Backend(format!("failed to create archive file: {}", e)))?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut tar = Builder::new(encoder);

        tar.append_dir_all(".", &workspace)
            .map_err(|e| DispatchError::Backend(format!("failed to pack workspace: {}", e)))?;
        tar.finish()
            .map_err(|e| DispatchError::Backend(format!("failed to finalize archive: {}", e)))?;

        Ok(())
    })
    .await
    .map_err(|e| DispatchError::Backend(format!("archive task failed: {}", e)))?
}

/// Remove the scratch workspace and any staged archive, logging failures
async fn cleanup_workspace(workspace: &Path, staged: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(workspace).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(workspace = %workspace.display(), error = %e, "failed to remove workspace");
        }
    }
    if let Err(e) = tokio::fs::remove_file(staged).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(staged = %staged.display(), error = %e, "failed to remove staged archive");
        }
    }
}
