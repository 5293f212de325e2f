// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! SQLite-backed local state for Toolgate
//!
//! The gateway records one row per generation run. The [`Database`]
//! handle owns the connection and is shared by `Arc`; components never
//! look the store up ambiently.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

pub type DbResult<T> = Result<T, Error>;

/// Database error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Generation not found: {0}")]
    GenerationNotFound(String),

    #[error("Generation {0} is already in a terminal state")]
    AlreadyTerminal(String),
}

/// Lifecycle status of a generation run
///
/// Transitions are `Running -> Success` or `Running -> Error`, exactly
/// once; terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Running,
    Success,
    Error,
}

impl GenerationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationStatus::Running => "running",
            GenerationStatus::Success => "success",
            GenerationStatus::Error => "error",
        }
    }

    fn parse(s: &str) -> DbResult<Self> {
        match s {
            "running" => Ok(GenerationStatus::Running),
            "success" => Ok(GenerationStatus::Success),
            "error" => Ok(GenerationStatus::Error),
            other => Err(Error::Sqlite(rusqlite::Error::InvalidColumnType(
                0,
                format!("unknown generation status '{}'", other),
                rusqlite::types::Type::Text,
            ))),
        }
    }
}

/// One generation run as persisted in the `generations` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: String,
    pub user_id: String,
    pub spec_key: String,
    pub zip_key: String,
    pub status: GenerationStatus,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Shared SQLite database handle
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at the given path and run migrations
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (tests and `:memory:` deployments)
    pub fn open_in_memory() -> DbResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS generations (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                spec_key    TEXT NOT NULL,
                zip_key     TEXT NOT NULL,
                status      TEXT NOT NULL,
                duration_ms INTEGER,
                error       TEXT,
                created_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_generations_user ON generations(user_id);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Liveness check used by readiness probes
    pub fn ping(&self) -> DbResult<()> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    /// Insert a new generation row with status `running`
    pub fn insert_generation(
        &self,
        id: &str,
        user_id: &str,
        spec_key: &str,
        zip_key: &str,
    ) -> DbResult<()> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        conn.execute(
            "INSERT INTO generations (id, user_id, spec_key, zip_key, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                user_id,
                spec_key,
                zip_key,
                GenerationStatus::Running.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tracing::debug!(generation_id = id, user_id, "recorded generation start");
        Ok(())
    }

    /// Transition a running generation to `success`
    pub fn mark_generation_success(&self, id: &str, duration_ms: i64) -> DbResult<()> {
        self.finish_generation(id, GenerationStatus::Success, duration_ms, None)
    }

    /// Transition a running generation to `error`, recording the failure message
    pub fn mark_generation_error(&self, id: &str, duration_ms: i64, message: &str) -> DbResult<()> {
        self.finish_generation(id, GenerationStatus::Error, duration_ms, Some(message))
    }

    fn finish_generation(
        &self,
        id: &str,
        status: GenerationStatus,
        duration_ms: i64,
        error: Option<&str>,
    ) -> DbResult<()> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        // The status guard makes the terminal transition single-shot.
        let updated = conn.execute(
            "UPDATE generations SET status = ?2, duration_ms = ?3, error = ?4
             WHERE id = ?1 AND status = 'running'",
            params![id, status.as_str(), duration_ms, error],
        )?;
        if updated == 0 {
            let exists: Option<String> = conn
                .query_row("SELECT id FROM generations WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .optional()?;
            return match exists {
                Some(_) => Err(Error::AlreadyTerminal(id.to_string())),
                None => Err(Error::GenerationNotFound(id.to_string())),
            };
        }
        Ok(())
    }

    /// Fetch a generation row by id
    pub fn get_generation(&self, id: &str) -> DbResult<GenerationRecord> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        conn.query_row(
            "SELECT id, user_id, spec_key, zip_key, status, duration_ms, error, created_at
             FROM generations WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| Error::GenerationNotFound(id.to_string()))
        .and_then(
            |(id, user_id, spec_key, zip_key, status, duration_ms, error, created_at)| {
                Ok(GenerationRecord {
                    id,
                    user_id,
                    spec_key,
                    zip_key,
                    status: GenerationStatus::parse(&status)?,
                    duration_ms,
                    error,
                    created_at: created_at
                        .parse::<DateTime<Utc>>()
                        .unwrap_or_else(|_| Utc::now()),
                })
            },
        )
    }

    /// List generations for one user, newest first
    pub fn list_generations(&self, user_id: &str) -> DbResult<Vec<GenerationRecord>> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, user_id, spec_key, zip_key, status, duration_ms, error, created_at
             FROM generations WHERE user_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, user_id, spec_key, zip_key, status, duration_ms, error, created_at) = row?;
            records.push(GenerationRecord {
                id,
                user_id,
                spec_key,
                zip_key,
                status: GenerationStatus::parse(&status)?,
                duration_ms,
                error,
                created_at: created_at.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(records)
    }
}
