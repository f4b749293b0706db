//! SQLite-backed experience store
//!
//! Uses WAL mode so readers never block the single writer. List-valued fields
//! are stored as JSON text and timestamps as microseconds since the epoch.
//! Rows are returned in insertion (rowid) order.

use super::store::ExperienceStore;
use super::types::{Decision, DecisionRecord, Experience, ExperienceRecord};
use super::{MemoryError, Result};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{ConnectOptions, Row};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and apply the schema
    ///
    /// An unclean shutdown leaves a WAL file behind; SQLite replays it on the
    /// next open.
    pub async fn open(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening memory database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/001_memory.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_memory.sql")?;

        debug!("Memory schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoint the WAL into the main database file
    pub async fn flush_wal(&self) -> anyhow::Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        debug!("WAL flushed successfully");
        Ok(())
    }

    pub async fn close(self) -> anyhow::Result<()> {
        self.flush_wal().await?;
        self.pool.close().await;
        info!("Memory database closed");
        Ok(())
    }
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| MemoryError::Storage(format!("timestamp out of range: {}", micros)))
}

fn parse_column<T: FromStr<Err = String>>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: String| MemoryError::Storage(format!("column {}: {}", column, e)))
}

fn list_column(row: &SqliteRow, column: &str) -> Result<Vec<String>> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

fn experience_from_row(row: &SqliteRow) -> Result<Experience> {
    let resolution: Option<i64> = row.try_get("resolution_time_minutes")?;

    let record = ExperienceRecord {
        project_id: row.try_get("project_id")?,
        module: row.try_get("module")?,
        stack: row.try_get("stack")?,
        severity: parse_column(row, "severity")?,
        error_type: parse_column(row, "error_type")?,
        summary: row.try_get("summary")?,
        root_cause: row.try_get("root_cause")?,
        fix_applied: row.try_get("fix_applied")?,
        schema_version: row.try_get("schema_version")?,
        bad_snippet: row.try_get("bad_snippet")?,
        good_snippet: row.try_get("good_snippet")?,
        tags: list_column(row, "tags")?,
        affected_components: list_column(row, "affected_components")?,
        resolution_time_minutes: resolution.and_then(|m| u32::try_from(m).ok()),
        llm_comment: row.try_get("llm_comment")?,
        lesson_extracted: row.try_get("lesson_extracted")?,
    };

    Ok(Experience::restore(
        row.try_get::<String, _>("id")?,
        from_micros(row.try_get("created_at")?)?,
        record,
    ))
}

fn decision_from_row(row: &SqliteRow) -> Result<Decision> {
    let record = DecisionRecord {
        project_id: row.try_get("project_id")?,
        module: row.try_get("module")?,
        decision_type: parse_column(row, "decision_type")?,
        decision: row.try_get("decision")?,
        rationale: row.try_get("rationale")?,
        alternatives_considered: list_column(row, "alternatives_considered")?,
        impact_assessment: row.try_get("impact_assessment")?,
        made_by: row.try_get("made_by")?,
    };

    Ok(Decision::restore(
        row.try_get::<String, _>("id")?,
        from_micros(row.try_get("made_at")?)?,
        record,
    ))
}

#[async_trait]
impl ExperienceStore for SqliteStore {
    async fn append(&self, experience: Experience) -> Result<()> {
        let Experience { id, created_at, record } = experience;

        sqlx::query(
            r#"
            INSERT INTO experiences (
                id, created_at, schema_version, project_id, module, stack, severity,
                error_type, summary, root_cause, fix_applied, bad_snippet, good_snippet,
                tags, affected_components, resolution_time_minutes, llm_comment,
                lesson_extracted
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(to_micros(created_at))
        .bind(&record.schema_version)
        .bind(&record.project_id)
        .bind(&record.module)
        .bind(&record.stack)
        .bind(record.severity.as_str())
        .bind(record.error_type.as_str())
        .bind(&record.summary)
        .bind(&record.root_cause)
        .bind(&record.fix_applied)
        .bind(&record.bad_snippet)
        .bind(&record.good_snippet)
        .bind(serde_json::to_string(&record.tags)?)
        .bind(serde_json::to_string(&record.affected_components)?)
        .bind(record.resolution_time_minutes.map(i64::from))
        .bind(&record.llm_comment)
        .bind(&record.lesson_extracted)
        .execute(&self.pool)
        .await?;

        debug!("Stored experience {}", id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Experience>> {
        let rows = sqlx::query("SELECT * FROM experiences ORDER BY rowid ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(experience_from_row).collect()
    }

    async fn remove(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;
        for id in ids {
            removed += sqlx::query("DELETE FROM experiences WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        Ok(removed as usize)
    }

    async fn append_decision(&self, decision: Decision) -> Result<()> {
        let Decision { id, made_at, record } = decision;

        sqlx::query(
            r#"
            INSERT INTO decisions (
                id, made_at, project_id, module, decision_type, decision, rationale,
                alternatives_considered, impact_assessment, made_by
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(to_micros(made_at))
        .bind(&record.project_id)
        .bind(&record.module)
        .bind(record.decision_type.as_str())
        .bind(&record.decision)
        .bind(&record.rationale)
        .bind(serde_json::to_string(&record.alternatives_considered)?)
        .bind(&record.impact_assessment)
        .bind(&record.made_by)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_decisions(&self) -> Result<Vec<Decision>> {
        let rows = sqlx::query("SELECT * FROM decisions ORDER BY rowid ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decision_from_row).collect()
    }
}
