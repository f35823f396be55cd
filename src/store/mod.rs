/// SQLite-backed entity store
///
/// Durable key/value storage for named entity kinds (workflows, queues,
/// schedules, app auth, users, statistics) with a dedicated table for
/// workflow executions so started_at range queries stay indexable.
/// All entities are stored as JSON bodies; typed access goes through
/// the repositories in workflow::storage.

use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::Path;

/// Entity store backed by a single SQLite database
///
/// Cheap to clone: wraps a connection pool. The generic entities table is
/// keyed by (kind, id); execution rows carry workflow_id and started_at
/// columns for the ordered history and cleanup queries.
#[derive(Debug, Clone)]
pub struct Datastore {
    /// SQLite connection pool
    pool: SqlitePool,
}

impl Datastore {
    /// Open (or create) the store under the given data directory
    pub async fn connect(data_dir: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir, e))?;
        let db_path = Path::new(data_dir).join("conflux.db");

        tracing::info!("🗄️ Opening entity store: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store (used by tests)
    ///
    /// A single long-lived connection keeps the in-memory database alive
    /// for the whole pool lifetime.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Initialize the store schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                body JSON NOT NULL,
                PRIMARY KEY (kind, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                body JSON NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for the per-workflow history query (started_at desc)
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_executions_workflow_started
            ON workflow_executions(workflow_id, started_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a single entity body by kind and id
    pub async fn get(&self, kind: &str, id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT body FROM entities WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get("body")))
    }

    /// Store (or replace) an entity body
    pub async fn put(&self, kind: &str, id: &str, body: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entities (kind, id, body)
            VALUES (?, ?, ?)
            ON CONFLICT(kind, id) DO UPDATE SET body = excluded.body
            "#,
        )
        .bind(kind)
        .bind(id)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete an entity; returns whether a row was removed
    pub async fn delete(&self, kind: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entities WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List all entity bodies of a kind
    pub async fn list(&self, kind: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT body FROM entities WHERE kind = ? ORDER BY id")
            .bind(kind)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("body")).collect())
    }

    /// Store (or replace) a workflow execution row
    pub async fn put_execution(
        &self,
        id: &str,
        workflow_id: &str,
        started_at: i64,
        body: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions (id, workflow_id, started_at, body)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                workflow_id = excluded.workflow_id,
                started_at = excluded.started_at,
                body = excluded.body
            "#,
        )
        .bind(id)
        .bind(workflow_id)
        .bind(started_at)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a workflow execution body by execution id
    pub async fn get_execution(&self, id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT body FROM workflow_executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get("body")))
    }

    /// Execution history for a workflow, most recently started first
    pub async fn executions_for_workflow(
        &self,
        workflow_id: &str,
        limit: i64,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM workflow_executions
            WHERE workflow_id = ?
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(workflow_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("body")).collect())
    }

    /// Remove executions started before the cutoff; returns how many were removed
    pub async fn delete_executions_before(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM workflow_executions WHERE started_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
