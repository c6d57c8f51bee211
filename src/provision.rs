//! Idempotent provisioning of durable resources.
//!
//! Creates the metadata table, the search index mapping (entry table plus
//! FTS5 virtual table), and the work queue's storage tables, then declares
//! the queue topology. Safe to run on every start.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::queue::{QueueTopology, WorkQueue};

/// Creates every table the SQLite collaborators need, if absent.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Metadata store
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            content_type TEXT NOT NULL,
            file_type TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            tenant_id TEXT NOT NULL,
            status TEXT NOT NULL,
            uploaded_at INTEGER NOT NULL,
            indexed_at INTEGER,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Search index: stored fields
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            content_type TEXT NOT NULL,
            file_type TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            tenant_id TEXT NOT NULL,
            content TEXT NOT NULL,
            status TEXT NOT NULL,
            uploaded_at INTEGER NOT NULL,
            indexed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Search index: analyzed fields. FTS5 has no IF NOT EXISTS.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='index_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE index_fts USING fts5(
                entry_id UNINDEXED,
                file_name,
                content,
                tokenize = 'unicode61'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Work queue
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_exchanges (
            name TEXT PRIMARY KEY,
            kind TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_queues (
            name TEXT PRIMARY KEY,
            max_deliveries INTEGER NOT NULL,
            visibility_timeout_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_bindings (
            exchange TEXT NOT NULL,
            routing_key TEXT NOT NULL,
            queue TEXT NOT NULL,
            PRIMARY KEY (exchange, routing_key, queue)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            queue TEXT NOT NULL,
            payload TEXT NOT NULL,
            state TEXT NOT NULL,
            deliveries INTEGER NOT NULL DEFAULT 0,
            visible_at INTEGER NOT NULL,
            enqueued_at INTEGER NOT NULL,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_index_entries_tenant ON index_entries(tenant_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue_messages_ready ON queue_messages(queue, state, visible_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Declares the exchange, queue, and binding the pipeline publishes
/// through. Must complete before any consumer starts.
pub async fn declare_topology(queue: &dyn WorkQueue, topology: &QueueTopology) -> Result<()> {
    queue.declare(topology).await.with_context(|| {
        format!(
            "Failed to declare queue topology {} -[{}]-> {}",
            topology.exchange, topology.routing_key, topology.queue
        )
    })?;
    tracing::debug!(
        exchange = %topology.exchange,
        queue = %topology.queue,
        routing_key = %topology.routing_key,
        "queue topology declared"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn create_schema_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        create_schema(&pool).await.unwrap();

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        for expected in [
            "documents",
            "index_entries",
            "index_fts",
            "queue_bindings",
            "queue_messages",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {}", expected);
        }
    }
}
