use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Pending tasks. A row exists only while its task is pending.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dedup_key TEXT NOT NULL UNIQUE,
            operation TEXT NOT NULL,
            priority INTEGER NOT NULL,
            payload BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Status tree. Deleting a node removes its whole subtree.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_status (
            id TEXT PRIMARY KEY,
            operation TEXT NOT NULL,
            trackable_type TEXT NOT NULL,
            trackable_id TEXT NOT NULL,
            parent_id TEXT REFERENCES task_status(id) ON DELETE CASCADE,
            state TEXT NOT NULL,
            message TEXT NOT NULL DEFAULT '',
            error TEXT,
            total INTEGER NOT NULL DEFAULT 0,
            current INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_dequeue ON tasks(priority DESC, created_at ASC, id ASC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_operation ON tasks(operation)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_task_status_trackable ON task_status(trackable_type, trackable_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_status_parent ON task_status(parent_id)")
        .execute(pool)
        .await?;

    Ok(())
}
