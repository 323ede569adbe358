//! SQLite-backed [`TaskStore`] and [`StatusStore`].
//!
//! Every queue mutation is a single SQL statement, so atomicity comes from
//! SQLite itself and any number of workers (in one process or several) can
//! share a database file:
//!
//! | Operation | Statement |
//! |-----------|-----------|
//! | save | `INSERT … ON CONFLICT(dedup_key) DO UPDATE SET priority = MAX(…) RETURNING …` |
//! | save_all | the same upsert for each task inside one transaction |
//! | take_next | `DELETE FROM tasks WHERE id = (SELECT … LIMIT 1) RETURNING …` |
//!
//! Timestamps are stored as integer microseconds since the Unix epoch so
//! that FIFO order survives rapid enqueues.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row};

use index_harness_core::store::{
    StatusFilter, StatusQuery, StatusStore, TaskFilter, TaskQuery, TaskStore,
};
use index_harness_core::{NewTask, Operation, ReportingState, Task, TaskStatus, Trackable};

use crate::config::Config;
use crate::{db, migrate};

const TASK_COLUMNS: &str = "id, dedup_key, operation, priority, payload, created_at, updated_at";
const STATUS_COLUMNS: &str = "id, operation, trackable_type, trackable_id, parent_id, state, \
                              message, error, total, current, created_at, updated_at";

/// Durable store over a SQLite connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| anyhow!("timestamp out of range: {}", micros))
}

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let operation: String = row.try_get("operation")?;
    Ok(Task {
        id: row.try_get("id")?,
        dedup_key: row.try_get("dedup_key")?,
        operation: operation.parse::<Operation>()?,
        priority: row.try_get("priority")?,
        payload: row.try_get("payload")?,
        created_at: from_micros(row.try_get("created_at")?)?,
        updated_at: from_micros(row.try_get("updated_at")?)?,
    })
}

fn status_from_row(row: &SqliteRow) -> Result<TaskStatus> {
    let operation: String = row.try_get("operation")?;
    let trackable_type: String = row.try_get("trackable_type")?;
    let state: String = row.try_get("state")?;
    let total: i64 = row.try_get("total")?;
    let current: i64 = row.try_get("current")?;
    Ok(TaskStatus {
        id: row.try_get("id")?,
        operation: operation.parse::<Operation>()?,
        trackable: Trackable::new(
            trackable_type.parse().map_err(anyhow::Error::msg)?,
            row.try_get::<String, _>("trackable_id")?,
        ),
        parent_id: row.try_get("parent_id")?,
        state: state.parse::<ReportingState>().map_err(anyhow::Error::msg)?,
        message: row.try_get("message")?,
        error: row.try_get("error")?,
        total: total.max(0) as u64,
        current: current.max(0) as u64,
        created_at: from_micros(row.try_get("created_at")?)?,
        updated_at: from_micros(row.try_get("updated_at")?)?,
    })
}

async fn upsert_task(conn: &mut SqliteConnection, task: &NewTask, now: i64) -> Result<Task> {
    let row = sqlx::query(
        r#"
        INSERT INTO tasks (dedup_key, operation, priority, payload, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(dedup_key) DO UPDATE SET
            priority = MAX(tasks.priority, excluded.priority),
            updated_at = excluded.updated_at
        RETURNING id, dedup_key, operation, priority, payload, created_at, updated_at
        "#,
    )
    .bind(&task.dedup_key)
    .bind(task.operation.as_str())
    .bind(task.priority)
    .bind(&task.payload)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("failed to save task {}", task.dedup_key))?;
    task_from_row(&row)
}

/// Append ` WHERE …` for `query` to a task select.
fn push_task_filters(qb: &mut QueryBuilder<'_, Sqlite>, query: &TaskQuery) {
    qb.push(" WHERE 1 = 1");
    for filter in &query.filters {
        match filter {
            TaskFilter::Operation(op) => {
                qb.push(" AND operation = ").push_bind(op.as_str());
            }
            TaskFilter::DedupKey(key) => {
                qb.push(" AND dedup_key = ").push_bind(key.clone());
            }
            TaskFilter::MinPriority(p) => {
                qb.push(" AND priority >= ").push_bind(*p);
            }
            TaskFilter::MaxPriority(p) => {
                qb.push(" AND priority <= ").push_bind(*p);
            }
            TaskFilter::CreatedBefore(ts) => {
                qb.push(" AND created_at < ").push_bind(to_micros(*ts));
            }
        }
    }
}

/// `SELECT id FROM tasks WHERE … ORDER BY <dequeue order> LIMIT … OFFSET …`
fn task_ids_subquery(qb: &mut QueryBuilder<'_, Sqlite>, query: &TaskQuery) {
    qb.push("SELECT id FROM tasks");
    push_task_filters(qb, query);
    qb.push(" ORDER BY priority DESC, created_at ASC, id ASC");
    qb.push(" LIMIT ").push_bind(query.limit.unwrap_or(-1));
    qb.push(" OFFSET ").push_bind(query.offset.unwrap_or(0).max(0));
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn save(&self, task: &NewTask) -> Result<Task> {
        let mut conn = self.pool.acquire().await?;
        upsert_task(&mut *conn, task, to_micros(Utc::now())).await
    }

    async fn save_all(&self, tasks: &[NewTask]) -> Result<Vec<Task>> {
        let now = to_micros(Utc::now());
        let mut tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(tasks.len());
        for task in tasks {
            saved.push(upsert_task(&mut *tx, task, now).await?);
        }
        tx.commit().await?;
        Ok(saved)
    }

    async fn take_next(&self) -> Result<Option<Task>> {
        let row = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE id = (
                SELECT id FROM tasks
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
            )
            RETURNING id, dedup_key, operation, priority, payload, created_at, updated_at
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("failed to dequeue task")?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn find(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM tasks", TASK_COLUMNS));
        push_task_filters(&mut qb, query);
        qb.push(" ORDER BY priority DESC, created_at ASC, id ASC");
        qb.push(" LIMIT ").push_bind(query.limit.unwrap_or(-1));
        qb.push(" OFFSET ").push_bind(query.offset.unwrap_or(0).max(0));
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn count(&self, query: &TaskQuery) -> Result<u64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM (");
        task_ids_subquery(&mut qb, query);
        qb.push(")");
        let n: i64 = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }

    async fn delete_by(&self, query: &TaskQuery) -> Result<u64> {
        let mut qb = QueryBuilder::new("DELETE FROM tasks WHERE id IN (");
        task_ids_subquery(&mut qb, query);
        qb.push(")");
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

fn push_status_filters(qb: &mut QueryBuilder<'_, Sqlite>, query: &StatusQuery) {
    qb.push(" WHERE 1 = 1");
    for filter in &query.filters {
        match filter {
            StatusFilter::Id(id) => {
                qb.push(" AND id = ").push_bind(id.clone());
            }
            StatusFilter::Trackable(t) => {
                qb.push(" AND trackable_type = ")
                    .push_bind(t.trackable_type.as_str())
                    .push(" AND trackable_id = ")
                    .push_bind(t.trackable_id.clone());
            }
            StatusFilter::Operation(op) => {
                qb.push(" AND operation = ").push_bind(op.as_str());
            }
            StatusFilter::Parent(id) => {
                qb.push(" AND parent_id = ").push_bind(id.clone());
            }
            StatusFilter::RootsOnly => {
                qb.push(" AND parent_id IS NULL");
            }
            StatusFilter::State(state) => {
                qb.push(" AND state = ").push_bind(state.as_str());
            }
        }
    }
}

/// `WITH RECURSIVE doomed(id) AS (…)`: matching statuses plus all descendants.
fn push_doomed_cte(qb: &mut QueryBuilder<'_, Sqlite>, query: &StatusQuery) {
    qb.push("WITH RECURSIVE doomed(id) AS (SELECT id FROM (SELECT id FROM task_status");
    push_status_filters(qb, query);
    qb.push(" ORDER BY created_at ASC LIMIT ")
        .push_bind(query.limit.unwrap_or(-1));
    qb.push(") UNION SELECT s.id FROM task_status s JOIN doomed d ON s.parent_id = d.id) ");
}

#[async_trait]
impl StatusStore for SqliteStore {
    async fn save(&self, status: &TaskStatus) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO task_status ({})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                message = excluded.message,
                error = excluded.error,
                total = excluded.total,
                current = excluded.current,
                updated_at = excluded.updated_at
            "#,
            STATUS_COLUMNS
        );
        sqlx::query(&sql)
            .bind(&status.id)
            .bind(status.operation.as_str())
            .bind(status.trackable.trackable_type.as_str())
            .bind(&status.trackable.trackable_id)
            .bind(&status.parent_id)
            .bind(status.state.as_str())
            .bind(&status.message)
            .bind(&status.error)
            .bind(i64::try_from(status.total).unwrap_or(i64::MAX))
            .bind(i64::try_from(status.current).unwrap_or(i64::MAX))
            .bind(to_micros(status.created_at))
            .bind(to_micros(status.updated_at))
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to save status {}", status.id))?;
        Ok(())
    }

    async fn find(&self, query: &StatusQuery) -> Result<Vec<TaskStatus>> {
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM task_status", STATUS_COLUMNS));
        push_status_filters(&mut qb, query);
        qb.push(" ORDER BY created_at ASC, id ASC LIMIT ")
            .push_bind(query.limit.unwrap_or(-1));
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(status_from_row).collect()
    }

    async fn delete_by(&self, query: &StatusQuery) -> Result<u64> {
        // Cascaded rows are not reported by SQLite's change counter, so the
        // subtree is counted and deleted explicitly in one transaction.
        let mut tx = self.pool.begin().await?;

        let mut count = QueryBuilder::new("");
        push_doomed_cte(&mut count, query);
        count.push("SELECT COUNT(*) FROM doomed");
        let n: i64 = count.build_query_scalar::<i64>().fetch_one(&mut *tx).await?;

        let mut delete = QueryBuilder::new("");
        push_doomed_cte(&mut delete, query);
        delete.push("DELETE FROM task_status WHERE id IN (SELECT id FROM doomed)");
        delete.build().execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(n.max(0) as u64)
    }
}
