//! Queue and status overview.
//!
//! Provides a quick summary of the database: pending tasks per operation
//! with their priority range and age, and recorded statuses per state. Used
//! by `ixh stats` to check that work is flowing.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Pending tasks of one operation.
struct OperationStats {
    operation: String,
    pending: i64,
    min_priority: i64,
    max_priority: i64,
    oldest: Option<DateTime<Utc>>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let pool = store.pool();

    let total_pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
        .fetch_one(pool)
        .await?;

    let total_statuses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_status")
        .fetch_one(pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Index Harness — Queue Stats");
    println!("===========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Pending:     {}", total_pending);
    println!("  Statuses:    {}", total_statuses);

    let op_rows = sqlx::query(
        r#"
        SELECT
            operation,
            COUNT(*) AS pending,
            MIN(priority) AS min_priority,
            MAX(priority) AS max_priority,
            MIN(created_at) AS oldest
        FROM tasks
        GROUP BY operation
        ORDER BY max_priority DESC, operation ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let op_stats: Vec<OperationStats> = op_rows
        .iter()
        .map(|row| OperationStats {
            operation: row.get("operation"),
            pending: row.get("pending"),
            min_priority: row.get("min_priority"),
            max_priority: row.get("max_priority"),
            oldest: row
                .get::<Option<i64>, _>("oldest")
                .and_then(DateTime::from_timestamp_micros),
        })
        .collect();

    let now = Utc::now();
    if !op_stats.is_empty() {
        println!();
        println!("  By operation:");
        println!(
            "  {:<46} {:>7} {:>15}   {}",
            "OPERATION", "PENDING", "PRIORITY", "OLDEST"
        );
        println!("  {}", "-".repeat(86));

        for s in &op_stats {
            let range = if s.min_priority == s.max_priority {
                s.max_priority.to_string()
            } else {
                format!("{}..{}", s.min_priority, s.max_priority)
            };
            let age = match s.oldest {
                Some(ts) => format_ts_relative(ts, now),
                None => "unknown".to_string(),
            };
            println!(
                "  {:<46} {:>7} {:>15}   {}",
                s.operation, s.pending, range, age
            );
        }
    }

    let state_rows = sqlx::query(
        "SELECT state, COUNT(*) AS n, MAX(updated_at) AS last FROM task_status GROUP BY state ORDER BY state",
    )
    .fetch_all(pool)
    .await?;

    if !state_rows.is_empty() {
        println!();
        println!("  By state:");
        for row in &state_rows {
            let state: String = row.get("state");
            let n: i64 = row.get("n");
            let last = row
                .get::<Option<i64>, _>("last")
                .and_then(DateTime::from_timestamp_micros)
                .map(|ts| format_ts_relative(ts, now))
                .unwrap_or_default();
            println!("  {:<14} {:>7}   last {}", state, n, last);
        }
    }

    println!();

    store.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format `ts` relative to `now` (e.g. "3 hours ago").
fn format_ts_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn bytes_scale() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn relative_times() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(format_ts_relative(now - Duration::seconds(5), now), "just now");
        assert_eq!(format_ts_relative(now - Duration::minutes(1), now), "1 min ago");
        assert_eq!(format_ts_relative(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(format_ts_relative(now - Duration::days(2), now), "2 days ago");
        assert_eq!(
            format_ts_relative(now - Duration::days(40), now),
            "2026-01-20 12:00"
        );
        assert_eq!(
            format_ts_relative(now + Duration::minutes(5), now),
            "2026-03-01 12:05"
        );
    }
}
