//! Queue commands: `ixh operations`, `ixh enqueue`, `ixh pipeline` and
//! `ixh queue list|count|clear`.
//!
//! Payload values are given as `key=value` pairs. A value that parses as
//! JSON is stored as that JSON value (`repo_id=7` is the number 7), anything
//! else is stored as a string (`commit_sha=ab12f` is `"ab12f"`).

use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::Value;

use index_harness_core::choreography;
use index_harness_core::store::TaskQuery;
use index_harness_core::{NewTask, Operation, Payload, Task};

use crate::config::Config;
use crate::queue::QueueService;
use crate::sqlite_store::SqliteStore;

/// Build a payload from `key=value` pairs.
pub fn build_payload(pairs: &[(String, String)]) -> Payload {
    let mut payload = Payload::new();
    for (key, raw) in pairs {
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.clone()));
        payload.insert(key.clone(), value);
    }
    payload
}

fn parse_operation(name: &str) -> Result<Operation> {
    Ok(name.parse::<Operation>()?)
}

async fn open_queue(config: &Config) -> Result<(SqliteStore, QueueService)> {
    let store = SqliteStore::open(config).await?;
    let queue = QueueService::new(Arc::new(store.clone()));
    Ok((store, queue))
}

fn query_for(operation: Option<&str>) -> Result<TaskQuery> {
    let query = TaskQuery::new();
    Ok(match operation {
        Some(name) => query.operation(parse_operation(name)?),
        None => query,
    })
}

/// One line per operation: name, scope, dedup fields, and the phases of
/// composites.
pub fn describe_operations() -> Vec<String> {
    Operation::ALL
        .iter()
        .map(|op| {
            let mut line = format!(
                "{:<46} {:<11} [{}]",
                op.as_str(),
                op.trackable_type().as_str(),
                op.dedup_fields().join(", ")
            );
            if let Some(phases) = choreography::phases(*op) {
                let names: Vec<String> = phases
                    .iter()
                    .map(|p| format!("{}(+{})", p.operation, p.priority_offset))
                    .collect();
                line.push_str(&format!(" -> {}", names.join(" > ")));
            }
            line
        })
        .collect()
}

pub fn run_operations() -> Result<()> {
    println!("{:<46} {:<11} DEDUP FIELDS", "OPERATION", "SCOPE");
    for line in describe_operations() {
        println!("{}", line);
    }
    Ok(())
}

pub async fn run_enqueue(
    config: &Config,
    operation: &str,
    priority: i64,
    pairs: &[(String, String)],
    dedup_key: Option<String>,
) -> Result<()> {
    let operation = parse_operation(operation)?;
    let payload = build_payload(pairs);
    let mut task = NewTask::from_payload(operation, priority, &payload)?;
    if let Some(key) = dedup_key {
        task = task.with_dedup_key(key);
    }

    let (store, queue) = open_queue(config).await?;
    let stored = queue.enqueue(task).await?;
    println!("enqueue");
    print_task(&stored);
    store.close().await;
    Ok(())
}

pub async fn run_pipeline(
    config: &Config,
    composite: &str,
    priority: i64,
    pairs: &[(String, String)],
) -> Result<()> {
    let composite = parse_operation(composite)?;
    if !composite.is_composite() {
        bail!(
            "'{}' is not a composite operation; use `ixh enqueue` instead",
            composite
        );
    }
    let payload = build_payload(pairs);

    let (store, queue) = open_queue(config).await?;
    let stored = queue.enqueue_choreography(composite, priority, &payload).await?;
    println!("pipeline {} ({} phases)", composite, stored.len());
    for task in &stored {
        print_task(task);
    }
    store.close().await;
    Ok(())
}

pub async fn run_queue_list(
    config: &Config,
    operation: Option<&str>,
    limit: Option<i64>,
) -> Result<()> {
    let mut query = query_for(operation)?;
    if let Some(limit) = limit {
        query = query.limit(limit);
    }
    let (store, queue) = open_queue(config).await?;
    let tasks = queue.list(&query).await?;
    if tasks.is_empty() {
        println!("queue is empty");
    } else {
        println!(
            "  {:>6} {:>8} {:<46} {:<20} {}",
            "ID", "PRIORITY", "OPERATION", "CREATED", "PAYLOAD"
        );
        for task in &tasks {
            println!(
                "  {:>6} {:>8} {:<46} {:<20} {}",
                task.id,
                task.priority,
                task.operation.as_str(),
                task.created_at.format("%Y-%m-%d %H:%M:%S"),
                String::from_utf8_lossy(&task.payload)
            );
        }
    }
    store.close().await;
    Ok(())
}

pub async fn run_queue_count(config: &Config, operation: Option<&str>) -> Result<()> {
    let query = query_for(operation)?;
    let (store, queue) = open_queue(config).await?;
    println!("{}", queue.count(&query).await?);
    store.close().await;
    Ok(())
}

pub async fn run_queue_clear(config: &Config, operation: Option<&str>) -> Result<()> {
    let query = query_for(operation)?;
    let (store, queue) = open_queue(config).await?;
    let removed = queue.delete(&query).await?;
    println!("removed {} task(s)", removed);
    store.close().await;
    Ok(())
}

fn print_task(task: &Task) {
    println!(
        "  #{} {} priority={} key={}",
        task.id, task.operation, task.priority, task.dedup_key
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn payload_values_prefer_json() {
        let payload = build_payload(&pairs(&[
            ("repo_id", "7"),
            ("commit_sha", "ab12f"),
            ("force", "true"),
        ]));
        assert_eq!(payload.get_i64("repo_id"), Some(7));
        assert_eq!(payload.get_str("commit_sha"), Some("ab12f"));
        assert_eq!(payload.get("force"), Some(&Value::Bool(true)));
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let err = query_for(Some("repo.teleport")).unwrap_err();
        assert!(err.to_string().contains("repo.teleport"));
    }

    #[test]
    fn composites_list_their_phases() {
        let lines = describe_operations();
        assert_eq!(lines.len(), Operation::ALL.len());
        let create = lines
            .iter()
            .find(|l| l.starts_with("repo.create "))
            .unwrap();
        assert!(create.contains("repo.clone(+20) > repo.scan_branches(+10) > repo.scan_tags(+0)"));
        let clone = lines.iter().find(|l| l.starts_with("repo.clone ")).unwrap();
        assert!(!clone.contains("->"));
    }
}
