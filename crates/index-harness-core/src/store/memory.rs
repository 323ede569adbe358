//! In-memory [`TaskStore`] and [`StatusStore`] for tests and embedded use.
//!
//! Each atomic operation holds a single `std::sync::Mutex` for its whole
//! duration, which gives the same guarantees as the SQL statements of the
//! durable store. Nothing survives the process.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::status::TaskStatus;
use crate::task::{NewTask, Task};

use super::{paginate, StatusQuery, StatusStore, TaskQuery, TaskStore};

#[derive(Default)]
struct Queue {
    next_id: i64,
    tasks: BTreeMap<i64, Task>,
    by_dedup: HashMap<String, i64>,
}

impl Queue {
    fn upsert(&mut self, new: &NewTask) -> Task {
        let now = Utc::now();
        if let Some(id) = self.by_dedup.get(&new.dedup_key) {
            if let Some(existing) = self.tasks.get_mut(id) {
                existing.priority = existing.priority.max(new.priority);
                existing.updated_at = now;
                return existing.clone();
            }
        }
        self.next_id += 1;
        let task = Task {
            id: self.next_id,
            dedup_key: new.dedup_key.clone(),
            operation: new.operation,
            priority: new.priority,
            payload: new.payload.clone(),
            created_at: now,
            updated_at: now,
        };
        self.by_dedup.insert(task.dedup_key.clone(), task.id);
        self.tasks.insert(task.id, task.clone());
        task
    }

    fn remove(&mut self, id: i64) -> Option<Task> {
        let task = self.tasks.remove(&id)?;
        self.by_dedup.remove(&task.dedup_key);
        Some(task)
    }

    fn ordered(&self, query: &TaskQuery) -> Vec<Task> {
        let mut matching: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.dequeue_order(b));
        paginate(matching, query.limit, query.offset)
    }
}

/// In-memory store for tests and embedded environments.
pub struct InMemoryStore {
    queue: Mutex<Queue>,
    statuses: Mutex<Vec<TaskStatus>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            statuses: Mutex::new(Vec::new()),
        }
    }

    fn queue(&self) -> Result<MutexGuard<'_, Queue>> {
        self.queue
            .lock()
            .map_err(|_| anyhow!("in-memory task queue lock poisoned"))
    }

    fn statuses(&self) -> Result<MutexGuard<'_, Vec<TaskStatus>>> {
        self.statuses
            .lock()
            .map_err(|_| anyhow!("in-memory status lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn save(&self, task: &NewTask) -> Result<Task> {
        Ok(self.queue()?.upsert(task))
    }

    async fn save_all(&self, tasks: &[NewTask]) -> Result<Vec<Task>> {
        let mut queue = self.queue()?;
        Ok(tasks.iter().map(|t| queue.upsert(t)).collect())
    }

    async fn take_next(&self) -> Result<Option<Task>> {
        let mut queue = self.queue()?;
        let head = queue
            .tasks
            .values()
            .min_by(|a, b| a.dequeue_order(b))
            .map(|t| t.id);
        Ok(head.and_then(|id| queue.remove(id)))
    }

    async fn find(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        Ok(self.queue()?.ordered(query))
    }

    async fn count(&self, query: &TaskQuery) -> Result<u64> {
        Ok(self.queue()?.ordered(query).len() as u64)
    }

    async fn delete_by(&self, query: &TaskQuery) -> Result<u64> {
        let mut queue = self.queue()?;
        let ids: Vec<i64> = queue.ordered(query).iter().map(|t| t.id).collect();
        let removed = ids.into_iter().filter_map(|id| queue.remove(id)).count();
        Ok(removed as u64)
    }
}

#[async_trait]
impl StatusStore for InMemoryStore {
    async fn save(&self, status: &TaskStatus) -> Result<()> {
        let mut statuses = self.statuses()?;
        match statuses.iter_mut().find(|s| s.id == status.id) {
            Some(existing) => *existing = status.clone(),
            None => statuses.push(status.clone()),
        }
        Ok(())
    }

    async fn find(&self, query: &StatusQuery) -> Result<Vec<TaskStatus>> {
        let statuses = self.statuses()?;
        let mut matching: Vec<TaskStatus> = statuses
            .iter()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(paginate(matching, query.limit, None))
    }

    async fn delete_by(&self, query: &StatusQuery) -> Result<u64> {
        let mut statuses = self.statuses()?;
        let mut doomed: HashSet<String> = statuses
            .iter()
            .filter(|s| query.matches(s))
            .map(|s| s.id.clone())
            .collect();
        // Sweep descendants until the set stops growing.
        loop {
            let before = doomed.len();
            for s in statuses.iter() {
                if let Some(parent) = &s.parent_id {
                    if doomed.contains(parent) {
                        doomed.insert(s.id.clone());
                    }
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        let before = statuses.len();
        statuses.retain(|s| !doomed.contains(&s.id));
        Ok((before - statuses.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use crate::status::Trackable;
    use crate::store::StatusQuery;
    use serde_json::json;

    fn task(op: Operation, priority: i64, repo_id: i64) -> NewTask {
        NewTask::new(op, priority, &json!({ "repo_id": repo_id })).unwrap()
    }

    #[tokio::test]
    async fn duplicate_save_raises_priority_and_keeps_created_at() {
        let store = InMemoryStore::new();
        let first = TaskStore::save(&store, &task(Operation::RepositoryClone, 10, 1)).await.unwrap();
        let second = TaskStore::save(&store, &task(Operation::RepositoryClone, 50, 1)).await.unwrap();
        let third = TaskStore::save(&store, &task(Operation::RepositoryClone, 20, 1)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.priority, 50);
        assert_eq!(third.priority, 50, "priority is never lowered");
        assert_eq!(third.created_at, first.created_at);
        assert_eq!(store.count(&TaskQuery::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn take_next_follows_priority_then_fifo() {
        let store = InMemoryStore::new();
        for (priority, repo) in [(10, 1), (50, 2), (30, 3), (50, 4)] {
            TaskStore::save(&store, &task(Operation::RepositoryClone, priority, repo)).await.unwrap();
        }
        let mut order = Vec::new();
        while let Some(t) = store.take_next().await.unwrap() {
            order.push(t.payload().unwrap().get_i64("repo_id").unwrap());
        }
        assert_eq!(order, vec![2, 4, 3, 1]);
    }

    #[tokio::test]
    async fn taken_task_frees_its_dedup_key() {
        let store = InMemoryStore::new();
        let first = TaskStore::save(&store, &task(Operation::RepositoryClone, 10, 1)).await.unwrap();
        store.take_next().await.unwrap();
        let again = TaskStore::save(&store, &task(Operation::RepositoryClone, 10, 1)).await.unwrap();
        assert_ne!(first.id, again.id);
    }

    #[tokio::test]
    async fn queries_filter_and_paginate() {
        let store = InMemoryStore::new();
        for repo in 1..=5 {
            TaskStore::save(&store, &task(Operation::RepositoryClone, repo * 10, repo)).await.unwrap();
        }
        TaskStore::save(&store, &task(Operation::RepositoryPull, 99, 1)).await.unwrap();

        let clones = TaskQuery::new().operation(Operation::RepositoryClone);
        assert_eq!(store.count(&clones).await.unwrap(), 5);

        let page = TaskStore::find(&store, &clones.clone().min_priority(20).limit(2).offset(1))
            .await
            .unwrap();
        let priorities: Vec<i64> = page.iter().map(|t| t.priority).collect();
        assert_eq!(priorities, vec![40, 30]);

        let head = TaskStore::find_one(&store, &TaskQuery::new()).await.unwrap().unwrap();
        assert_eq!(head.operation, Operation::RepositoryPull);

        assert_eq!(TaskStore::delete_by(&store, &clones.max_priority(20)).await.unwrap(), 2);
        assert_eq!(store.count(&TaskQuery::new()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn status_delete_cascades_to_descendants() {
        let store = InMemoryStore::new();
        let root = TaskStatus::started(Operation::RepositoryCreate, Trackable::repository(1), None);
        let child = TaskStatus::started(
            Operation::RepositoryClone,
            Trackable::repository(1),
            Some(root.id.clone()),
        );
        let grandchild = TaskStatus::started(
            Operation::CommitScan,
            Trackable::commit("abc"),
            Some(child.id.clone()),
        );
        let unrelated = TaskStatus::started(Operation::RepositoryClone, Trackable::repository(2), None);
        for s in [&root, &child, &grandchild, &unrelated] {
            StatusStore::save(&store, s).await.unwrap();
        }

        let removed = StatusStore::delete_by(&store, &StatusQuery::new().id(root.id.clone()))
            .await
            .unwrap();
        assert_eq!(removed, 3);
        let left = StatusStore::find(&store, &StatusQuery::new()).await.unwrap();
        assert_eq!(left, vec![unrelated]);
    }

    #[tokio::test]
    async fn status_save_overwrites_by_id() {
        let store = InMemoryStore::new();
        let mut s = TaskStatus::started(Operation::RepositoryClone, Trackable::repository(1), None);
        StatusStore::save(&store, &s).await.unwrap();
        s.complete().unwrap();
        StatusStore::save(&store, &s).await.unwrap();
        let found = StatusStore::find(&store, &StatusQuery::new().trackable(Trackable::repository(1)))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].is_terminal());
    }
}
