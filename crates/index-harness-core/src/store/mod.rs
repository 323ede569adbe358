//! Storage abstraction for the task queue and task statuses.
//!
//! The [`TaskStore`] and [`StatusStore`] traits are the persistence
//! contract the scheduler consumes. Listing, counting, and administrative
//! deletion all go through composable filter queries ([`TaskQuery`],
//! [`StatusQuery`]) instead of bespoke methods, which keeps each store's
//! public surface small.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Atomicity
//!
//! | Method | Guarantee |
//! |--------|-----------|
//! | [`TaskStore::save`] | Upsert by dedup key in one step: insert, or raise priority to `max(existing, incoming)` keeping `created_at` |
//! | [`TaskStore::save_all`] | All tasks are saved or none are |
//! | [`TaskStore::take_next`] | Select-and-remove of the head row in one step; concurrent callers never receive the same task |
//! | [`StatusStore::delete_by`] | Matching statuses and all their descendants go together |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::operation::Operation;
use crate::status::{ReportingState, TaskStatus, Trackable};
use crate::task::{NewTask, Task};

/// A single task filter. Filters in a [`TaskQuery`] are AND-ed.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskFilter {
    Operation(Operation),
    DedupKey(String),
    MinPriority(i64),
    MaxPriority(i64),
    CreatedBefore(DateTime<Utc>),
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            TaskFilter::Operation(op) => task.operation == *op,
            TaskFilter::DedupKey(key) => task.dedup_key == *key,
            TaskFilter::MinPriority(p) => task.priority >= *p,
            TaskFilter::MaxPriority(p) => task.priority <= *p,
            TaskFilter::CreatedBefore(ts) => task.created_at < *ts,
        }
    }
}

/// Composable query over pending tasks. Results come back in dequeue order.
///
/// ```rust
/// use index_harness_core::store::TaskQuery;
/// use index_harness_core::Operation;
///
/// let q = TaskQuery::new()
///     .operation(Operation::RepositoryClone)
///     .min_priority(100)
///     .limit(10);
/// assert_eq!(q.filters.len(), 2);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskQuery {
    pub filters: Vec<TaskFilter>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TaskQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: TaskFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn operation(self, operation: Operation) -> Self {
        self.filter(TaskFilter::Operation(operation))
    }

    pub fn dedup_key(self, key: impl Into<String>) -> Self {
        self.filter(TaskFilter::DedupKey(key.into()))
    }

    pub fn min_priority(self, priority: i64) -> Self {
        self.filter(TaskFilter::MinPriority(priority))
    }

    pub fn max_priority(self, priority: i64) -> Self {
        self.filter(TaskFilter::MaxPriority(priority))
    }

    pub fn created_before(self, ts: DateTime<Utc>) -> Self {
        self.filter(TaskFilter::CreatedBefore(ts))
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.filters.iter().all(|f| f.matches(task))
    }
}

/// A single status filter. Filters in a [`StatusQuery`] are AND-ed.
#[derive(Clone, Debug, PartialEq)]
pub enum StatusFilter {
    Id(String),
    Trackable(Trackable),
    Operation(Operation),
    Parent(String),
    RootsOnly,
    State(ReportingState),
}

impl StatusFilter {
    pub fn matches(&self, status: &TaskStatus) -> bool {
        match self {
            StatusFilter::Id(id) => status.id == *id,
            StatusFilter::Trackable(t) => status.trackable == *t,
            StatusFilter::Operation(op) => status.operation == *op,
            StatusFilter::Parent(id) => status.parent_id.as_deref() == Some(id.as_str()),
            StatusFilter::RootsOnly => status.parent_id.is_none(),
            StatusFilter::State(st) => status.state == *st,
        }
    }
}

/// Composable query over task statuses. Results come back oldest first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatusQuery {
    pub filters: Vec<StatusFilter>,
    pub limit: Option<i64>,
}

impl StatusQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: StatusFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn id(self, id: impl Into<String>) -> Self {
        self.filter(StatusFilter::Id(id.into()))
    }

    pub fn trackable(self, trackable: Trackable) -> Self {
        self.filter(StatusFilter::Trackable(trackable))
    }

    pub fn operation(self, operation: Operation) -> Self {
        self.filter(StatusFilter::Operation(operation))
    }

    pub fn parent(self, parent_id: impl Into<String>) -> Self {
        self.filter(StatusFilter::Parent(parent_id.into()))
    }

    pub fn roots_only(self) -> Self {
        self.filter(StatusFilter::RootsOnly)
    }

    pub fn state(self, state: ReportingState) -> Self {
        self.filter(StatusFilter::State(state))
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, status: &TaskStatus) -> bool {
        self.filters.iter().all(|f| f.matches(status))
    }
}

/// Durable storage for pending tasks.
///
/// A task's presence in the store *is* its pending state; once taken it has
/// no further representation here.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a task, or merge it into the pending row with the same dedup key.
    ///
    /// Returns the resulting stored row.
    async fn save(&self, task: &NewTask) -> Result<Task>;

    /// Save several tasks atomically.
    async fn save_all(&self, tasks: &[NewTask]) -> Result<Vec<Task>>;

    /// Atomically remove and return the highest-priority pending task.
    async fn take_next(&self) -> Result<Option<Task>>;

    /// Pending tasks matching `query`, in dequeue order.
    async fn find(&self, query: &TaskQuery) -> Result<Vec<Task>>;

    async fn find_one(&self, query: &TaskQuery) -> Result<Option<Task>> {
        let mut first = query.clone();
        first.limit = Some(1);
        Ok(self.find(&first).await?.into_iter().next())
    }

    async fn count(&self, query: &TaskQuery) -> Result<u64>;

    /// Delete matching pending tasks, returning how many were removed.
    async fn delete_by(&self, query: &TaskQuery) -> Result<u64>;
}

/// Storage for task statuses.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert or overwrite a status by id.
    async fn save(&self, status: &TaskStatus) -> Result<()>;

    async fn find(&self, query: &StatusQuery) -> Result<Vec<TaskStatus>>;

    async fn find_one(&self, query: &StatusQuery) -> Result<Option<TaskStatus>> {
        let mut first = query.clone();
        first.limit = Some(1);
        Ok(self.find(&first).await?.into_iter().next())
    }

    /// Delete matching statuses and every descendant of them.
    async fn delete_by(&self, query: &StatusQuery) -> Result<u64>;
}

/// Apply `limit`/`offset` the way SQL does (negative limit means none).
pub(crate) fn paginate<T>(items: Vec<T>, limit: Option<i64>, offset: Option<i64>) -> Vec<T> {
    let skip = offset.unwrap_or(0).max(0) as usize;
    let iter = items.into_iter().skip(skip);
    match limit {
        Some(n) if n >= 0 => iter.take(n as usize).collect(),
        _ => iter.collect(),
    }
}
