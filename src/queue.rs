//! Queue service: the enqueue/dequeue API over a [`TaskStore`].
//!
//! # Ordering
//!
//! Dequeue order is flat and total: `(priority DESC, created_at ASC)` over
//! every pending task. Multi-phase pipelines rely on the choreography
//! offsets for phase order, which also means an unrelated task with a
//! higher priority can run between two phases of a pipeline.
//!
//! # Deduplication
//!
//! Enqueuing a task whose dedup key is already pending never adds a second
//! row. The pending row's priority is raised to the larger of the two and
//! its `created_at` is kept, so a late urgent request promotes the queued
//! one without losing its place among equals.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use index_harness_core::choreography;
use index_harness_core::store::{TaskQuery, TaskStore};
use index_harness_core::{NewTask, Operation, Payload, Task};

use crate::error::QueueError;

/// Cheaply cloneable handle to the task queue.
#[derive(Clone)]
pub struct QueueService {
    store: Arc<dyn TaskStore>,
}

impl QueueService {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Insert `task`, or merge it into the pending task with the same dedup key.
    pub async fn enqueue(&self, task: NewTask) -> Result<Task, QueueError> {
        let stored = self.store.save(&task).await.map_err(QueueError::Store)?;
        if stored.priority != task.priority || stored.created_at != stored.updated_at {
            debug!(
                operation = %stored.operation,
                dedup_key = %stored.dedup_key,
                priority = stored.priority,
                "merged into pending task"
            );
        } else {
            debug!(
                operation = %stored.operation,
                id = stored.id,
                priority = stored.priority,
                "enqueued task"
            );
        }
        Ok(stored)
    }

    /// Build a task from any serializable payload and enqueue it.
    pub async fn enqueue_operation<T: Serialize>(
        &self,
        operation: Operation,
        priority: i64,
        payload: &T,
    ) -> Result<Task, QueueError> {
        self.enqueue(NewTask::new(operation, priority, payload)?).await
    }

    /// Expand a composite operation and enqueue all of its phases atomically.
    ///
    /// Phase `i` gets `base_priority + offset_i`. Returns the stored tasks in
    /// phase order.
    pub async fn enqueue_choreography<T: Serialize>(
        &self,
        composite: Operation,
        base_priority: i64,
        payload: &T,
    ) -> Result<Vec<Task>, QueueError> {
        let phases = choreography::expand(composite, base_priority)
            .ok_or(QueueError::NotComposite(composite))?;
        let payload = Payload::from_serializable(composite, payload)?;
        let tasks = phases
            .into_iter()
            .map(|(operation, priority)| NewTask::from_payload(operation, priority, &payload))
            .collect::<Result<Vec<_>, _>>()?;

        let stored = self.store.save_all(&tasks).await.map_err(QueueError::Store)?;
        info!(
            composite = %composite,
            phases = stored.len(),
            base_priority,
            "enqueued pipeline"
        );
        Ok(stored)
    }

    /// Atomically remove and return the next task. `None` on an empty queue.
    pub async fn dequeue(&self) -> Result<Option<Task>, QueueError> {
        self.store.take_next().await.map_err(QueueError::Store)
    }

    /// Pending tasks matching `query`, in dequeue order.
    pub async fn list(&self, query: &TaskQuery) -> Result<Vec<Task>, QueueError> {
        self.store.find(query).await.map_err(QueueError::Store)
    }

    pub async fn count(&self, query: &TaskQuery) -> Result<u64, QueueError> {
        self.store.count(query).await.map_err(QueueError::Store)
    }

    /// Administrative deletion of pending tasks.
    pub async fn delete(&self, query: &TaskQuery) -> Result<u64, QueueError> {
        let removed = self.store.delete_by(query).await.map_err(QueueError::Store)?;
        if removed > 0 {
            info!(removed, "deleted pending tasks");
        }
        Ok(removed)
    }
}
