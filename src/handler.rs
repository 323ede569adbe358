//! Handlers and the handler registry.
//!
//! A [`Handler`] executes one kind of [`Operation`]. The worker resolves it
//! through a [`HandlerRegistry`] built once at startup and passed around by
//! reference; nothing is registered globally.
//!
//! # Example
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use index_harness::handler::{Handler, HandlerContext, HandlerRegistry, Outcome};
//! use index_harness_core::{Operation, Task};
//!
//! struct CloneRepository;
//!
//! #[async_trait]
//! impl Handler for CloneRepository {
//!     async fn execute(&self, ctx: &HandlerContext, task: &Task) -> Result<Outcome> {
//!         ctx.status.set_total(1).await?;
//!         // ... clone the repository named in the payload
//!         Ok(Outcome::Completed)
//!     }
//! }
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(Operation::RepositoryClone, CloneRepository).unwrap();
//! assert!(registry.register(Operation::RepositoryClone, CloneRepository).is_err());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use index_harness_core::{Operation, Task};

use crate::error::RegistryError;
use crate::queue::QueueService;
use crate::tracker::StatusHandle;

/// Successful result of a handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Nothing to do; the reason becomes the status message.
    Skipped(String),
}

/// Everything a handler may use while executing one task.
pub struct HandlerContext {
    /// Cancelled when the worker is stopping. Long-running handlers should
    /// check it between steps.
    pub cancel: CancellationToken,
    /// Status of this task. Use it for progress and child statuses; the
    /// worker finalizes it from the handler's return value.
    pub status: StatusHandle,
    /// For enqueuing follow-up work.
    pub queue: QueueService,
}

/// Executor for one operation.
#[async_trait]
pub trait Handler: Send + Sync {
    /// An `Err` fails the task. Handlers are never retried automatically.
    async fn execute(&self, ctx: &HandlerContext, task: &Task) -> Result<Outcome>;
}

/// Static binding of operation to handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Operation, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with [`DryRunHandler`] bound to every non-composite operation.
    pub fn dry_run() -> Self {
        let mut registry = Self::new();
        let handler: Arc<dyn Handler> = Arc::new(DryRunHandler);
        for op in Operation::ALL.into_iter().filter(|op| !op.is_composite()) {
            registry.handlers.insert(op, handler.clone());
        }
        registry
    }

    /// Bind `handler` to `operation`. A second binding is an error.
    pub fn register(
        &mut self,
        operation: Operation,
        handler: impl Handler + 'static,
    ) -> Result<(), RegistryError> {
        self.register_arc(operation, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        operation: Operation,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&operation) {
            return Err(RegistryError::Duplicate(operation));
        }
        self.handlers.insert(operation, handler);
        Ok(())
    }

    pub fn lookup(&self, operation: Operation) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&operation).cloned()
    }

    /// Registered operations in vocabulary order.
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.handlers.keys().copied().collect();
        ops.sort();
        ops
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Logs the task and skips it.
pub struct DryRunHandler;

#[async_trait]
impl Handler for DryRunHandler {
    async fn execute(&self, _ctx: &HandlerContext, task: &Task) -> Result<Outcome> {
        info!(
            operation = task.operation.as_str(),
            dedup_key = %task.dedup_key,
            priority = task.priority,
            payload = %String::from_utf8_lossy(&task.payload),
            "dry run"
        );
        Ok(Outcome::Skipped("dry run".to_string()))
    }
}
