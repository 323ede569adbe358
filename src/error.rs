//! Error types raised by the queue service, the handler registry and the
//! worker's lifecycle.
//!
//! Everything that happens after a task is dequeued is contained inside the
//! worker and ends up as a terminal status, so only enqueue-time and
//! startup-time failures have a type here.

use index_harness_core::{Operation, TaskError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The task could not be built from the given payload.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// `enqueue_choreography` was called with a non-composite operation.
    #[error("{0} is not a composite operation")]
    NotComposite(Operation),

    /// The underlying store failed.
    #[error("task store error: {0:#}")]
    Store(anyhow::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A second handler was registered for the same operation.
    #[error("a handler for {0} is already registered")]
    Duplicate(Operation),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker already started")]
    AlreadyStarted,

    /// A stopped worker's cancellation token cannot be reset.
    #[error("worker has been stopped")]
    Stopped,
}
