//! # Index Harness Core
//!
//! Pure domain logic for the Index Harness scheduler: the closed operation
//! vocabulary, tasks and their deduplication keys, the choreography table
//! that expands composite operations into prioritized phases, the
//! task-status state machine, and the storage traits the runtime builds on.
//!
//! This crate contains no tokio, sqlx, or other runtime dependencies. The
//! in-memory [`store::memory::InMemoryStore`] makes every store contract
//! usable from tests and embedded setups without a database.

pub mod choreography;
pub mod error;
pub mod operation;
pub mod payload;
pub mod status;
pub mod store;
pub mod task;

pub use choreography::Phase;
pub use error::{StatusError, TaskError};
pub use operation::{Operation, TrackableType};
pub use payload::Payload;
pub use status::{ReportingState, Rollup, TaskStatus, Trackable};
pub use task::{NewTask, QueuePriority, Task};
