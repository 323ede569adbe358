//! Progress tracker: scoped status handles with guaranteed finalization.
//!
//! [`Tracker::start`] opens a root [`StatusHandle`];
//! [`StatusHandle::create_child`] opens nested ones. Every transition is
//! sent to each reporter in registration order before the call returns.
//!
//! A handle must end in exactly one of [`complete`](StatusHandle::complete),
//! [`fail`](StatusHandle::fail) or [`skip`](StatusHandle::skip). These
//! consume the handle. If a handle is dropped without one (early `?`
//! return, panic unwind, cancelled future), it marks itself failed and
//! notifies reporters from a task spawned on the current tokio runtime.
//! [`Tracker::flush`] waits for those notifications.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::task::TaskTracker;
use tracing::warn;

use index_harness_core::{Operation, StatusError, TaskStatus, Trackable};

use crate::reporter::Reporter;

pub const INTERRUPTED: &str = "operation interrupted before completion";

/// Fan-out point for status transitions. Clones share the reporters and
/// the set of pending drop notifications.
#[derive(Clone, Default)]
pub struct Tracker {
    reporters: Arc<Vec<Box<dyn Reporter>>>,
    pending: TaskTracker,
}

impl Tracker {
    pub fn new(reporters: Vec<Box<dyn Reporter>>) -> Self {
        Self {
            reporters: Arc::new(reporters),
            pending: TaskTracker::new(),
        }
    }

    /// Wait until every notification spawned by a dropped handle has reached
    /// the reporters.
    pub async fn flush(&self) {
        self.pending.close();
        self.pending.wait().await;
        self.pending.reopen();
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }

    /// Open a root status for `operation` on `trackable`.
    pub async fn start(&self, operation: Operation, trackable: Trackable) -> StatusHandle {
        self.open(TaskStatus::started(operation, trackable, None)).await
    }

    async fn open(&self, status: TaskStatus) -> StatusHandle {
        self.notify(&status).await;
        StatusHandle {
            tracker: self.clone(),
            status: Mutex::new(status),
            finished: false,
        }
    }

    /// Send `status` to every reporter. Reporter errors are logged and dropped.
    pub async fn notify(&self, status: &TaskStatus) {
        for reporter in self.reporters.iter() {
            if let Err(e) = reporter.notify(status).await {
                warn!(
                    reporter = reporter.name(),
                    status_id = %status.id,
                    error = %format!("{:#}", e),
                    "reporter failed; continuing"
                );
            }
        }
    }
}

/// Live status of one operation.
pub struct StatusHandle {
    tracker: Tracker,
    status: Mutex<TaskStatus>,
    finished: bool,
}

impl StatusHandle {
    fn lock(&self) -> MutexGuard<'_, TaskStatus> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state of the status.
    pub fn snapshot(&self) -> TaskStatus {
        self.lock().clone()
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    async fn update<F>(&self, apply: F) -> Result<(), StatusError>
    where
        F: FnOnce(&mut TaskStatus) -> Result<(), StatusError> + Send,
    {
        let snapshot = {
            let mut status = self.lock();
            apply(&mut status)?;
            status.clone()
        };
        self.tracker.notify(&snapshot).await;
        Ok(())
    }

    pub async fn set_total(&self, total: u64) -> Result<(), StatusError> {
        self.update(|s| s.set_total(total)).await
    }

    pub async fn set_current(&self, current: u64, message: impl Into<String>) -> Result<(), StatusError> {
        let message = message.into();
        self.update(|s| s.set_current(current, message)).await
    }

    /// Open a child status under this one.
    pub async fn create_child(&self, operation: Operation, trackable: Trackable) -> StatusHandle {
        let parent = self.id();
        self.tracker
            .open(TaskStatus::started(operation, trackable, Some(parent)))
            .await
    }

    async fn finish<F>(mut self, apply: F) -> Result<(), StatusError>
    where
        F: FnOnce(&mut TaskStatus) -> Result<(), StatusError> + Send,
    {
        let snapshot = {
            let mut status = self.lock();
            apply(&mut status)?;
            status.clone()
        };
        self.finished = true;
        self.tracker.notify(&snapshot).await;
        Ok(())
    }

    pub async fn complete(self) -> Result<(), StatusError> {
        self.finish(|s| s.complete()).await
    }

    pub async fn fail(self, error: impl Into<String>) -> Result<(), StatusError> {
        let error = error.into();
        self.finish(|s| s.fail(error)).await
    }

    pub async fn skip(self, reason: impl Into<String>) -> Result<(), StatusError> {
        let reason = reason.into();
        self.finish(|s| s.skip(reason)).await
    }
}

impl Drop for StatusHandle {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let snapshot = {
            let mut status = self.lock();
            if status.fail(INTERRUPTED).is_err() {
                return;
            }
            status.clone()
        };
        warn!(
            operation = snapshot.operation.as_str(),
            trackable = %snapshot.trackable,
            status_id = %snapshot.id,
            "status handle dropped before a terminal transition"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let tracker = self.tracker.clone();
                self.tracker.pending.spawn_on(
                    async move {
                        tracker.notify(&snapshot).await;
                    },
                    &runtime,
                );
            }
            Err(_) => warn!(
                status_id = %snapshot.id,
                "no runtime available; interrupted status was not reported"
            ),
        }
    }
}
