//! Worker pool: dequeue, execute, report.
//!
//! ```text
//!            ┌───────────── poll loop (× workers) ─────────────┐
//!            │                                                 │
//!  store ──▶ │ dequeue ─▶ registry.lookup ─▶ handler.execute   │ ──▶ tracker
//!            │    │ empty / store error                        │
//!            │    └──▶ sleep(poll_interval) or cancelled       │
//!            └─────────────────────────────────────────────────┘
//! ```
//!
//! Every loop drains back-to-back while tasks are available and sleeps one
//! poll period only when the queue is empty or the store errored. Store
//! errors are logged and never end the loop.
//!
//! Nothing that happens after a dequeue escapes the worker: a missing
//! handler, a handler error, a panic, an undecodable payload and an
//! optional timeout all end as a FAILED status for that one task.
//!
//! Concurrency safety comes entirely from the store's atomic
//! [`take_next`](index_harness_core::store::TaskStore::take_next); loops
//! share no lock.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use index_harness_core::{Task, Trackable};

use crate::config::QueueConfig;
use crate::error::{QueueError, WorkerError};
use crate::handler::{HandlerContext, HandlerRegistry, Outcome};
use crate::queue::QueueService;
use crate::tracker::Tracker;

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub workers: usize,
    pub poll_interval: Duration,
    pub task_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for WorkerConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            poll_interval: config.poll_interval(),
            task_timeout: config.task_timeout(),
        }
    }
}

struct Inner {
    queue: QueueService,
    registry: Arc<HandlerRegistry>,
    tracker: Tracker,
    config: WorkerConfig,
    cancel: CancellationToken,
    in_flight: AtomicUsize,
    started: AtomicBool,
    loops: Mutex<JoinSet<()>>,
}

/// Pool of poll loops over one queue. Clones control the same pool.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<Inner>,
}

/// Decrements the in-flight counter on every exit path.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Worker {
    pub fn new(
        queue: QueueService,
        registry: Arc<HandlerRegistry>,
        tracker: Tracker,
        config: WorkerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                registry,
                tracker,
                config,
                cancel: CancellationToken::new(),
                in_flight: AtomicUsize::new(0),
                started: AtomicBool::new(false),
                loops: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// True when no loop holds a dequeued task that is not yet finalized.
    pub fn is_idle(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) == 0
    }

    /// Spawn the configured number of poll loops. A worker starts once;
    /// build a new one to resume after [`stop`](Self::stop).
    pub async fn start(&self) -> Result<(), WorkerError> {
        if self.inner.cancel.is_cancelled() {
            return Err(WorkerError::Stopped);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted);
        }
        let mut loops = self.inner.loops.lock().await;
        for slot in 0..self.inner.config.workers {
            let worker = self.clone();
            loops.spawn(async move { worker.poll_loop(slot).await });
        }
        info!(
            workers = self.inner.config.workers,
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            handlers = self.inner.registry.len(),
            "worker started"
        );
        Ok(())
    }

    /// Cancel the loops, wait until each has finished its current task and
    /// until every interrupted status has reached the reporters.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let mut loops = self.inner.loops.lock().await;
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "poll loop ended abnormally");
            }
        }
        self.inner.tracker.flush().await;
        info!("worker stopped");
    }

    /// Process at most one task. Returns whether one was found.
    pub async fn run_once(&self) -> Result<bool, QueueError> {
        let _guard = InFlight::enter(&self.inner.in_flight);
        let Some(task) = self.inner.queue.dequeue().await? else {
            return Ok(false);
        };
        self.execute(task).await;
        Ok(true)
    }

    /// Process tasks until the queue is empty. Returns how many ran.
    pub async fn drain(&self) -> Result<usize, QueueError> {
        let mut processed = 0;
        while !self.inner.cancel.is_cancelled() && self.run_once().await? {
            processed += 1;
        }
        Ok(processed)
    }

    async fn poll_loop(self, slot: usize) {
        debug!(slot, "poll loop started");
        loop {
            if self.inner.cancel.is_cancelled() {
                break;
            }
            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => warn!(slot, error = %e, "dequeue failed; retrying after poll interval"),
            }
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.inner.config.poll_interval) => {}
            }
        }
        debug!(slot, "poll loop stopped");
    }

    async fn execute(&self, task: Task) {
        let operation = task.operation;
        let trackable = match task.trackable() {
            Ok(t) => t,
            Err(e) => {
                let status = self
                    .inner
                    .tracker
                    .start(operation, Trackable::new(operation.trackable_type(), "unknown"))
                    .await;
                finalize(status.fail(e.to_string()).await);
                return;
            }
        };
        let status = self.inner.tracker.start(operation, trackable).await;

        let Some(handler) = self.inner.registry.lookup(operation) else {
            finalize(status.fail(format!("no handler registered for {}", operation)).await);
            return;
        };

        let ctx = HandlerContext {
            cancel: self.inner.cancel.clone(),
            status,
            queue: self.inner.queue.clone(),
        };
        let run = AssertUnwindSafe(handler.execute(&ctx, &task)).catch_unwind();
        let result = match self.inner.config.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => Ok(Err(anyhow::anyhow!(
                    "timed out after {}s",
                    limit.as_secs()
                ))),
            },
            None => run.await,
        };

        let HandlerContext { status, .. } = ctx;
        let finished = match result {
            Ok(Ok(Outcome::Completed)) => status.complete().await,
            Ok(Ok(Outcome::Skipped(reason))) => status.skip(reason).await,
            Ok(Err(e)) => status.fail(format!("{:#}", e)).await,
            Err(panic) => {
                status
                    .fail(format!("handler panicked: {}", panic_message(&*panic)))
                    .await
            }
        };
        finalize(finished);
    }
}

fn finalize(result: Result<(), index_harness_core::StatusError>) {
    if let Err(e) = result {
        warn!(error = %e, "could not finalize task status");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
