//! Status reporters: observers notified on every status transition.
//!
//! Reporters are fire-and-forget from the tracker's point of view. An error
//! returned from [`Reporter::notify`] is logged by the tracker and dropped,
//! so a broken observer never aborts the operation it observes.
//!
//! | Reporter | Effect |
//! |----------|--------|
//! | [`LogReporter`] | `tracing` event per transition |
//! | [`DbReporter`] | persists the status through a [`StatusStore`] |
//! | [`TelemetryReporter`] | in-process counters plus a duration event on terminal transitions |
//!
//! [`build_reporters`] assembles the configured set, wrapping the log and
//! database reporters in a [`Cooldown`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use index_harness_core::store::StatusStore;
use index_harness_core::{Operation, ReportingState, TaskStatus};

use crate::config::ReportingConfig;
use crate::cooldown::Cooldown;

/// Observer of status transitions.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    async fn notify(&self, status: &TaskStatus) -> Result<()>;
}

#[async_trait]
impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn notify(&self, status: &TaskStatus) -> Result<()> {
        (**self).notify(status).await
    }
}

#[async_trait]
impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn notify(&self, status: &TaskStatus) -> Result<()> {
        (**self).notify(status).await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Logging
// ═══════════════════════════════════════════════════════════════════════

pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, status: &TaskStatus) -> Result<()> {
        let operation = status.operation.as_str();
        let trackable = status.trackable.to_string();
        let percent = status.completion_percent();
        match status.state {
            ReportingState::Started => {
                info!(operation, trackable = %trackable, state = "started", "operation started")
            }
            ReportingState::InProgress => debug!(
                operation,
                trackable = %trackable,
                state = "in_progress",
                percent,
                message = %status.message,
                "progress"
            ),
            ReportingState::Completed => {
                info!(operation, trackable = %trackable, state = "completed", percent, "operation completed")
            }
            ReportingState::Skipped => info!(
                operation,
                trackable = %trackable,
                state = "skipped",
                reason = %status.message,
                "operation skipped"
            ),
            ReportingState::Failed => warn!(
                operation,
                trackable = %trackable,
                state = "failed",
                error = status.error.as_deref().unwrap_or(""),
                "operation failed"
            ),
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Persistence
// ═══════════════════════════════════════════════════════════════════════

pub struct DbReporter {
    store: Arc<dyn StatusStore>,
}

impl DbReporter {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Reporter for DbReporter {
    fn name(&self) -> &str {
        "db"
    }

    async fn notify(&self, status: &TaskStatus) -> Result<()> {
        self.store.save(status).await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Telemetry
// ═══════════════════════════════════════════════════════════════════════

/// Transition counters keyed by `(operation, state)`.
pub type TelemetrySnapshot = BTreeMap<(Operation, ReportingState), u64>;

/// Counts transitions and emits a duration event on target
/// `index_harness::telemetry` whenever a status reaches a terminal state.
///
/// Clones share the same counters.
#[derive(Clone, Default)]
pub struct TelemetryReporter {
    counters: Arc<Mutex<TelemetrySnapshot>>,
}

impl TelemetryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.counters
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl Reporter for TelemetryReporter {
    fn name(&self) -> &str {
        "telemetry"
    }

    async fn notify(&self, status: &TaskStatus) -> Result<()> {
        {
            let mut counters = self
                .counters
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *counters.entry((status.operation, status.state)).or_insert(0) += 1;
        }
        if status.is_terminal() {
            let duration_ms = (status.updated_at - status.created_at).num_milliseconds();
            info!(
                target: "index_harness::telemetry",
                operation = status.operation.as_str(),
                trackable_type = status.trackable.trackable_type.as_str(),
                state = status.state.as_str(),
                duration_ms,
                "operation finished"
            );
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Assembly
// ═══════════════════════════════════════════════════════════════════════

/// The configured reporters, plus a handle on the telemetry counters when
/// telemetry is enabled.
pub struct ReporterSet {
    pub reporters: Vec<Box<dyn Reporter>>,
    pub telemetry: Option<TelemetryReporter>,
}

impl ReporterSet {
    pub fn names(&self) -> Vec<&str> {
        self.reporters.iter().map(|r| r.name()).collect()
    }
}

/// Build reporters in the fixed order log, db, telemetry.
pub fn build_reporters(config: &ReportingConfig, store: Arc<dyn StatusStore>) -> ReporterSet {
    let mut reporters: Vec<Box<dyn Reporter>> = Vec::new();
    if config.log {
        reporters.push(Box::new(Cooldown::new(LogReporter, config.cooldown())));
    }
    if config.db {
        reporters.push(Box::new(Cooldown::new(
            DbReporter::new(store),
            config.cooldown(),
        )));
    }
    let telemetry = config.telemetry.then(TelemetryReporter::new);
    if let Some(t) = &telemetry {
        reporters.push(Box::new(t.clone()));
    }
    ReporterSet {
        reporters,
        telemetry,
    }
}
