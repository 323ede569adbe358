use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use index_harness_core::store::{StatusStore, TaskStore};

use crate::config::Config;
use crate::handler::HandlerRegistry;
use crate::queue::QueueService;
use crate::reporter::build_reporters;
use crate::sqlite_store::SqliteStore;
use crate::tracker::Tracker;
use crate::worker::{Worker, WorkerConfig};

/// Run the worker against the configured database.
///
/// With `drain`, process until the queue is empty and exit. Otherwise poll
/// until Ctrl-C, then let in-flight tasks finish.
pub async fn run_work(config: &Config, drain: bool, dry_run: bool) -> Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let tasks: Arc<dyn TaskStore> = store.clone();
    let statuses: Arc<dyn StatusStore> = store.clone();
    let queue = QueueService::new(tasks);

    let registry = if dry_run {
        HandlerRegistry::dry_run()
    } else {
        HandlerRegistry::new()
    };
    if registry.is_empty() {
        warn!("no handlers registered; every dequeued task will fail");
    }

    let reporters = build_reporters(&config.reporting, statuses);
    let telemetry = reporters.telemetry.clone();
    let tracker = Tracker::new(reporters.reporters);
    let worker = Worker::new(
        queue,
        Arc::new(registry),
        tracker.clone(),
        WorkerConfig::from(&config.queue),
    );

    if drain {
        let processed = worker.drain().await?;
        println!("work (drain)");
        println!("  processed {} task(s)", processed);
    } else {
        worker.start().await?;
        tokio::signal::ctrl_c().await?;
        info!("interrupt received; stopping worker");
        worker.stop().await;
    }

    if let Some(telemetry) = telemetry {
        let snapshot = telemetry.snapshot();
        if !snapshot.is_empty() {
            println!("  transitions:");
            for ((operation, state), n) in snapshot {
                println!("    {:<48} {:<12} {}", operation.as_str(), state.as_str(), n);
            }
        }
    }

    tracker.flush().await;
    store.close().await;
    Ok(())
}
