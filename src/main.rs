//! # Index Harness CLI (`ixh`)
//!
//! The `ixh` binary is the operator interface for Index Harness. It provides
//! commands for database initialization, enqueuing tasks and pipelines,
//! inspecting the queue and recorded statuses, and running the worker.
//!
//! ## Usage
//!
//! ```bash
//! ixh --config ./config/ixh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ixh init` | Create the SQLite database and run schema migrations |
//! | `ixh operations` | List the operation vocabulary and pipelines |
//! | `ixh enqueue <op>` | Enqueue a single task |
//! | `ixh pipeline <composite>` | Enqueue every phase of a composite operation |
//! | `ixh queue list\|count\|clear` | Inspect or clear pending tasks |
//! | `ixh status <type> <id>` | Show the status tree of a trackable |
//! | `ixh stats` | Queue and status overview |
//! | `ixh work` | Run the worker |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! ixh init --config ./config/ixh.toml
//!
//! # Index a commit at user-initiated priority
//! ixh pipeline commit.index --priority 5000 --payload repo_id=7 --payload commit_sha=ab12f
//!
//! # Process everything pending without real handlers
//! ixh work --drain --dry-run
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use index_harness::config::{self, Config};
use index_harness::{logging, migrate, queue_cmd, stats, status, work_cmd};
use index_harness_core::QueuePriority;

/// Index Harness CLI — a durable task queue and progress tracker for
/// repository indexing.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ixh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ixh",
    about = "Index Harness — a durable task queue and progress tracker for repository indexing",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ixh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// List operations, their scope, dedup fields and pipeline phases.
    Operations,

    /// Enqueue a single task.
    Enqueue {
        /// Operation identifier, e.g. `repo.clone`.
        operation: String,

        #[arg(long, default_value_t = QueuePriority::NORMAL)]
        priority: i64,

        /// Payload field as KEY=VALUE. Repeatable.
        #[arg(long = "payload", value_parser = parse_key_val)]
        payload: Vec<(String, String)>,

        /// Override the derived dedup key.
        #[arg(long)]
        dedup_key: Option<String>,
    },

    /// Enqueue every phase of a composite operation.
    Pipeline {
        /// Composite operation, e.g. `commit.index`.
        composite: String,

        /// Base priority; phase offsets are added to it.
        #[arg(long, default_value_t = QueuePriority::NORMAL)]
        priority: i64,

        #[arg(long = "payload", value_parser = parse_key_val)]
        payload: Vec<(String, String)>,
    },

    /// Inspect or clear pending tasks.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Show the status tree recorded for a trackable.
    Status {
        /// repository, commit, branch, tag or index.
        trackable_type: String,
        /// Branches and tags are scoped by repository: `<repo_id>/<name>`.
        trackable_id: String,
    },

    /// Show queue and status statistics.
    Stats,

    /// Run the worker.
    ///
    /// Runs until Ctrl-C unless `--drain` is given.
    Work {
        /// Process until the queue is empty, then exit.
        #[arg(long)]
        drain: bool,

        /// Log and skip every task instead of executing it.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List pending tasks in dequeue order.
    List {
        #[arg(long)]
        operation: Option<String>,

        #[arg(long)]
        limit: Option<i64>,
    },
    /// Count pending tasks.
    Count {
        #[arg(long)]
        operation: Option<String>,
    },
    /// Delete pending tasks.
    Clear {
        #[arg(long)]
        operation: Option<String>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Operations = cli.command {
        let cfg = config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal());
        logging::init(&cfg.logging);
        return queue_cmd::run_operations();
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Operations => queue_cmd::run_operations()?,
        Commands::Enqueue {
            operation,
            priority,
            payload,
            dedup_key,
        } => {
            queue_cmd::run_enqueue(&cfg, &operation, priority, &payload, dedup_key).await?;
        }
        Commands::Pipeline {
            composite,
            priority,
            payload,
        } => {
            queue_cmd::run_pipeline(&cfg, &composite, priority, &payload).await?;
        }
        Commands::Queue { action } => match action {
            QueueAction::List { operation, limit } => {
                queue_cmd::run_queue_list(&cfg, operation.as_deref(), limit).await?;
            }
            QueueAction::Count { operation } => {
                queue_cmd::run_queue_count(&cfg, operation.as_deref()).await?;
            }
            QueueAction::Clear { operation } => {
                queue_cmd::run_queue_clear(&cfg, operation.as_deref()).await?;
            }
        },
        Commands::Status {
            trackable_type,
            trackable_id,
        } => {
            status::run_status(&cfg, &trackable_type, &trackable_id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Work { drain, dry_run } => {
            work_cmd::run_work(&cfg, drain, dry_run).await?;
        }
    }

    Ok(())
}
