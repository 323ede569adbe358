//! # Index Harness
//!
//! A durable task queue and progress tracker for repository indexing work.
//!
//! Index Harness stores deduplicated, priority-ordered tasks in SQLite,
//! expands composite operations into ordered pipelines, runs tasks on a
//! pool of poll loops through registered handlers, and records a
//! hierarchical status for every operation it executes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ QueueService │──▶│  TaskStore  │──▶│  Worker  │──▶ Handler
//! │ enqueue/pipe │   │ SQLite/mem  │   │ N loops  │
//! └──────────────┘   └─────────────┘   └────┬─────┘
//!                                           │ StatusHandle
//!                                           ▼
//!                                      ┌──────────┐
//!                                      │ Tracker  │──▶ log / db / telemetry
//!                                      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ixh init                                   # create database
//! ixh pipeline repo.create --payload repo_id=7
//! ixh queue list
//! ixh work --drain --dry-run                 # run everything once
//! ixh status repository 7
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Durable task and status store |
//! | [`queue`] | Enqueue, pipelines, dequeue |
//! | [`handler`] | Handler trait and registry |
//! | [`worker`] | Poll loops executing tasks |
//! | [`tracker`] | Status handles with guaranteed finalization |
//! | [`reporter`] | Log, database and telemetry reporters |
//! | [`cooldown`] | Per-status rate limiting for reporters |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`error`] | Queue and registry errors |
//! | [`status`] | Status tree inspection |
//! | [`stats`] | Queue overview |
//!
//! Domain types (operations, tasks, payloads, statuses, the choreography
//! table and the store traits) live in `index_harness_core`.

pub mod config;
pub mod cooldown;
pub mod db;
pub mod error;
pub mod handler;
pub mod logging;
pub mod migrate;
pub mod queue;
pub mod queue_cmd;
pub mod reporter;
pub mod sqlite_store;
pub mod stats;
pub mod status;
pub mod tracker;
pub mod work_cmd;
pub mod worker;
