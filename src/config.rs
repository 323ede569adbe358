//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/ixh.sqlite"
//!
//! [queue]
//! workers = 1
//! poll_interval_ms = 1000
//! # task_timeout_secs = 600
//!
//! [reporting]
//! log = true
//! db = true
//! telemetry = true
//! cooldown_ms = 1000
//!
//! [logging]
//! format = "auto"
//! filter = "info"
//! ```
//!
//! Only `[db]` is required; every other section falls back to the defaults
//! shown above.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Number of concurrent poll loops sharing one store.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Fail a task that runs longer than this. Unset means no limit.
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            task_timeout_secs: None,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}

fn default_workers() -> usize {
    1
}
fn default_poll_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportingConfig {
    #[serde(default = "default_true")]
    pub log: bool,
    #[serde(default = "default_true")]
    pub db: bool,
    #[serde(default = "default_true")]
    pub telemetry: bool,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            log: true,
            db: true,
            telemetry: true,
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl ReportingConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

fn default_true() -> bool {
    true
}
fn default_cooldown_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_format() -> String {
    "auto".to_string()
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Defaults with the database at `./data/ixh.sqlite`. Used when no config
    /// file is present.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/ixh.sqlite"),
            },
            queue: QueueConfig::default(),
            reporting: ReportingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Defaults pointing at a specific database file.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::minimal();
        config.db.path = path.into();
        config
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.queue.workers == 0 {
        anyhow::bail!("queue.workers must be >= 1");
    }
    if config.queue.poll_interval_ms == 0 {
        anyhow::bail!("queue.poll_interval_ms must be > 0");
    }
    if config.queue.task_timeout_secs == Some(0) {
        anyhow::bail!("queue.task_timeout_secs must be > 0 when set");
    }
    if config.reporting.cooldown_ms == 0 {
        anyhow::bail!("reporting.cooldown_ms must be > 0");
    }
    match config.logging.format.as_str() {
        "auto" | "human" | "json" => {}
        other => anyhow::bail!(
            "Unknown logging format: '{}'. Must be auto, human, or json.",
            other
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn only_db_is_required() {
        let config = parse("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert_eq!(config.queue.workers, 1);
        assert_eq!(config.queue.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.queue.task_timeout(), None);
        assert!(config.reporting.log && config.reporting.db && config.reporting.telemetry);
        assert_eq!(config.logging.format, "auto");
    }

    #[test]
    fn missing_db_is_an_error() {
        assert!(parse("[queue]\nworkers = 2\n").is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let err = parse("[db]\npath = \"x\"\n[queue]\nworkers = 0\n").unwrap_err();
        assert!(err.to_string().contains("queue.workers"));
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(parse("[db]\npath = \"x\"\n[queue]\ntask_timeout_secs = 0\n").is_err());
        let ok = parse("[db]\npath = \"x\"\n[queue]\ntask_timeout_secs = 30\n").unwrap();
        assert_eq!(ok.queue.task_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn rejects_unknown_log_format() {
        let err = parse("[db]\npath = \"x\"\n[logging]\nformat = \"xml\"\n").unwrap_err();
        assert!(err.to_string().contains("xml"));
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/ixh.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
