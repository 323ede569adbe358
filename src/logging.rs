//! Structured logging setup.
//!
//! All diagnostics go through `tracing` and are written to **stderr**, so
//! stdout stays parseable for scripts (`ixh queue list | ...`). `RUST_LOG`
//! overrides the configured filter when set.
//!
//! | `logging.format` | Output |
//! |------------------|--------|
//! | `human` | Compact, ANSI-coloured lines |
//! | `json` | One JSON object per event |
//! | `auto` | `human` when stderr is a TTY, otherwise `json` |

use std::str::FromStr;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    /// Resolve `auto` against the current stderr.
    pub fn resolve(configured: &str) -> Result<Self, String> {
        match configured {
            "auto" => Ok(Self::default_for_tty()),
            other => other.parse(),
        }
    }

    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            LogFormat::Human
        } else {
            LogFormat::Json
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// keep the first subscriber.
pub fn init(config: &LoggingConfig) {
    let format = LogFormat::resolve(&config.format).unwrap_or(LogFormat::Human);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (human, json) = match format {
        LogFormat::Human => (
            Some(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_ansi(atty::is(atty::Stream::Stderr)),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(false),
            ),
        ),
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(human)
        .with(json);

    if subscriber.try_init().is_err() {
        tracing::debug!("global tracing subscriber already initialized");
    }
}
