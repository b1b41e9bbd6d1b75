//! # Observability
//!
//! Centralized tracing setup for the event action workspace.
//!
//! Binaries call [`init`] or [`init_with_config`] once at startup and use
//! the standard `tracing` macros everywhere else. Libraries never install a
//! subscriber themselves.
//!
//! ## Formats
//!
//! - [`LogFormat::Compact`]: human-readable lines, for terminals
//! - [`LogFormat::Json`]: one [`LogEntry`] object per line, for `jq`,
//!   `lnav` or a log shipper
//!
//! Output goes to stderr, or is appended to `log_path` when set. `RUST_LOG`
//! overrides `default_level`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "action-runner".into(),
//!         default_level: "debug".into(),
//!         format: observability::LogFormat::Json,
//!         ..Default::default()
//!     });
//!
//!     tracing::info!("service started");
//! }
//! ```

mod json_layer;
mod writer;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::FileLogWriter;

use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" | "jsonl" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every JSON line.
    pub service_name: String,

    /// Default level filter (e.g. "debug", "info,event_action=debug").
    /// Overridden by `RUST_LOG`.
    pub default_level: String,

    pub format: LogFormat,

    /// Append to this file instead of writing to stderr.
    pub log_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            format: LogFormat::Compact,
            log_path: None,
        }
    }
}

/// Failure to install the global subscriber.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("Failed to open log file {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Initialize logging with default settings for `service_name`.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// # Panics
///
/// Panics if the log file cannot be opened or a global subscriber is
/// already installed. Use [`try_init_with_config`] to handle either.
pub fn init_with_config(config: LogConfig) {
    if let Err(e) = try_init_with_config(config) {
        panic!("{}", e);
    }
}

/// Initialize logging, returning an error instead of panicking.
pub fn try_init_with_config(config: LogConfig) -> Result<(), InitError> {
    let filter = env_filter(&config.default_level);
    let writer = make_writer(&config)?;

    match config.format {
        LogFormat::Json => {
            let layer = JsonLayer::new(config.service_name.clone(), writer);
            tracing_subscriber::registry()
                .with(layer.with_filter(filter))
                .try_init()?;
        }
        LogFormat::Compact => {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .compact()
                .with_ansi(config.log_path.is_none())
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(layer.with_filter(filter))
                .try_init()?;
        }
    }

    tracing::debug!(
        service = %config.service_name,
        format = config.format.as_str(),
        log_path = ?config.log_path,
        "observability initialized"
    );
    Ok(())
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn make_writer(config: &LogConfig) -> Result<BoxMakeWriter, InitError> {
    match &config.log_path {
        Some(path) => {
            let writer = FileLogWriter::open(path).map_err(|source| InitError::LogFile {
                path: path.clone(),
                source,
            })?;
            Ok(BoxMakeWriter::new(writer))
        }
        None => Ok(BoxMakeWriter::new(std::io::stderr)),
    }
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
