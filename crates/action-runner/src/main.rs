//! action-runner binary entry point.
//!
//! Usage: action-runner --config <action.json> < events.ndjson
//!
//! Each input line is `{"subId": "...", "payload": ...}`. Events are
//! batched and delivered by the configured action; the highest completed
//! line per subscription is logged on exit.

mod runner;

use anyhow::{Context, Result};
use clap::Parser;
use event_action::Action;
use observability::{LogConfig, LogFormat};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{info, warn};

/// Streams events from stdin through a batching webhook action.
#[derive(Parser, Debug)]
#[command(name = "action-runner")]
#[command(about = "Streams NDJSON events from stdin through a configured event action")]
struct Args {
    /// Path to the action definition (JSON).
    #[arg(long, env = "ACTION_CONFIG")]
    config: PathBuf,

    /// Action identifier used in logs. Defaults to a random id.
    #[arg(long, env = "ACTION_ID")]
    action_id: Option<String>,

    /// Allow webhook targets in private and loopback ranges.
    #[arg(long, env = "ACTION_ALLOW_PRIVATE_NETWORKS")]
    allow_private_networks: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (compact or json)
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Seconds to wait for in-flight events after stdin closes.
    #[arg(long, default_value = "30")]
    drain_timeout_secs: u64,

    /// Milliseconds between backpressure checks.
    #[arg(long, default_value = "50")]
    backpressure_poll_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    observability::try_init_with_config(LogConfig {
        service_name: "action-runner".into(),
        default_level: args.log_level.clone(),
        format: args.log_format,
        log_path: args.log_file.clone(),
    })
    .context("Failed to initialize logging")?;

    let spec = runner::load_spec(&args.config)?;
    let action_id = args
        .action_id
        .clone()
        .unwrap_or_else(|| format!("action-{}", uuid::Uuid::new_v4()));
    let action = Action::new(action_id, args.allow_private_networks, spec)
        .context("Failed to create action")?;

    info!(
        action_id = %action.id(),
        config = %args.config.display(),
        batch_size = action.config().batch_size,
        allow_private_networks = args.allow_private_networks,
        "Action runner starting"
    );

    let checkpoints = runner::Checkpoints::default();
    let poll = Duration::from_millis(args.backpressure_poll_ms.max(1));
    let input = BufReader::new(tokio::io::stdin());

    tokio::select! {
        result = runner::pump(&action, input, &checkpoints, poll) => {
            let stats = result?;
            info!(
                lines = stats.lines,
                submitted = stats.submitted,
                skipped = stats.skipped,
                "Input exhausted"
            );
            runner::drain(&action, Duration::from_secs(args.drain_timeout_secs), poll).await;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping...");
        }
    }

    let undelivered = action.in_flight();
    action.stop().await;
    action.wait_stopped().await;

    if undelivered > 0 {
        warn!(in_flight = undelivered, "Stopped with undelivered events");
    }
    for (sub_id, line) in checkpoints.snapshot() {
        info!(sub_id = %sub_id, line = line, "Final checkpoint");
    }

    Ok(())
}
