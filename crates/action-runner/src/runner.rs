//! Feeding an NDJSON event stream into an action.

use anyhow::{Context, Result};
use event_action::{Action, ActionSpec, Event};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// One input line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InputEvent {
    #[serde(rename = "subId")]
    pub sub_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Highest completed input line per subscription.
#[derive(Debug, Clone, Default)]
pub struct Checkpoints(Arc<Mutex<HashMap<String, u64>>>);

impl Checkpoints {
    pub fn record(&self, sub_id: &str, line: u64) {
        let mut map = self.0.lock();
        let entry = map.entry(sub_id.to_string()).or_insert(line);
        if line > *entry {
            *entry = line;
        }
        debug!(sub_id = %sub_id, line = *entry, "Checkpoint advanced");
    }

    pub fn get(&self, sub_id: &str) -> Option<u64> {
        self.0.lock().get(sub_id).copied()
    }

    /// Sorted copy of every checkpoint.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.0.lock().iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

/// Counters for one pass over the input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    pub lines: u64,
    pub submitted: u64,
    pub skipped: u64,
}

/// Read and parse the action definition at `path`.
pub fn load_spec(path: &Path) -> Result<ActionSpec> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read action config {}", path.display()))?;
    ActionSpec::from_json(&json)
        .with_context(|| format!("Failed to parse action config {}", path.display()))
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<InputEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let event: InputEvent = serde_json::from_str(line).context("Invalid event line")?;
    Ok(Some(event))
}

/// Submit every event read from `input`, waiting out backpressure before
/// each submit. Returns when the input ends.
pub async fn pump<R>(
    action: &Action,
    input: R,
    checkpoints: &Checkpoints,
    backpressure_poll: Duration,
) -> Result<PumpStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut stats = PumpStats::default();

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        stats.lines += 1;
        let line_number = stats.lines;

        let parsed = match parse_line(&line) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => continue,
            Err(e) => {
                warn!(line = line_number, error = %e, "Skipping line");
                stats.skipped += 1;
                continue;
            }
        };

        while action.is_backpressured() {
            tokio::time::sleep(backpressure_poll).await;
        }

        let checkpoints = checkpoints.clone();
        let event = Event::new(parsed.sub_id, parsed.payload).on_complete(move |event| {
            checkpoints.record(event.sub_id(), line_number);
        });
        action
            .submit(event)
            .await
            .with_context(|| format!("Failed to submit line {}", line_number))?;
        stats.submitted += 1;
    }

    Ok(stats)
}

/// Wait until the action has nothing in flight. Returns false if `timeout`
/// passed first.
pub async fn drain(action: &Action, timeout: Duration, poll: Duration) -> bool {
    let drained = tokio::time::timeout(timeout, async {
        while action.in_flight() > 0 {
            tokio::time::sleep(poll).await;
        }
    })
    .await
    .is_ok();

    if drained {
        info!(action_id = %action.id(), "All events processed");
    } else {
        warn!(
            action_id = %action.id(),
            in_flight = action.in_flight(),
            "Drain timeout reached"
        );
    }
    drained
}
