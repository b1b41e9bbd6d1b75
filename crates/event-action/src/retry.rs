//! Retry controller: exponential backoff bounded by a deadline.

use crate::config::BackoffConfig;
use crate::error::{DeliveryError, DeliveryResult};
use crate::event::Batch;
use crate::sink::Sink;
use crate::state::Shared;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Delays slept between consecutive attempts.
///
/// Yields `initial_delay`, then multiplies by `factor` for every further
/// item. Unbounded; the caller stops consuming at its deadline.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    factor: f64,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            next: config.initial_delay,
            factor: config.factor,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.next;
        self.next = Duration::try_from_secs_f64(delay.as_secs_f64() * self.factor)
            .unwrap_or(Duration::MAX);
        Some(delay)
    }
}

/// Retry limits applied to every batch of an action.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub backoff: BackoffConfig,
    /// Once this much time has passed since the first attempt, the last
    /// error is returned instead of sleeping again. Zero means one attempt.
    pub retry_timeout: Duration,
}

/// Deliver `batch` through `sink`, retrying failed attempts with backoff.
///
/// The stop flag is checked before every attempt and interrupts backoff
/// sleeps. A stop before the first attempt yields [`DeliveryError::Stopped`];
/// a later stop yields the error of the last attempt made.
pub(crate) async fn deliver_with_retry(
    sink: &dyn Sink,
    batch: &Batch,
    batch_number: u64,
    policy: RetryPolicy,
    shared: &Shared,
) -> DeliveryResult<()> {
    let start = Instant::now();
    let mut delays = Backoff::new(policy.backoff);
    let mut attempt: u64 = 0;
    let mut last_error = None;

    loop {
        if shared.is_stopped() {
            return Err(last_error.unwrap_or(DeliveryError::Stopped));
        }

        attempt += 1;
        let err = match sink.attempt_delivery(batch, attempt).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if start.elapsed() >= policy.retry_timeout {
            warn!(
                action_id = %shared.id,
                batch = batch_number,
                attempts = attempt,
                error = %err,
                "Retry timeout reached"
            );
            return Err(err);
        }

        let delay = delays.next().unwrap_or(policy.backoff.initial_delay);
        info!(
            action_id = %shared.id,
            batch = batch_number,
            attempt = attempt,
            delay_secs = delay.as_secs_f64(),
            error = %err,
            "Waiting before re-attempting batch"
        );
        last_error = Some(err);

        if !shared.sleep_unless_stopped(delay).await {
            break;
        }
    }

    Err(last_error.unwrap_or(DeliveryError::Stopped))
}
