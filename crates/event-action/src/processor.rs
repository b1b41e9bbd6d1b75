//! Batch processor: delivers queued batches and applies the failure policy.

use crate::config::ErrorHandling;
use crate::error::DeliveryError;
use crate::event::Batch;
use crate::retry::{deliver_with_retry, RetryPolicy};
use crate::sink::Sink;
use crate::state::Shared;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

/// How processing of a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Delivered to the sink.
    Delivered,
    /// Delivery failed and the skip policy dropped the batch.
    Skipped,
    /// Stop interrupted processing before the batch was finished.
    Abandoned,
}

pub(crate) struct Processor {
    shared: Arc<Shared>,
    sink: Arc<dyn Sink>,
    policy: RetryPolicy,
    error_handling: ErrorHandling,
    blocked_retry_delay: Duration,
}

impl Processor {
    pub fn new(
        shared: Arc<Shared>,
        sink: Arc<dyn Sink>,
        policy: RetryPolicy,
        error_handling: ErrorHandling,
        blocked_retry_delay: Duration,
    ) -> Self {
        Self {
            shared,
            sink,
            policy,
            error_handling,
            blocked_retry_delay,
        }
    }

    /// Process batches in queue order until the action stops.
    pub async fn run(self) {
        while let Some((batch_number, batch)) = self.next_batch().await {
            let span = info_span!(
                "batch",
                action_id = %self.shared.id,
                batch = batch_number,
                events = batch.len()
            );
            self.process(batch_number, batch).instrument(span).await;
        }

        self.drop_queued();
        self.shared.state.lock().processor_done = true;
        info!(action_id = %self.shared.id, "Batch processor stopped");
    }

    /// Wait until a batch is queued or stop is requested.
    async fn next_batch(&self) -> Option<(u64, Batch)> {
        loop {
            {
                let mut state = self.shared.state.lock();
                if state.stopped {
                    return None;
                }
                if let Some(batch) = state.queue.pop_front() {
                    state.batch_count += 1;
                    return Some((state.batch_count, batch));
                }
            }
            self.shared.work_ready.notified().await;
        }
    }

    async fn process(&self, batch_number: u64, batch: Batch) {
        let events = batch.len() as u64;
        info!(
            action_id = %self.shared.id,
            batch = batch_number,
            events = events,
            waited_ms = batch.opened_at().elapsed().as_millis() as u64,
            "Processing batch"
        );

        let outcome = self.deliver(batch_number, &batch).await;
        match outcome {
            Outcome::Delivered | Outcome::Skipped => {
                let subscriptions = batch.complete();
                info!(
                    action_id = %self.shared.id,
                    batch = batch_number,
                    outcome = ?outcome,
                    subscriptions = subscriptions,
                    "Batch complete"
                );
            }
            Outcome::Abandoned => {
                warn!(
                    action_id = %self.shared.id,
                    batch = batch_number,
                    events = events,
                    "Batch abandoned at stop"
                );
            }
        }
        self.shared.release_in_flight(events);
    }

    /// Failure-policy loop around the retry controller.
    async fn deliver(&self, batch_number: u64, batch: &Batch) -> Outcome {
        let mut round: u64 = 0;
        loop {
            round += 1;
            let err = match deliver_with_retry(
                self.sink.as_ref(),
                batch,
                batch_number,
                self.policy,
                &self.shared,
            )
            .await
            {
                Ok(()) => return Outcome::Delivered,
                Err(DeliveryError::Stopped) => return Outcome::Abandoned,
                Err(e) => e,
            };

            error!(
                action_id = %self.shared.id,
                batch = batch_number,
                round = round,
                error_handling = self.error_handling.as_str(),
                blocked_retry_delay_secs = self.blocked_retry_delay.as_secs(),
                error = %err,
                "Batch delivery failed"
            );

            match self.error_handling {
                ErrorHandling::Skip => return Outcome::Skipped,
                ErrorHandling::Block => {
                    if !self.shared.sleep_unless_stopped(self.blocked_retry_delay).await {
                        return Outcome::Abandoned;
                    }
                }
            }
        }
    }

    /// Release batches that were still queued when the action stopped.
    fn drop_queued(&self) {
        let dropped: Vec<Batch> = self.shared.state.lock().queue.drain(..).collect();
        if dropped.is_empty() {
            return;
        }
        let events: u64 = dropped.iter().map(|batch| batch.len() as u64).sum();
        self.shared.release_in_flight(events);
        warn!(
            action_id = %self.shared.id,
            batches = dropped.len(),
            events = events,
            "Dropped queued batches at stop"
        );
    }
}
