//! Batch dispatcher: groups the incoming event stream into batches.

use crate::event::{Batch, Event};
use crate::state::Shared;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Message on the producer to dispatcher handoff.
#[derive(Debug)]
pub(crate) enum DispatchMessage {
    Event(Event),
    /// End of stream. The dispatcher exits without reading further.
    Shutdown,
}

/// Batch being accumulated.
struct OpenBatch {
    events: Vec<Event>,
    opened_at: Instant,
}

impl OpenBatch {
    fn close(self) -> Batch {
        Batch::new(self.events, self.opened_at)
    }
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    receiver: mpsc::Receiver<DispatchMessage>,
    batch_size: usize,
    batch_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        shared: Arc<Shared>,
        receiver: mpsc::Receiver<DispatchMessage>,
        batch_size: usize,
        batch_timeout: Option<Duration>,
    ) -> Self {
        Self {
            shared,
            receiver,
            batch_size: batch_size.max(1),
            batch_timeout,
        }
    }

    /// Run until the shutdown message arrives or every sender is dropped.
    pub async fn run(mut self) {
        debug!(action_id = %self.shared.id, "Dispatcher started");
        let mut open: Option<OpenBatch> = None;

        loop {
            let deadline = open
                .as_ref()
                .zip(self.batch_timeout)
                .map(|(batch, timeout)| batch.opened_at + timeout);

            let message = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                        Ok(message) => message,
                        Err(_) => {
                            if let Some(batch) = open.take() {
                                self.dispatch(batch, "timeout");
                            }
                            continue;
                        }
                    }
                }
                None => self.receiver.recv().await,
            };

            let event = match message {
                Some(DispatchMessage::Event(event)) => event,
                Some(DispatchMessage::Shutdown) | None => break,
            };

            self.shared.add_in_flight(1);
            let batch = open.get_or_insert_with(|| OpenBatch {
                events: Vec::with_capacity(self.batch_size),
                opened_at: Instant::now(),
            });
            batch.events.push(event);

            if batch.events.len() >= self.batch_size {
                if let Some(batch) = open.take() {
                    self.dispatch(batch, "full");
                }
            }
        }

        if let Some(batch) = open.take() {
            let dropped = batch.events.len();
            self.shared.release_in_flight(dropped as u64);
            debug!(
                action_id = %self.shared.id,
                events = dropped,
                "Dropped partial batch at stop"
            );
        }
        self.shared.state.lock().dispatcher_done = true;
        debug!(action_id = %self.shared.id, "Dispatcher stopped");
    }

    fn dispatch(&self, batch: OpenBatch, reason: &'static str) {
        debug!(
            action_id = %self.shared.id,
            events = batch.events.len(),
            reason = reason,
            "Batch closed"
        );
        if !self.shared.enqueue(batch.close()) {
            debug!(action_id = %self.shared.id, "Dropped batch closed after stop");
        }
    }
}
