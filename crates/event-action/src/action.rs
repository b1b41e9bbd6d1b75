//! The action handle: owns the workers and exposes the producer API.

use crate::config::{ActionConfig, ActionSpec};
use crate::dispatcher::{DispatchMessage, Dispatcher};
use crate::error::{ActionError, ActionResult};
use crate::event::Event;
use crate::processor::Processor;
use crate::retry::RetryPolicy;
use crate::sink::{self, Sink};
use crate::state::Shared;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Point-in-time view of an action's runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionStatus {
    /// Events accepted and not yet finished.
    pub in_flight: u64,
    /// Closed batches waiting for the processor.
    pub queued_batches: usize,
    /// Batches the processor has picked up so far.
    pub batches_started: u64,
    pub stopped: bool,
    /// Both workers have exited.
    pub drained: bool,
}

/// A running event action: one sink, one dispatcher, one processor.
///
/// Dropping the handle requests a stop; use [`Action::stop`] and
/// [`Action::wait_stopped`] for an orderly shutdown.
pub struct Action {
    shared: Arc<Shared>,
    config: ActionConfig,
    sender: mpsc::Sender<DispatchMessage>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Action {
    /// Normalize `spec` and start an action delivering to its sink.
    pub fn new(
        id: impl Into<String>,
        allow_private_networks: bool,
        spec: ActionSpec,
    ) -> ActionResult<Self> {
        let config = spec.normalize()?;
        Self::from_config(id, allow_private_networks, config)
    }

    /// Start an action from an already normalized config.
    pub fn from_config(
        id: impl Into<String>,
        allow_private_networks: bool,
        config: ActionConfig,
    ) -> ActionResult<Self> {
        let id = id.into();
        let sink = sink::from_config(&id, allow_private_networks, &config.sink);
        Self::with_sink(id, config, sink)
    }

    /// Start an action delivering through a caller-supplied sink.
    ///
    /// `config.sink` is only used for diagnostics.
    pub fn with_sink(
        id: impl Into<String>,
        config: ActionConfig,
        sink: Arc<dyn Sink>,
    ) -> ActionResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let config = config.clamped();
        let shared = Arc::new(Shared::new(id.into()));
        let (sender, receiver) = mpsc::channel(1);

        let dispatcher = Dispatcher::new(
            shared.clone(),
            receiver,
            config.batch_size,
            config.batch_timeout,
        );
        let processor = Processor::new(
            shared.clone(),
            sink,
            RetryPolicy {
                backoff: config.backoff,
                retry_timeout: config.retry_timeout,
            },
            config.error_handling,
            config.blocked_retry_delay,
        );

        let workers = vec![runtime.spawn(dispatcher.run()), runtime.spawn(processor.run())];

        info!(
            action_id = %shared.id,
            sink = config.sink.kind(),
            batch_size = config.batch_size,
            batch_timeout_ms = config.batch_timeout.map(|t| t.as_millis() as u64),
            error_handling = config.error_handling.as_str(),
            retry_timeout_secs = config.retry_timeout.as_secs(),
            "Action started"
        );

        Ok(Self {
            shared,
            config,
            sender,
            workers: Mutex::new(workers),
        })
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn config(&self) -> &ActionConfig {
        &self.config
    }

    /// Hand an event to the dispatcher.
    ///
    /// The handoff is a one-slot channel, so this returns once the event is
    /// buffered and only waits while the slot holds an event the
    /// dispatcher has not taken yet. It does not wait for delivery;
    /// producers poll [`Action::is_backpressured`] to bound the work they
    /// hand over. Fails with
    /// [`ActionError::Stopped`] once the action is stopped; the event is
    /// dropped and its callback never fires.
    pub async fn submit(&self, event: Event) -> ActionResult<()> {
        if self.shared.is_stopped() {
            return Err(ActionError::Stopped);
        }
        self.sender
            .send(DispatchMessage::Event(event))
            .await
            .map_err(|_| ActionError::Stopped)
    }

    /// True while the number of in-flight events is at least the batch
    /// size. Advisory: [`Action::submit`] still accepts events.
    pub fn is_backpressured(&self) -> bool {
        self.in_flight() >= self.config.batch_size as u64
    }

    pub fn in_flight(&self) -> u64 {
        self.shared.state.lock().in_flight
    }

    pub fn status(&self) -> ActionStatus {
        let state = self.shared.state.lock();
        ActionStatus {
            in_flight: state.in_flight,
            queued_batches: state.queue.len(),
            batches_started: state.batch_count,
            stopped: state.stopped,
            drained: state.dispatcher_done && state.processor_done,
        }
    }

    /// Request shutdown. Returns without waiting for the workers.
    ///
    /// A batch being delivered finishes its current attempt; batches still
    /// open or queued are dropped without firing callbacks. Calling stop
    /// again is a no-op.
    pub async fn stop(&self) {
        if !self.shared.request_stop() {
            return;
        }
        info!(action_id = %self.shared.id, "Stopping action");
        // The dispatcher may already be gone if every sender was dropped
        if self.sender.send(DispatchMessage::Shutdown).await.is_err() {
            warn!(action_id = %self.shared.id, "Dispatcher already exited");
        }
    }

    /// True once both workers have exited.
    pub fn is_drained(&self) -> bool {
        let state = self.shared.state.lock();
        state.dispatcher_done && state.processor_done
    }

    /// Wait for both workers to exit. Only returns after a stop.
    pub async fn wait_stopped(&self) {
        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            if let Err(e) = worker.await {
                warn!(action_id = %self.shared.id, error = %e, "Action worker failed");
            }
        }
    }
}

impl Drop for Action {
    fn drop(&mut self) {
        // The dispatcher sees the channel close; the processor needs the flag
        self.shared.request_stop();
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.shared.id)
            .field("status", &self.status())
            .finish()
    }
}
