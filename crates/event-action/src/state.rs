//! State shared between the dispatcher, the processor and the action handle.

use crate::event::Batch;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

/// Everything guarded by the action's monitor lock.
#[derive(Debug, Default)]
pub(crate) struct ActionState {
    pub stopped: bool,
    /// Events accepted by the dispatcher and not yet released by the processor.
    pub in_flight: u64,
    /// Closed batches waiting for the processor, oldest first.
    pub queue: VecDeque<Batch>,
    /// Sequence number of the last batch the processor picked up.
    pub batch_count: u64,
    pub dispatcher_done: bool,
    pub processor_done: bool,
}

/// Monitor shared by the action's workers.
///
/// `work_ready` plays the role of the condition variable: the dispatcher
/// signals it after pushing a batch, `stop` signals it after setting the
/// stop flag. `shutdown` wakes anything sleeping through a backoff or a
/// blocked-retry delay.
#[derive(Debug)]
pub(crate) struct Shared {
    pub id: String,
    pub state: Mutex<ActionState>,
    pub work_ready: Notify,
    pub shutdown: Notify,
}

impl Shared {
    pub fn new(id: String) -> Self {
        Self {
            id,
            state: Mutex::new(ActionState::default()),
            work_ready: Notify::new(),
            shutdown: Notify::new(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Set the stop flag and wake every waiter. Returns false if the action
    /// was already stopped.
    pub fn request_stop(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return false;
            }
            state.stopped = true;
        }
        self.work_ready.notify_one();
        self.shutdown.notify_waiters();
        true
    }

    pub fn add_in_flight(&self, count: u64) {
        self.state.lock().in_flight += count;
    }

    pub fn release_in_flight(&self, count: u64) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(count);
    }

    /// Push a closed batch and signal the processor.
    ///
    /// After stop the batch is dropped instead and its events are released,
    /// since the processor may already have drained the queue. Returns
    /// whether the batch was queued.
    pub fn enqueue(&self, batch: Batch) -> bool {
        {
            let mut state = self.state.lock();
            if state.stopped {
                state.in_flight = state.in_flight.saturating_sub(batch.len() as u64);
                return false;
            }
            state.queue.push_back(batch);
        }
        self.work_ready.notify_one();
        true
    }

    /// Sleep for `delay` unless the action is stopped first.
    ///
    /// Returns true if the full delay elapsed, false if stop cut it short
    /// (or had already been requested).
    pub async fn sleep_unless_stopped(&self, delay: Duration) -> bool {
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        // Register before checking the flag so a concurrent stop is not missed
        shutdown.as_mut().enable();

        if self.is_stopped() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = shutdown => false,
        }
    }
}
