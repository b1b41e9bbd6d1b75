//! Events and batches.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use tokio::time::Instant;

/// Called once a batch containing the event has finished processing.
///
/// Receives the last event of the batch for the event's subscription.
pub type CompletionCallback = Box<dyn FnOnce(&Event) + Send + Sync + 'static>;

/// A single event handed to an action by the producer.
pub struct Event {
    sub_id: String,
    payload: serde_json::Value,
    on_complete: Option<CompletionCallback>,
}

impl Event {
    /// Create an event without a completion callback.
    pub fn new(sub_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            sub_id: sub_id.into(),
            payload,
            on_complete: None,
        }
    }

    /// Attach the completion callback.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Event) + Send + Sync + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Subscription this event belongs to.
    pub fn sub_id(&self) -> &str {
        &self.sub_id
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Invoke the completion callback, if any, with this event.
    pub(crate) fn complete(mut self) {
        if let Some(callback) = self.on_complete.take() {
            callback(&self);
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("sub_id", &self.sub_id)
            .field("payload", &self.payload)
            .field("has_callback", &self.on_complete.is_some())
            .finish()
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Event", 2)?;
        state.serialize_field("subId", &self.sub_id)?;
        state.serialize_field("payload", &self.payload)?;
        state.end()
    }
}

/// A closed, non-empty group of events delivered together.
///
/// Events keep their arrival order. A batch is never modified after the
/// dispatcher closes it.
#[derive(Debug)]
pub struct Batch {
    events: Vec<Event>,
    opened_at: Instant,
}

impl Batch {
    pub(crate) fn new(events: Vec<Event>, opened_at: Instant) -> Self {
        debug_assert!(!events.is_empty(), "batches are never empty");
        Self { events, opened_at }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// When the first event of the batch arrived.
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// JSON array of the events, in order.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.events)
    }

    /// Fire one completion callback per distinct subscription.
    ///
    /// Each subscription is completed with its last event in the batch;
    /// callbacks of earlier events for the same subscription are dropped.
    /// Returns the number of callbacks considered (one per subscription).
    pub(crate) fn complete(self) -> usize {
        let mut last_index: HashMap<&str, usize> = HashMap::new();
        for (index, event) in self.events.iter().enumerate() {
            last_index.insert(event.sub_id(), index);
        }
        let keep: Vec<bool> = self
            .events
            .iter()
            .enumerate()
            .map(|(index, event)| last_index.get(event.sub_id()) == Some(&index))
            .collect();
        let subscriptions = last_index.len();

        for (event, keep) in self.events.into_iter().zip(keep) {
            if keep {
                event.complete();
            }
        }
        subscriptions
    }
}
