//! Event action: batching delivery of events to a webhook.
//!
//! An [`Action`] accepts events from a producer, groups them into batches
//! bounded by size and time, and delivers each batch to its sink with
//! retry and exponential backoff. When retries run out the batch is either
//! dropped (`skip`) or re-attempted until it succeeds (`block`).
//!
//! # Core Invariants
//!
//! 1. **FIFO**: batches are delivered in the order they were closed
//! 2. **One callback per subscription**: each batch completes every
//!    subscription once, with its last event in the batch
//! 3. **Callbacks before release**: completion callbacks run before the
//!    batch's events leave the in-flight count
//! 4. **Vetted targets**: webhooks are only dialed on resolved addresses
//!    that passed [`is_address_unsafe`]; redirects are never followed
//!
//! # Architecture
//!
//! ```text
//! submit -> [handoff] -> Dispatcher -> [batch queue] -> Processor -> Sink
//!    ^                                                      |
//!    |____________ in-flight / completion callbacks ________|
//! ```

pub mod action;
pub mod address;
pub mod config;
mod dispatcher;
pub mod error;
pub mod event;
mod processor;
pub mod retry;
pub mod sink;
mod state;
pub mod webhook;

#[cfg(test)]
mod tests;

pub use action::{Action, ActionStatus};
pub use address::is_address_unsafe;
pub use config::{
    ActionConfig, ActionSpec, BackoffConfig, ErrorHandling, SinkConfig, WebhookConfig,
    WebhookSpec, MAX_BATCH_SIZE,
};
pub use error::{ActionError, ActionResult, DeliveryError, DeliveryResult};
pub use event::{Batch, CompletionCallback, Event};
pub use retry::Backoff;
pub use sink::Sink;
pub use webhook::WebhookSink;
