//! Scenario tests for event actions.
//!
//! - `harness.rs`        - Scripted sink, callback recorder, mock webhook server
//! - `batching.rs`       - Size and time based batch closing, ordering, coalescing
//! - `failure_policy.rs` - Retry exhaustion under skip and block
//! - `backpressure.rs`   - In-flight accounting and the backpressure signal
//! - `shutdown.rs`       - Stop, partial batches and worker exit
//! - `webhook.rs`        - HTTP delivery against a local endpoint

mod backpressure;
pub(crate) mod harness;
