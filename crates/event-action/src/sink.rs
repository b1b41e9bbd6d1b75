//! Delivery targets.

use crate::config::SinkConfig;
use crate::error::DeliveryResult;
use crate::event::Batch;
use crate::webhook::WebhookSink;
use async_trait::async_trait;
use std::sync::Arc;

/// A downstream target batches are delivered to.
///
/// One call is one delivery attempt. Retries, backoff and the block/skip
/// policy are handled by the caller, so implementations only report whether
/// this attempt succeeded.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Attempt to deliver `batch`. `attempt` is 1-based and only used for
    /// diagnostics.
    async fn attempt_delivery(&self, batch: &Batch, attempt: u64) -> DeliveryResult<()>;
}

/// Build the sink described by `config`.
pub(crate) fn from_config(
    action_id: &str,
    allow_private_networks: bool,
    config: &SinkConfig,
) -> Arc<dyn Sink> {
    match config {
        SinkConfig::Webhook(webhook) => Arc::new(WebhookSink::new(
            action_id,
            webhook.clone(),
            allow_private_networks,
        )),
    }
}
