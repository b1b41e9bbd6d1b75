//! Action configuration.
//!
//! [`ActionSpec`] is the JSON form an action is defined with. It is
//! normalized into an [`ActionConfig`], which applies defaults and clamps and
//! rejects anything the workers could not run with.

use crate::error::{ActionError, ActionResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Maximum number of events in one batch.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Delay between re-attempts of a failing batch under [`ErrorHandling::Block`].
pub const DEFAULT_BLOCKED_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Per-request timeout for webhook POSTs when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Initial delay of the retry backoff.
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Multiplier applied to the backoff delay after each failed attempt.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

const WEBHOOK_TYPE: &str = "webhook";

/// Action definition as supplied by the user.
///
/// All fields are optional; see [`ActionSpec::normalize`] for the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    /// Sink kind. Only `webhook` is supported.
    #[serde(rename = "type", default)]
    pub action_type: String,
    #[serde(default)]
    pub batch_size: u64,
    /// Batch timeout in milliseconds. 0 disables time-based closing.
    #[serde(rename = "batchTimeoutMS", default)]
    pub batch_timeout_ms: u64,
    /// `block` or `skip`.
    #[serde(default)]
    pub error_handling: String,
    #[serde(default)]
    pub retry_timeout_sec: u64,
    /// Also accepted under the historical `blockedReryDelaySec` key.
    #[serde(alias = "blockedReryDelaySec", default)]
    pub blocked_retry_delay_sec: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookSpec>,
}

/// Webhook section of an [`ActionSpec`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSpec {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(rename = "tlsSkipHostVerify", default)]
    pub tls_skip_host_verify: bool,
    #[serde(default)]
    pub request_timeout_sec: u64,
}

/// What to do with a batch once the retry controller gives up on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandling {
    /// Keep re-attempting the batch until it is delivered.
    Block,
    /// Drop the batch and move on to the next one.
    #[default]
    Skip,
}

impl ErrorHandling {
    /// Case-insensitive parse. Anything other than `block` means skip.
    pub fn parse_lenient(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("block") {
            Self::Block
        } else {
            Self::Skip
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Skip => "skip",
        }
    }
}

/// Exponential backoff parameters for the retry controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Growth factor applied after every failed attempt.
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_BACKOFF_INITIAL,
            factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

/// Normalized webhook settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: Url,
    /// Validated custom headers, sent on every attempt.
    pub headers: HeaderMap,
    pub tls_skip_host_verify: bool,
    pub request_timeout: Duration,
}

impl WebhookConfig {
    /// Validate a webhook section.
    pub fn from_spec(spec: &WebhookSpec) -> ActionResult<Self> {
        if spec.url.trim().is_empty() {
            return Err(ActionError::Config(
                "Must specify webhook.url for action type 'webhook'".to_string(),
            ));
        }

        let url = Url::parse(spec.url.trim())
            .map_err(|e| ActionError::Config(format!("Invalid URL in webhook action: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ActionError::Config(format!(
                "Unsupported URL scheme '{}' in webhook action",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ActionError::Config(
                "Invalid URL in webhook action: missing host".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &spec.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ActionError::Config(format!("Invalid webhook header name '{}': {}", name, e))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                ActionError::Config(format!("Invalid value for webhook header '{}': {}", name, e))
            })?;
            if header_name == CONTENT_TYPE {
                // The payload is always JSON
                continue;
            }
            headers.insert(header_name, header_value);
        }

        let request_timeout = if spec.request_timeout_sec == 0 {
            DEFAULT_REQUEST_TIMEOUT
        } else {
            Duration::from_secs(spec.request_timeout_sec)
        };

        Ok(Self {
            url,
            headers,
            tls_skip_host_verify: spec.tls_skip_host_verify,
            request_timeout,
        })
    }
}

/// Sink-specific configuration. One variant per supported sink kind.
#[derive(Debug, Clone)]
pub enum SinkConfig {
    Webhook(WebhookConfig),
}

impl SinkConfig {
    /// The `type` string of this sink kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Webhook(_) => WEBHOOK_TYPE,
        }
    }
}

/// Normalized, immutable action configuration.
#[derive(Debug, Clone)]
pub struct ActionConfig {
    /// Events per batch, in `1..=MAX_BATCH_SIZE`.
    pub batch_size: usize,
    /// Time after a batch's first event at which it closes. `None` waits
    /// for a full batch.
    pub batch_timeout: Option<Duration>,
    pub error_handling: ErrorHandling,
    /// Upper bound on the time the retry controller spends on one batch.
    pub retry_timeout: Duration,
    pub blocked_retry_delay: Duration,
    pub backoff: BackoffConfig,
    pub sink: SinkConfig,
}

impl ActionConfig {
    /// Create a config for `sink` with every other setting at its default.
    pub fn new(sink: SinkConfig) -> Self {
        Self {
            batch_size: 1,
            batch_timeout: None,
            error_handling: ErrorHandling::Skip,
            retry_timeout: Duration::ZERO,
            blocked_retry_delay: DEFAULT_BLOCKED_RETRY_DELAY,
            backoff: BackoffConfig::default(),
            sink,
        }
    }

    /// Clamp values a Rust caller may have set out of range.
    pub(crate) fn clamped(mut self) -> Self {
        self.batch_size = self.batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }
}

impl ActionSpec {
    /// Parse a spec from JSON.
    pub fn from_json(json: &str) -> ActionResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ActionError::Config(format!("Invalid action definition: {}", e)))
    }

    /// Apply defaults and clamps, and validate the sink section.
    pub fn normalize(&self) -> ActionResult<ActionConfig> {
        let action_type = self.action_type.trim().to_lowercase();
        let sink = match action_type.as_str() {
            WEBHOOK_TYPE => {
                let webhook = self.webhook.as_ref().ok_or_else(|| {
                    ActionError::Config(
                        "Must specify webhook.url for action type 'webhook'".to_string(),
                    )
                })?;
                SinkConfig::Webhook(WebhookConfig::from_spec(webhook)?)
            }
            other => {
                return Err(ActionError::Config(format!(
                    "Unknown action type '{}'",
                    other
                )))
            }
        };

        let batch_size = usize::try_from(self.batch_size).unwrap_or(MAX_BATCH_SIZE);
        let batch_timeout =
            (self.batch_timeout_ms > 0).then(|| Duration::from_millis(self.batch_timeout_ms));
        let blocked_retry_delay = if self.blocked_retry_delay_sec == 0 {
            DEFAULT_BLOCKED_RETRY_DELAY
        } else {
            Duration::from_secs(self.blocked_retry_delay_sec)
        };

        Ok(ActionConfig {
            batch_size,
            batch_timeout,
            error_handling: ErrorHandling::parse_lenient(&self.error_handling),
            retry_timeout: Duration::from_secs(self.retry_timeout_sec),
            blocked_retry_delay,
            backoff: BackoffConfig::default(),
            sink,
        }
        .clamped())
    }
}
