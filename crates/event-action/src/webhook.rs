//! Webhook sink: one resolve, check, POST cycle per attempt.

use crate::address::is_address_unsafe;
use crate::config::WebhookConfig;
use crate::error::{DeliveryError, DeliveryResult};
use crate::event::Batch;
use crate::sink::Sink;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, error, info, warn, Level};
use url::Host;

/// Connection establishment timeout, separate from the per-request timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivers batches as a JSON array POSTed to a webhook URL.
///
/// The host is resolved to IPv4 on every attempt and the connection is
/// pinned to the resolved address, so the address safety check covers the
/// address that is actually dialed even if DNS changes between attempts.
pub struct WebhookSink {
    action_id: String,
    config: WebhookConfig,
    allow_private_networks: bool,
}

/// Where a single attempt will connect.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedTarget {
    host: String,
    /// Set when the URL names a host rather than an IPv4 literal.
    domain: Option<String>,
    addr: SocketAddr,
}

impl WebhookSink {
    pub fn new(
        action_id: impl Into<String>,
        config: WebhookConfig,
        allow_private_networks: bool,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            config,
            allow_private_networks,
        }
    }

    async fn resolve_target(&self) -> DeliveryResult<ResolvedTarget> {
        let url = &self.config.url;
        let port = url.port_or_known_default().unwrap_or(80);

        let (host, domain, ip) = match url.host() {
            Some(Host::Ipv4(ip)) => (ip.to_string(), None, ip),
            Some(Host::Domain(domain)) => {
                let ip = resolve_ipv4(domain, port).await?;
                (domain.to_string(), Some(domain.to_string()), ip)
            }
            Some(Host::Ipv6(ip)) => return Err(DeliveryError::NoIpv4Address(ip.to_string())),
            None => return Err(DeliveryError::NoIpv4Address(String::new())),
        };

        if is_address_unsafe(self.allow_private_networks, ip) {
            let err = DeliveryError::UnsafeTarget { host, addr: ip };
            error!(action_id = %self.action_id, error = %err, "Refusing webhook target");
            return Err(err);
        }

        Ok(ResolvedTarget {
            host,
            domain,
            addr: SocketAddr::new(ip.into(), port),
        })
    }

    fn build_client(&self, target: &ResolvedTarget) -> DeliveryResult<Client> {
        let mut builder = Client::builder()
            .timeout(self.config.request_timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(self.config.tls_skip_host_verify)
            // A proxy or a redirect would dial an address that was never checked
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none());
        if let Some(domain) = &target.domain {
            builder = builder.resolve(domain, target.addr);
        }
        Ok(builder.build()?)
    }
}

#[async_trait]
impl Sink for WebhookSink {
    async fn attempt_delivery(&self, batch: &Batch, attempt: u64) -> DeliveryResult<()> {
        let target = self.resolve_target().await?;
        let body = batch.to_json()?;
        let client = self.build_client(&target)?;
        let url = self.config.url.as_str();

        info!(
            action_id = %self.action_id,
            url = %url,
            addr = %target.addr,
            attempt = attempt,
            events = batch.len(),
            "POST -->"
        );

        let result = async {
            let response = client
                .post(self.config.url.clone())
                .headers(self.config.headers.clone())
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await?;

            let status = response.status();
            let ok = status.is_success();
            info!(
                action_id = %self.action_id,
                url = %url,
                status = status.as_u16(),
                ok = ok,
                "POST <--"
            );

            if !ok || tracing::enabled!(Level::DEBUG) {
                let body = response.text().await.unwrap_or_default();
                if ok {
                    debug!(action_id = %self.action_id, body = %body, "Response body");
                } else {
                    warn!(
                        action_id = %self.action_id,
                        status = status.as_u16(),
                        body = %body,
                        "Response body"
                    );
                    return Err(DeliveryError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = &result {
            warn!(
                action_id = %self.action_id,
                url = %url,
                host = %target.host,
                attempt = attempt,
                error = %e,
                "POST failed"
            );
        }
        result
    }
}

/// Resolve `host` to its first IPv4 address.
async fn resolve_ipv4(host: &str, port: u16) -> DeliveryResult<Ipv4Addr> {
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| DeliveryError::Resolve {
            host: host.to_string(),
            source,
        })?;

    addrs
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| DeliveryError::NoIpv4Address(host.to_string()))
}
