//! Test harness for action scenario tests.
//!
//! Provides:
//! - ScriptedSink: an in-memory sink with scripted attempt results
//! - Completions: a recorder for completion callbacks
//! - MockWebhook: a minimal HTTP/1.1 server on a loopback port
//! - LogCapture: formatted log lines collected for assertions

use crate::config::{ActionConfig, ErrorHandling, SinkConfig, WebhookConfig, WebhookSpec};
use crate::error::{DeliveryError, DeliveryResult};
use crate::event::{Batch, Event};
use crate::sink::Sink;
use crate::Action;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

/// One call to [`ScriptedSink::attempt_delivery`].
#[derive(Debug, Clone)]
pub struct Attempt {
    pub at: Instant,
    #[allow(dead_code)]
    pub attempt: u64,
    pub payloads: Vec<Value>,
    pub succeeded: bool,
}

/// Sink whose attempt results are scripted by the test.
///
/// Queued results are consumed first; once the queue is empty every attempt
/// gets the default result.
pub struct ScriptedSink {
    results: Mutex<VecDeque<bool>>,
    default_ok: Mutex<bool>,
    latency: Duration,
    attempts: Mutex<Vec<Attempt>>,
}

impl ScriptedSink {
    /// A sink that accepts every batch.
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::with_default(true, Duration::ZERO))
    }

    /// A sink that rejects every batch.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self::with_default(false, Duration::ZERO))
    }

    /// A sink that accepts every batch after `latency`.
    pub fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self::with_default(true, latency))
    }

    fn with_default(default_ok: bool, latency: Duration) -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            default_ok: Mutex::new(default_ok),
            latency,
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Script the results of the next attempts.
    pub fn queue_results(&self, results: &[bool]) {
        self.results.lock().extend(results.iter().copied());
    }

    pub fn set_default(&self, ok: bool) {
        *self.default_ok.lock() = ok;
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Payloads of every successfully delivered batch, in delivery order.
    pub fn delivered(&self) -> Vec<Vec<Value>> {
        self.attempts
            .lock()
            .iter()
            .filter(|a| a.succeeded)
            .map(|a| a.payloads.clone())
            .collect()
    }
}

#[async_trait]
impl Sink for ScriptedSink {
    async fn attempt_delivery(&self, batch: &Batch, attempt: u64) -> DeliveryResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let succeeded = {
            let scripted = self.results.lock().pop_front();
            scripted.unwrap_or(*self.default_ok.lock())
        };
        self.attempts.lock().push(Attempt {
            at: Instant::now(),
            attempt,
            payloads: batch.events().iter().map(|e| e.payload().clone()).collect(),
            succeeded,
        });

        if succeeded {
            Ok(())
        } else {
            Err(DeliveryError::Status {
                status: 503,
                body: "scripted failure".to_string(),
            })
        }
    }
}

/// Records completion callbacks as `(sub_id, payload)` pairs.
#[derive(Clone, Default)]
pub struct Completions(Arc<Mutex<Vec<(String, Value)>>>);

impl Completions {
    pub fn new() -> Self {
        Self::default()
    }

    /// An event whose callback is recorded here.
    pub fn event(&self, sub_id: &str, payload: Value) -> Event {
        let calls = self.0.clone();
        Event::new(sub_id, payload).on_complete(move |event| {
            calls
                .lock()
                .push((event.sub_id().to_string(), event.payload().clone()));
        })
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.0.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.0.lock().len()
    }
}

/// Webhook settings pointing at `url`.
pub fn webhook_config(url: &str) -> WebhookConfig {
    WebhookConfig::from_spec(&WebhookSpec {
        url: url.to_string(),
        ..Default::default()
    })
    .unwrap()
}

/// Config for scripted-sink tests; the webhook section is never dialed.
pub fn action_config(
    batch_size: usize,
    batch_timeout: Option<Duration>,
    error_handling: ErrorHandling,
) -> ActionConfig {
    let mut config = ActionConfig::new(SinkConfig::Webhook(webhook_config(
        "http://hooks.invalid/unused",
    )));
    config.batch_size = batch_size;
    config.batch_timeout = batch_timeout;
    config.error_handling = error_handling;
    config
}

/// Start an action delivering to `sink`.
pub fn scripted_action(config: ActionConfig, sink: &Arc<ScriptedSink>) -> Action {
    Action::with_sink("test-action", config, sink.clone()).unwrap()
}

/// Let spawned workers run. Under paused time this also advances the clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// A request received by [`MockWebhook`].
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Minimal HTTP/1.1 webhook endpoint on 127.0.0.1.
///
/// Answers each request with the next queued status, or the default
/// status once the queue is empty, and closes the connection. With
/// [`MockWebhook::redirect_to`] set, every reply carries a `Location`.
pub struct MockWebhook {
    port: u16,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
    statuses: Arc<Mutex<VecDeque<u16>>>,
    default_status: Arc<Mutex<u16>>,
    location: Arc<Mutex<Option<String>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockWebhook {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let statuses = Arc::new(Mutex::new(VecDeque::new()));
        let default_status = Arc::new(Mutex::new(200));
        let location = Arc::new(Mutex::new(None));

        let handle = tokio::spawn({
            let received = received.clone();
            let statuses = statuses.clone();
            let default_status = default_status.clone();
            let location = location.clone();
            async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let received = received.clone();
                    let status = statuses
                        .lock()
                        .pop_front()
                        .unwrap_or(*default_status.lock());
                    let location = location.lock().clone();
                    tokio::spawn(Self::handle_connection(socket, status, location, received));
                }
            }
        });

        Self {
            port,
            received,
            statuses,
            default_status,
            location,
            handle,
        }
    }

    /// URL of the endpoint, using `host` (for example `127.0.0.1` or
    /// `localhost`).
    pub fn url(&self, host: &str, path: &str) -> String {
        format!("http://{}:{}{}", host, self.port, path)
    }

    pub fn queue_statuses(&self, statuses: &[u16]) {
        self.statuses.lock().extend(statuses.iter().copied());
    }

    pub fn set_default_status(&self, status: u16) {
        *self.default_status.lock() = status;
    }

    /// Send `Location: url` with every reply from now on.
    pub fn redirect_to(&self, url: &str) {
        *self.location.lock() = Some(url.to_string());
    }

    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.received.lock().clone()
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().len()
    }

    /// Read one request, record it, then answer with `status`.
    async fn handle_connection(
        mut socket: TcpStream,
        status: u16,
        location: Option<String>,
        received: Arc<Mutex<Vec<ReceivedRequest>>>,
    ) -> Option<()> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let header_end = loop {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let mut lines = head.split("\r\n");
        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let path = request_line.next()?.to_string();

        let headers: HashMap<String, String> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_lowercase(), value.trim().to_string()))
            .collect();
        let content_length: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let mut body = buf[header_end..].to_vec();
        while body.len() < content_length {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }

        // Recorded before replying so a finished attempt is always visible
        received.lock().push(ReceivedRequest {
            method,
            path,
            headers,
            body,
        });

        let reply = format!("status {}", status);
        let location = location
            .map(|url| format!("Location: {}\r\n", url))
            .unwrap_or_default();
        let response = format!(
            "HTTP/1.1 {} Mock\r\nContent-Type: text/plain\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            location,
            reply.len(),
            reply
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
        Some(())
    }
}

impl Drop for MockWebhook {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Log output captured by a thread-local subscriber.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Install a WARN-level subscriber writing into this capture for the
    /// current thread until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let capture = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || capture.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Poll `condition` until it holds or `limit` passes. Returns the final
/// value of the condition.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
