//! HTTP client for webhook delivery with a bounded timeout.
//!
//! Performs exactly one request per call and folds every failure mode into a
//! [`DeliveryOutcome`], so the engine handles timeouts, refused connections
//! and error responses through one code path.

use std::{future::Future, pin::Pin, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hookrelay_core::{EventId, HttpMethod, Subscription, WebhookEvent};
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::{
    error::{DeliveryError, Result},
    DEFAULT_TIMEOUT_SECONDS,
};

const TRUNCATION_SUFFIX: &str = "... (truncated)";

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for a single delivery request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Response text longer than this many bytes is truncated.
    pub max_response_body_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            user_agent: "HookRelay/1.0".to_string(),
            max_redirects: 3,
            max_response_body_bytes: 4096,
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Whether the receiver answered with a 2xx status.
    pub success: bool,
    /// Response status, absent when no response was received.
    pub status_code: Option<u16>,
    /// Response text, possibly truncated.
    pub response_body: Option<String>,
    /// Transport error, set only when no response was received.
    pub error_message: Option<String>,
    /// Wall time of the attempt in milliseconds.
    pub duration_ms: u64,
}

impl DeliveryOutcome {
    /// Outcome of an attempt that received a response.
    pub fn responded(status_code: u16, response_body: String, duration: Duration) -> Self {
        Self {
            success: (200..300).contains(&status_code),
            status_code: Some(status_code),
            response_body: Some(response_body),
            error_message: None,
            duration_ms: duration_millis(duration),
        }
    }

    /// Outcome of an attempt that failed before any response.
    pub fn transport_failure(error_message: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            status_code: None,
            response_body: None,
            error_message: Some(error_message.into()),
            duration_ms: duration_millis(duration),
        }
    }
}

/// Sends a single delivery attempt.
///
/// The engine depends on this trait rather than on [`DeliveryClient`] so tests
/// can script outcomes without a network.
pub trait WebhookSender: Send + Sync + 'static {
    /// Delivers `event` to `subscription`'s endpoint.
    ///
    /// `event.attempts` already counts this attempt.
    fn send<'a>(
        &'a self,
        subscription: &'a Subscription,
        event: &'a WebhookEvent,
    ) -> Pin<Box<dyn Future<Output = DeliveryOutcome> + Send + 'a>>;
}

/// JSON body sent to receivers.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    id: EventId,
    #[serde(rename = "type")]
    event_type: &'a str,
    created_at: DateTime<Utc>,
    attempt: i32,
    data: &'a serde_json::Value,
}

/// HTTP client for webhook delivery.
///
/// Holds one pooled `reqwest::Client` shared by every attempt.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Performs one delivery attempt.
    ///
    /// Never fails: transport errors become an outcome with no status code.
    pub async fn deliver(
        &self,
        subscription: &Subscription,
        event: &WebhookEvent,
    ) -> DeliveryOutcome {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "webhook_delivery",
            event_id = %event.id,
            subscription_id = %subscription.id,
            request_id = %request_id,
            url = %subscription.url,
            attempt = event.attempts
        );

        async move {
            let start_time = std::time::Instant::now();
            tracing::debug!("starting webhook delivery");

            let body = match encode_envelope(event) {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode delivery body");
                    return DeliveryOutcome::transport_failure(e.to_string(), start_time.elapsed());
                },
            };

            let mut request =
                self.client.request(to_reqwest_method(subscription.method), &subscription.url);

            for (key, value) in subscription.headers() {
                if is_managed_header(key) {
                    continue;
                }
                match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(value)) {
                    (Ok(name), Ok(value)) => request = request.header(name, value),
                    _ => tracing::warn!(header = %key, "skipping invalid subscription header"),
                }
            }

            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(reqwest::header::USER_AGENT, &self.config.user_agent)
                .header("X-Request-Id", request_id.to_string())
                .header("X-Webhook-Id", subscription.id.to_string())
                .header("X-Event-Id", event.id.to_string())
                .header("X-Event-Type", &event.event_type)
                .body(body);

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {}", e);

                    let error = if e.is_timeout() {
                        DeliveryError::timeout(self.config.timeout.as_secs())
                    } else if e.is_connect() {
                        DeliveryError::network(format!("connection failed: {e}"))
                    } else {
                        DeliveryError::network(e.to_string())
                    };
                    return DeliveryOutcome::transport_failure(error.to_string(), duration);
                },
            };

            let status_code = response.status().as_u16();
            let body = match response.bytes().await {
                Ok(bytes) => truncate_body(&bytes, self.config.max_response_body_bytes),
                Err(e) => {
                    tracing::warn!("failed to read response body: {}", e);
                    format!("[failed to read response body: {e}]")
                },
            };
            let duration = start_time.elapsed();

            if (200..300).contains(&status_code) {
                tracing::info!(
                    status = status_code,
                    duration_ms = duration.as_millis(),
                    "webhook delivered"
                );
            } else {
                tracing::warn!(
                    status = status_code,
                    duration_ms = duration.as_millis(),
                    "receiver returned non-success status"
                );
            }

            DeliveryOutcome::responded(status_code, body, duration)
        }
        .instrument(span)
        .await
    }
}

impl WebhookSender for DeliveryClient {
    fn send<'a>(
        &'a self,
        subscription: &'a Subscription,
        event: &'a WebhookEvent,
    ) -> Pin<Box<dyn Future<Output = DeliveryOutcome> + Send + 'a>> {
        Box::pin(self.deliver(subscription, event))
    }
}

fn encode_envelope(event: &WebhookEvent) -> Result<Bytes> {
    let envelope = Envelope {
        id: event.id,
        event_type: &event.event_type,
        created_at: event.created_at,
        attempt: event.attempts,
        data: event.payload(),
    };

    serde_json::to_vec(&envelope)
        .map(Bytes::from)
        .map_err(|e| DeliveryError::internal(format!("failed to encode delivery body: {e}")))
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// Truncates response text to at most `limit` bytes on a character boundary.
fn truncate_body(bytes: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= limit {
        return text.into_owned();
    }

    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATION_SUFFIX}", &text[..end])
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Checks if a header is set by the delivery system or is hop-by-hop, and
/// must not be copied from the subscription.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_lowercase();
    matches!(
        lowercase.as_str(),
        "content-length"
            | "content-type"
            | "host"
            | "user-agent"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "x-request-id"
            | "x-webhook-id"
            | "x-event-id"
            | "x-event-type"
    )
}
