//! HTTP client for webhook delivery with per-endpoint timeouts.
//!
//! Handles request construction, response capture, and error
//! categorization for the retry scheduler. The client performs exactly one
//! attempt per call; retry orchestration lives entirely in the engine.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use fanout_core::models::{DeliveryId, EventId, ResponseRecord};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::error::DeliveryError;

/// Maximum captured response body size; longer bodies are truncated.
const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;

/// Configuration for the delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default timeout applied when an endpoint does not set one.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: "fanout-delivery/0.1".to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// One outbound delivery attempt, fully assembled by the engine.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Delivery this attempt belongs to.
    pub delivery_id: DeliveryId,
    /// Event being delivered.
    pub event_id: EventId,
    /// The event's type string, sent as a header.
    pub event_type: String,
    /// Destination URL.
    pub url: String,
    /// Serialized request body. Signatures are computed over these exact
    /// bytes before the request is built.
    pub body: Bytes,
    /// Signature header name and hex value, when the endpoint signs.
    pub signature: Option<(String, String)>,
    /// Endpoint-declared extra headers.
    pub headers: HashMap<String, String>,
    /// Hard timeout for this request.
    pub timeout: Duration,
    /// 1-based attempt number, sent as a header.
    pub attempt: u32,
    /// Wall-clock send time, sent as an ISO-8601 header.
    pub timestamp: DateTime<Utc>,
}

/// HTTP client optimized for webhook delivery.
///
/// Uses connection pooling so many endpoints can be delivered to
/// concurrently, and categorizes transport failures for retry decisions.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
}

impl DeliveryClient {
    /// Creates a delivery client from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Configuration`] if the underlying HTTP
    /// client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| DeliveryError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Creates a client with default configuration.
    pub fn with_defaults() -> Result<Self, DeliveryError> {
        Self::new(&ClientConfig::default())
    }

    /// Performs a single delivery attempt.
    ///
    /// Any HTTP response, success or not, is captured and returned; the
    /// caller decides what a non-2xx status means. Only transport-level
    /// failures (connect errors, timeouts) are returned as errors.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Timeout`] when the endpoint's timeout
    /// elapses and [`DeliveryError::Network`] for connection failures.
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<ResponseRecord, DeliveryError> {
        let span = info_span!(
            "webhook_delivery",
            delivery_id = %request.delivery_id,
            event_id = %request.event_id,
            url = %request.url,
            attempt = request.attempt,
        );

        async move {
            let start = std::time::Instant::now();

            let mut http_request = self
                .client
                .post(&request.url)
                .timeout(request.timeout)
                .header("content-type", "application/json")
                .header("X-Fanout-Event", &request.event_type)
                .header("X-Fanout-Event-Id", request.event_id.to_string())
                .header("X-Fanout-Timestamp", request.timestamp.to_rfc3339())
                .header("X-Fanout-Attempt", request.attempt.to_string());

            if let Some((header, value)) = &request.signature {
                http_request = http_request.header(header, value);
            }

            for (key, value) in &request.headers {
                if !is_managed_header(key) {
                    http_request = http_request.header(key, value);
                }
            }

            let response = match http_request.body(request.body.clone()).send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start.elapsed();
                    warn!(duration_ms = duration.as_millis(), error = %e, "request failed");

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(request.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start.elapsed();
            let status = response.status().as_u16();
            let headers = extract_headers(response.headers());
            let body = capture_body(response).await;

            debug!(status, duration_ms = duration.as_millis(), "received response");

            Ok(ResponseRecord { status, headers, body, duration })
        }
        .instrument(span)
        .await
    }
}

/// Reads the response body, truncating oversized payloads.
async fn capture_body(response: reqwest::Response) -> String {
    match response.bytes().await {
        Ok(bytes) => {
            if bytes.len() > MAX_RESPONSE_BODY_SIZE {
                let truncated = String::from_utf8_lossy(&bytes[..MAX_RESPONSE_BODY_SIZE]);
                format!("{truncated}... (truncated)")
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            }
        },
        Err(e) => {
            warn!(error = %e, "failed to read response body");
            format!("[failed to read response body: {e}]")
        },
    }
}

/// Extracts response headers into a plain map.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for (key, value) in header_map {
        if let Ok(value_str) = value.to_str() {
            headers.insert(key.to_string(), value_str.to_string());
        }
    }
    headers
}

/// Headers owned by the delivery system; endpoint-declared headers may not
/// override them.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_ascii_lowercase();
    matches!(
        lowercase.as_str(),
        "content-length"
            | "content-type"
            | "host"
            | "user-agent"
            | "connection"
            | "keep-alive"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_request(url: String) -> DeliveryRequest {
        DeliveryRequest {
            delivery_id: DeliveryId::new(),
            event_id: EventId::new(),
            event_type: "order.created".to_string(),
            url,
            body: Bytes::from_static(b"{\"id\":1}"),
            signature: None,
            headers: HashMap::new(),
            timeout: Duration::from_secs(5),
            attempt: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn successful_delivery_captures_response() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let record = client.deliver(test_request(format!("{}/hook", server.uri()))).await.unwrap();

        assert_eq!(record.status, 200);
        assert!(record.is_success());
        assert_eq!(record.body, "OK");
    }

    #[tokio::test]
    async fn non_2xx_response_is_captured_not_errored() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let record = client.deliver(test_request(format!("{}/hook", server.uri()))).await.unwrap();

        assert_eq!(record.status, 503);
        assert!(!record.is_success());
        assert_eq!(record.body, "unavailable");
    }

    #[tokio::test]
    async fn delivery_metadata_headers_added() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::header("X-Fanout-Event", "order.created"))
            .and(matchers::header_exists("X-Fanout-Event-Id"))
            .and(matchers::header_exists("X-Fanout-Timestamp"))
            .and(matchers::header("X-Fanout-Attempt", "1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        client.deliver(test_request(format!("{}/hook", server.uri()))).await.unwrap();

        server.verify().await;
    }

    #[tokio::test]
    async fn signature_header_attached_when_present() {
        let server = MockServer::start().await;
        Mock::given(matchers::header("X-Fanout-Signature", "deadbeef"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let mut request = test_request(format!("{}/hook", server.uri()));
        request.signature = Some(("X-Fanout-Signature".to_string(), "deadbeef".to_string()));
        client.deliver(request).await.unwrap();

        server.verify().await;
    }

    #[tokio::test]
    async fn endpoint_headers_forwarded_except_managed() {
        let server = MockServer::start().await;
        Mock::given(matchers::header("X-Custom", "value"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let mut request = test_request(format!("{}/hook", server.uri()));
        request.headers.insert("X-Custom".to_string(), "value".to_string());
        // Attempted content-type override must be ignored.
        request.headers.insert("Content-Type".to_string(), "text/plain".to_string());
        client.deliver(request).await.unwrap();

        server.verify().await;
    }

    #[tokio::test]
    async fn timeout_aborts_slow_endpoint() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let mut request = test_request(format!("{}/hook", server.uri()));
        request.timeout = Duration::from_millis(100);

        let result = client.deliver(request).await;
        assert!(matches!(result, Err(DeliveryError::Timeout { .. })));
    }

    #[tokio::test]
    async fn connection_failure_is_network_error() {
        let client = DeliveryClient::with_defaults().unwrap();
        // Port 9 (discard) is almost certainly closed.
        let result = client.deliver(test_request("http://127.0.0.1:9/hook".to_string())).await;
        assert!(matches!(result, Err(DeliveryError::Network { .. })));
    }

    #[test]
    fn managed_headers_identified() {
        assert!(is_managed_header("Content-Length"));
        assert!(is_managed_header("content-type"));
        assert!(is_managed_header("HOST"));
        assert!(!is_managed_header("X-Custom"));
        assert!(!is_managed_header("Authorization"));
    }
}
