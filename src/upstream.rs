//! HTTP client for the transit backend.
//!
//! # Resilience
//!
//! - **Timeout**: every attempt is bounded by the configured upstream timeout,
//!   tightened per request by `X-Request-Timeout`.
//! - **Retry**: idempotent `GET` calls are retried on transport failures and
//!   on 502/503/504, with exponential backoff and ±20% jitter. Other methods
//!   are attempted exactly once.

use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics;

/// Jitter applied to retry delays (±20%).
const BACKOFF_JITTER_PERCENT: f64 = 0.2;

/// Floor for any retry delay.
const MIN_RETRY_DELAY_MS: u64 = 10;

/// Client headers forwarded to the upstream on every call.
pub const FORWARDED_HEADERS: [&str; 2] = ["authorization", "x-api-key"];

/// Upstream call failure.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(StatusCode),

    #[error("invalid upstream payload: {0}")]
    InvalidPayload(String),

    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),
}

impl UpstreamError {
    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::Transport(_) => "transport",
            UpstreamError::Status(_) => "status",
            UpstreamError::InvalidPayload(_) => "invalid_payload",
            UpstreamError::InvalidUrl(_) => "invalid_url",
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) | UpstreamError::Transport(_) => true,
            UpstreamError::Status(status) => is_retryable_status(*status),
            UpstreamError::InvalidPayload(_) | UpstreamError::InvalidUrl(_) => false,
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Bounded exponential backoff for idempotent calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first (0 = no retries)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Un-jittered delay before retry number `retry` (1-based).
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let delay = base.saturating_mul(2u64.saturating_pow(retry.saturating_sub(1)));
        Duration::from_millis(delay.min(self.max_delay.as_millis() as u64))
    }

    fn jittered_delay_for(&self, retry: u32) -> Duration {
        let delay_ms = self.base_delay_for(retry).as_millis() as u64;
        let jitter = (delay_ms as f64
            * BACKOFF_JITTER_PERCENT
            * (rand::rng().random::<f64>() * 2.0 - 1.0)) as i64;
        Duration::from_millis((delay_ms as i64 + jitter).max(MIN_RETRY_DELAY_MS as i64) as u64)
    }
}

/// One call to the upstream backend.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    label: &'static str,
}

impl UpstreamRequest {
    /// `path` is relative to the upstream base URL.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            label: "upstream",
        }
    }

    /// Encode the present `(name, value)` pairs as the query string.
    pub fn query_params(mut self, params: &[(&str, Option<&str>)]) -> Self {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        let mut any = false;
        for (name, value) in params {
            if let Some(value) = value {
                serializer.append_pair(name, value);
                any = true;
            }
        }
        self.query = any.then(|| serializer.finish());
        self
    }

    /// Use an already-encoded query string verbatim.
    pub fn raw_query(mut self, query: Option<&str>) -> Self {
        self.query = query.filter(|q| !q.is_empty()).map(str::to_string);
        self
    }

    /// Copy the caller's credential headers.
    pub fn forward_auth(mut self, incoming: &HeaderMap) -> Self {
        for name in FORWARDED_HEADERS {
            if let Some(value) = incoming.get(name) {
                self.headers.insert(HeaderName::from_static(name), value.clone());
            }
        }
        self
    }

    /// Attach a raw body with an optional content type.
    pub fn body(mut self, body: Bytes, content_type: Option<HeaderValue>) -> Self {
        if let Some(content_type) = content_type {
            self.headers.insert(CONTENT_TYPE, content_type);
        }
        self.body = Some(body);
        self
    }

    /// Attach a JSON body.
    pub fn json(self, value: &Value) -> Self {
        let bytes = Bytes::from(value.to_string());
        self.body(bytes, Some(HeaderValue::from_static("application/json")))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Endpoint label for metrics and logs.
    pub fn label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }
}

/// Shared upstream client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    retry: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, UpstreamError> {
        let base_url =
            Url::parse(base_url).map_err(|e| UpstreamError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(UpstreamError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                base_url.scheme()
            )));
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(UpstreamError::Transport)?;

        Ok(Self {
            http,
            base_url,
            timeout,
            retry,
        })
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        Self::new(
            &config.upstream_base_url,
            config.upstream_timeout,
            RetryPolicy {
                max_retries: config.upstream_retries,
                base_delay: config.upstream_retry_base_delay,
                max_delay: config.upstream_retry_max_delay,
            },
        )
        .map_err(|e| AppError::ConfigError(format!("UPSTREAM_BASE_URL: {e}")))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Configured per-attempt timeout ceiling.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `<base>/<path>[?query]`, tolerant of slashes on either side.
    pub fn endpoint_url(&self, path: &str, query: Option<&str>) -> Result<Url, UpstreamError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url =
            Url::parse(&joined).map_err(|e| UpstreamError::InvalidUrl(format!("{joined}: {e}")))?;
        url.set_query(query);
        Ok(url)
    }

    /// Send a request and return the raw response, whatever its status.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path, label = request.label))]
    pub async fn send(&self, request: UpstreamRequest) -> Result<reqwest::Response, UpstreamError> {
        let url = self.endpoint_url(&request.path, request.query.as_deref())?;
        let timeout = request.timeout.unwrap_or(self.timeout).min(self.timeout);
        let max_retries = if request.method == Method::GET {
            self.retry.max_retries
        } else {
            0
        };

        let mut retry = 0;
        loop {
            let started = Instant::now();
            let mut builder = self
                .http
                .request(request.method.clone(), url.clone())
                .headers(request.headers.clone())
                .timeout(timeout);
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let outcome = builder.send().await;
            metrics::record_upstream_duration(request.label, started.elapsed().as_secs_f64());

            let failure = match outcome {
                Ok(response) if is_retryable_status(response.status()) && retry < max_retries => {
                    UpstreamError::Status(response.status())
                }
                Ok(response) => {
                    debug!(status = %response.status(), retry, "Upstream responded");
                    return Ok(response);
                }
                Err(e) if e.is_timeout() => UpstreamError::Timeout(timeout),
                Err(e) => UpstreamError::Transport(e),
            };

            if retry >= max_retries || !failure.is_retryable() {
                metrics::record_upstream_error(request.label, failure.kind());
                return Err(failure);
            }

            retry += 1;
            let delay = self.retry.jittered_delay_for(retry);
            warn!(
                retry,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Retrying upstream call"
            );
            metrics::record_upstream_retry(request.label);
            sleep(delay).await;
        }
    }

    /// Send a request and require a 2xx status.
    pub async fn send_ok(&self, request: UpstreamRequest) -> Result<reqwest::Response, UpstreamError> {
        let label = request.label;
        let response = self.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            metrics::record_upstream_error(label, "status");
            return Err(UpstreamError::Status(status));
        }
        Ok(response)
    }

    /// Send a request, require a 2xx status and parse the body as JSON.
    pub async fn fetch_json(&self, request: UpstreamRequest) -> Result<Value, UpstreamError> {
        let label = request.label;
        let response = self.send_ok(request).await?;

        let bytes = response.bytes().await.map_err(|e| {
            metrics::record_upstream_error(label, "transport");
            UpstreamError::Transport(e)
        })?;

        serde_json::from_slice(&bytes).map_err(|e| {
            metrics::record_upstream_error(label, "invalid_payload");
            UpstreamError::InvalidPayload(format!("response is not valid JSON: {e}"))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retries(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
        }
    }

    async fn client(server: &MockServer, retry: RetryPolicy) -> UpstreamClient {
        UpstreamClient::new(&server.uri(), Duration::from_secs(2), retry).unwrap()
    }

    #[test]
    fn test_endpoint_url_joins_slashes() {
        let client = UpstreamClient::new(
            "https://transit.example/v1/",
            Duration::from_secs(1),
            RetryPolicy::none(),
        )
        .unwrap();

        let url = client.endpoint_url("/bus/location", Some("routeId=1A")).unwrap();
        assert_eq!(url.as_str(), "https://transit.example/v1/bus/location?routeId=1A");
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        assert!(UpstreamClient::new("ftp://x", Duration::from_secs(1), RetryPolicy::none()).is_err());
        assert!(UpstreamClient::new("not a url", Duration::from_secs(1), RetryPolicy::none()).is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(700),
        };
        assert_eq!(policy.base_delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.base_delay_for(3), Duration::from_millis(700));
    }

    #[test]
    fn test_query_params_skip_absent_values() {
        let request = UpstreamRequest::new(Method::GET, "route").query_params(&[
            ("routeId", Some("1A")),
            ("includeStops", None),
        ]);
        assert_eq!(request.query.as_deref(), Some("routeId=1A"));

        let empty = UpstreamRequest::new(Method::GET, "route").query_params(&[("routeId", None)]);
        assert!(empty.query.is_none());
    }

    #[tokio::test]
    async fn test_fetch_json_forwards_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/route"))
            .and(query_param("routeId", "1A"))
            .and(header("x-api-key", "mtc_abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mut incoming = HeaderMap::new();
        incoming.insert("x-api-key", HeaderValue::from_static("mtc_abc"));
        incoming.insert("cookie", HeaderValue::from_static("session=1"));

        let value = client(&server, RetryPolicy::none())
            .await
            .fetch_json(
                UpstreamRequest::new(Method::GET, "route")
                    .query_params(&[("routeId", Some("1A"))])
                    .forward_auth(&incoming),
            )
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_get_is_retried_on_503() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stop"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/stop"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let value = client(&server, fast_retries(2))
            .await
            .fetch_json(UpstreamRequest::new(Method::GET, "stop"))
            .await
            .unwrap();
        assert_eq!(value, json!([]));
    }

    #[tokio::test]
    async fn test_retries_exhausted_surface_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server, fast_retries(2))
            .await
            .fetch_json(UpstreamRequest::new(Method::GET, "route"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Status(StatusCode::BAD_GATEWAY)));
    }

    #[tokio::test]
    async fn test_post_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bus/location"))
            .and(body_json(json!({"busId": "MTC001"})))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server, fast_retries(3))
            .await
            .send(UpstreamRequest::new(Method::POST, "bus/location").json(&json!({"busId": "MTC001"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, fast_retries(3))
            .await
            .fetch_json(UpstreamRequest::new(Method::GET, "route"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Status(StatusCode::NOT_FOUND)));
    }

    #[tokio::test]
    async fn test_invalid_json_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server, RetryPolicy::none())
            .await
            .fetch_json(UpstreamRequest::new(Method::GET, "route"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_request_timeout_is_enforced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let err = client(&server, RetryPolicy::none())
            .await
            .send(UpstreamRequest::new(Method::GET, "realtime").timeout(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = UpstreamClient::new(
            "http://127.0.0.1:9",
            Duration::from_millis(500),
            RetryPolicy::none(),
        )
        .unwrap();
        let err = client.send(UpstreamRequest::new(Method::GET, "route")).await.unwrap_err();
        assert!(matches!(
            err,
            UpstreamError::Transport(_) | UpstreamError::Timeout(_)
        ));
    }
}
