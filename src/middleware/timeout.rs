//! Client-specified upstream deadlines.
//!
//! A client may send `X-Request-Timeout: <ms>` to shorten how long the gateway
//! waits on the upstream backend. The header can only tighten the configured
//! upstream timeout, never extend it. Values outside
//! `MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS` or that fail to parse
//! are ignored.

use std::time::Duration;

use axum::http::HeaderMap;
use tracing::debug;

/// Minimum honoured request timeout (100ms).
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 100;

/// Maximum honoured request timeout (5 minutes).
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 300_000;

/// Header name for client-specified request timeout.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout";

/// Validated client timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout {
    pub duration: Duration,
}

impl RequestTimeout {
    /// Returns `None` if the value is outside the allowed range.
    pub fn from_millis(ms: u64) -> Option<Self> {
        (MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS)
            .contains(&ms)
            .then(|| Self {
                duration: Duration::from_millis(ms),
            })
    }

    /// Parse the `X-Request-Timeout` header, if present and valid.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let raw = headers.get(REQUEST_TIMEOUT_HEADER)?.to_str().ok()?.trim();

        let Ok(ms) = raw.parse::<u64>() else {
            debug!(value = raw, "Invalid X-Request-Timeout header value, ignoring");
            return None;
        };

        let timeout = Self::from_millis(ms);
        if timeout.is_none() {
            debug!(
                timeout_ms = ms,
                min = MIN_REQUEST_TIMEOUT_MS,
                max = MAX_REQUEST_TIMEOUT_MS,
                "Client timeout outside allowed range, ignoring"
            );
        }
        timeout
    }

    /// The tighter of this timeout and `ceiling`.
    pub fn effective(self, ceiling: Duration) -> Duration {
        self.duration.min(ceiling)
    }
}

/// Upstream timeout for a request: the configured ceiling, tightened by the header.
pub fn effective_timeout(headers: &HeaderMap, ceiling: Duration) -> Duration {
    RequestTimeout::from_headers(headers)
        .map(|timeout| timeout.effective(ceiling))
        .unwrap_or(ceiling)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_TIMEOUT_HEADER, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_request_timeout_bounds() {
        assert!(RequestTimeout::from_millis(MIN_REQUEST_TIMEOUT_MS).is_some());
        assert!(RequestTimeout::from_millis(MAX_REQUEST_TIMEOUT_MS).is_some());
        assert!(RequestTimeout::from_millis(MIN_REQUEST_TIMEOUT_MS - 1).is_none());
        assert!(RequestTimeout::from_millis(MAX_REQUEST_TIMEOUT_MS + 1).is_none());
        assert!(RequestTimeout::from_millis(0).is_none());
    }

    #[test]
    fn test_header_tightens_ceiling() {
        let ceiling = Duration::from_secs(10);
        assert_eq!(
            effective_timeout(&headers_with("2500"), ceiling),
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn test_header_never_extends_ceiling() {
        let ceiling = Duration::from_secs(1);
        assert_eq!(effective_timeout(&headers_with("60000"), ceiling), ceiling);
    }

    #[test]
    fn test_garbage_header_is_ignored() {
        let ceiling = Duration::from_secs(3);
        assert_eq!(effective_timeout(&headers_with("soon"), ceiling), ceiling);
        assert_eq!(effective_timeout(&HeaderMap::new(), ceiling), ceiling);
    }
}
