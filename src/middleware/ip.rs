//! Client IP extraction.
//!
//! # Priority
//!
//! 1. `X-Forwarded-For` (first, leftmost address)
//! 2. `X-Real-IP`
//! 3. The socket peer address, when the server was started with
//!    `into_make_service_with_connect_info::<SocketAddr>()`
//! 4. [`UNKNOWN_IP`]
//!
//! # Security Warning
//!
//! Forwarding headers are client-controlled. Deploy the gateway behind a
//! reverse proxy that overwrites them, otherwise callers can rotate spoofed
//! addresses to dodge per-IP rate limits.
//!
//! All requests without an identifiable address share the `"unknown"`
//! partition key.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};

/// Fallback IP value when no client IP can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Where the client address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

#[inline]
fn extract_ip_from_headers(headers: &HeaderMap) -> ExtractedIp<'_> {
    // Format: "client, proxy1, proxy2"
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
        && !first_ip.trim().is_empty()
    {
        return ExtractedIp::FromXff(first_ip.trim());
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return ExtractedIp::FromRealIp(value.trim());
    }

    ExtractedIp::NotFound
}

/// Resolve the client IP from forwarding headers, then the peer address.
///
/// Returns `Cow::Borrowed(UNKNOWN_IP)` when nothing is available.
#[inline]
pub fn extract_client_ip(headers: &HeaderMap, extensions: &Extensions) -> Cow<'static, str> {
    match extract_ip_from_headers(headers) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => Cow::Owned(ip.to_string()),
        ExtractedIp::NotFound => extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| Cow::Owned(addr.ip().to_string()))
            .unwrap_or(Cow::Borrowed(UNKNOWN_IP)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_extract_ip_from_xff() {
        let map = headers(&[("x-forwarded-for", "192.168.1.1, 10.0.0.1")]);
        assert_eq!(extract_client_ip(&map, &Extensions::new()), "192.168.1.1");
    }

    #[test]
    fn test_xff_takes_priority_over_real_ip() {
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.50"),
            ("x-real-ip", "10.0.0.2"),
        ]);
        assert_eq!(extract_client_ip(&map, &Extensions::new()), "203.0.113.50");
    }

    #[test]
    fn test_extract_ip_from_real_ip() {
        let map = headers(&[("x-real-ip", " 10.0.0.2 ")]);
        assert_eq!(extract_client_ip(&map, &Extensions::new()), "10.0.0.2");
    }

    #[test]
    fn test_falls_back_to_peer_address() {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4321))));
        assert_eq!(extract_client_ip(&HeaderMap::new(), &extensions), "127.0.0.1");
    }

    #[test]
    fn test_unknown_without_any_source() {
        let ip = extract_client_ip(&HeaderMap::new(), &Extensions::new());
        assert_eq!(ip, UNKNOWN_IP);
        assert!(matches!(ip, Cow::Borrowed(_)));
    }

    #[test]
    fn test_empty_xff_is_ignored() {
        let map = headers(&[("x-forwarded-for", " "), ("x-real-ip", "10.0.0.3")]);
        assert_eq!(extract_client_ip(&map, &Extensions::new()), "10.0.0.3");
    }
}
