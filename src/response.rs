//! Uniform response construction.
//!
//! Every response leaving the gateway carries the CORS headers from the
//! configured [`CorsPolicy`], whether it is a success envelope, an error
//! envelope, a preflight answer, or a proxied upstream response.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, CONTENT_TYPE, HeaderMap, HeaderValue,
};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::middleware::policy::CorsPolicy;
use crate::models::{ErrorEnvelope, SuccessEnvelope};

/// Pre-rendered CORS header values.
#[derive(Debug)]
struct CorsHeaders {
    allow_origin: HeaderValue,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    allow_credentials: bool,
    max_age: HeaderValue,
}

impl CorsHeaders {
    fn from_policy(policy: &CorsPolicy) -> Self {
        Self {
            allow_origin: header_value(&policy.allow_origin, "*"),
            allow_methods: header_value(
                &policy.allow_methods.join(","),
                "GET,POST,PUT,DELETE,OPTIONS",
            ),
            allow_headers: header_value(
                &policy.allow_headers.join(","),
                "Content-Type,Authorization,X-API-Key",
            ),
            allow_credentials: policy.allow_credentials,
            max_age: HeaderValue::from(policy.max_age_secs),
        }
    }

    fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
        if self.allow_credentials {
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }
}

fn header_value(value: &str, fallback: &'static str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| {
        warn!(value, fallback, "Invalid CORS header value, using fallback");
        HeaderValue::from_static(fallback)
    })
}

/// Builds success, error and preflight responses with CORS headers.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    cors: Arc<CorsHeaders>,
}

impl ResponseBuilder {
    pub fn new(policy: &CorsPolicy) -> Self {
        Self {
            cors: Arc::new(CorsHeaders::from_policy(policy)),
        }
    }

    /// 200 `{success: true, data, message?, timestamp, requestId}`.
    pub fn success<T: Serialize>(
        &self,
        data: T,
        request_id: &str,
        message: Option<String>,
    ) -> Response {
        let envelope = SuccessEnvelope::new(data, request_id, message);
        match serde_json::to_vec(&envelope) {
            Ok(body) => self.json(StatusCode::OK, body),
            Err(e) => {
                error!(request_id, error = %e, "Failed to serialize success envelope");
                self.error(
                    "An internal error occurred",
                    "INTERNAL_ERROR",
                    StatusCode::INTERNAL_SERVER_ERROR,
                    request_id,
                    None,
                )
            }
        }
    }

    /// `{error, code, details?, timestamp, requestId}` at `status`.
    pub fn error(
        &self,
        error: &str,
        code: &str,
        status: StatusCode,
        request_id: &str,
        details: Option<Value>,
    ) -> Response {
        let envelope = ErrorEnvelope::new(error, code, request_id, details);
        // ErrorEnvelope holds only strings, a timestamp and a JSON value.
        let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| {
            format!(r#"{{"error":"An internal error occurred","code":"INTERNAL_ERROR","requestId":"{request_id}"}}"#)
                .into_bytes()
        });
        self.json(status, body)
    }

    /// 200 with an empty body, CORS headers and `Access-Control-Max-Age`.
    pub fn cors_preflight(&self) -> Response {
        let mut response = Response::new(Body::empty());
        self.cors.apply(response.headers_mut());
        response
            .headers_mut()
            .insert(ACCESS_CONTROL_MAX_AGE, self.cors.max_age.clone());
        response
    }

    /// Add CORS headers to an arbitrary response.
    pub fn with_cors(&self, mut response: Response) -> Response {
        self.cors.apply(response.headers_mut());
        response
    }

    fn json(&self, status: StatusCode, body: Vec<u8>) -> Response {
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.cors.apply(response.headers_mut());
        response
    }
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        Self::new(&CorsPolicy::default())
    }
}
