use axum::http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::{Value, json};
use thiserror::Error;

use crate::middleware::auth::AuthError;
use crate::response::ResponseBuilder;
use crate::routes::Endpoint;
use crate::upstream::UpstreamError;

/// Header advertising the configured window budget on 429 responses.
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";

/// Header advertising the remaining budget on 429 responses.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Application-wide error types with stable error codes and HTTP statuses.
///
/// Every variant is rendered as the gateway error envelope
/// (`{error, code, details?, timestamp, requestId}`) by [`AppError::to_response`].
///
/// # Propagation
///
/// - Validation and routing failures are raised by the handler that detects them.
/// - Infrastructure faults (auth store, upstream calls) are converted at the
///   boundary that owns them: `AuthFailed` by the pipeline, `Upstream` by the
///   domain handlers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimitExceeded { retry_after: u64, limit: u32 },

    #[error("Authentication required")]
    AuthRequired,

    #[error("Authentication failed: {0}")]
    AuthFailed(#[from] AuthError),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("{endpoint} request failed: {source}")]
    Upstream {
        endpoint: Endpoint,
        #[source]
        source: UpstreamError,
    },

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Wrap an upstream failure with the endpoint that issued the call.
    pub fn upstream(endpoint: Endpoint, source: UpstreamError) -> Self {
        Self::Upstream { endpoint, source }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::AuthRequired => "AUTH_REQUIRED",
            AppError::AuthFailed(_) => "AUTH_ERROR",
            AppError::InvalidBody(_) => "INVALID_BODY",
            AppError::InvalidData(_) => "INVALID_DATA",
            AppError::MethodNotAllowed(_) => "METHOD_NOT_ALLOWED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Upstream { endpoint, .. } => endpoint.error_code(),
            AppError::Internal(_) | AppError::ConfigError(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for this error.
    ///
    /// Upstream failures are always surfaced as 500: the specific upstream
    /// status is never passed through for typed endpoints.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::AuthRequired => StatusCode::UNAUTHORIZED,
            AppError::InvalidBody(_) | AppError::InvalidData(_) => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AuthFailed(_)
            | AppError::Upstream { .. }
            | AppError::Internal(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error represents a server-side fault (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }

    /// Client-facing message. Internal details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            AppError::RateLimitExceeded { .. } => {
                "Too many requests. Please retry later.".to_string()
            }
            AppError::AuthRequired => {
                "Authentication required. Provide an X-API-Key header or a Bearer token."
                    .to_string()
            }
            AppError::AuthFailed(_) => "Authentication could not be completed".to_string(),
            AppError::InvalidBody(msg) | AppError::InvalidData(msg) | AppError::NotFound(msg) => {
                msg.clone()
            }
            AppError::MethodNotAllowed(method) => format!("Method {method} not allowed"),
            AppError::Upstream { endpoint, .. } => endpoint.failure_message().to_string(),
            AppError::Internal(_) | AppError::ConfigError(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// Optional structured details attached to the envelope.
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::RateLimitExceeded { retry_after, limit } => Some(json!({
                "retryAfter": retry_after,
                "limit": limit,
            })),
            _ => None,
        }
    }

    /// Render this error as a gateway error envelope.
    pub fn to_response(&self, responses: &ResponseBuilder, request_id: &str) -> Response {
        let mut response = responses.error(
            &self.client_message(),
            self.code(),
            self.status(),
            request_id,
            self.details(),
        );

        if let AppError::RateLimitExceeded { retry_after, limit } = self {
            let headers = response.headers_mut();
            headers.insert(RETRY_AFTER, HeaderValue::from(*retry_after));
            headers.insert(
                HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER),
                HeaderValue::from(*limit),
            );
            headers.insert(
                HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
                HeaderValue::from_static("0"),
            );
        }

        response
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::InvalidBody(sanitize_serde_error(&e))
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
fn sanitize_serde_error(e: &serde_json::Error) -> String {
    let msg = e.to_string();

    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
