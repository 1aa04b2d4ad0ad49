//! Health check endpoint.
//!
//! `GET /api/health` is routed directly, ahead of the middleware pipeline: it
//! is never rate limited or authenticated. Its preflight is answered the same
//! way, and any other method gets an enveloped 405.

use axum::extract::{Request, State};
use axum::response::Response;
use chrono::Utc;
use tracing::instrument;

use crate::error::AppError;
use crate::middleware::request_id::RequestId;
use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "success": true,
///   "data": {
///     "status": "healthy",
///     "version": "0.1.0",
///     "uptimeSeconds": 42,
///     "upstreamConfigured": true,
///     "timestamp": "2024-01-15T10:30:00Z"
///   },
///   "timestamp": "2024-01-15T10:30:00Z",
///   "requestId": "req_..."
/// }
/// ```
#[instrument(skip_all)]
pub async fn health_check(State(state): State<AppState>, request: Request) -> Response {
    let request_id = RequestId::from_extensions(request.extensions());

    let health = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        upstream_configured: !state.config.upstream_base_url.is_empty(),
        timestamp: Utc::now(),
    };

    state.responses.success(health, request_id.as_str(), None)
}

/// `OPTIONS /api/health`.
pub async fn health_preflight(State(state): State<AppState>) -> Response {
    state.responses.cors_preflight()
}

/// Any other method on `/api/health`.
pub async fn health_method_not_allowed(State(state): State<AppState>, request: Request) -> Response {
    let request_id = RequestId::from_extensions(request.extensions());
    AppError::MethodNotAllowed(request.method().to_string())
        .to_response(&state.responses, request_id.as_str())
}
