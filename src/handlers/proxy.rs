//! `ANY /api/proxy/<path>` → `<upstream>/<path>`
//!
//! Method, query string, body and credential headers are forwarded. The
//! upstream status, headers and body come back verbatim, minus hop-by-hop
//! headers, with CORS headers added. Only a failed call (transport or
//! timeout) becomes an error envelope.

use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName};
use axum::response::Response;
use tracing::{debug, instrument};

use super::upstream_call;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedRequest;
use crate::routes::Endpoint;
use crate::state::AppState;
use crate::upstream::UpstreamError;

/// Connection-scoped headers never relayed (RFC 9110 §7.6.1).
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_relayed(name: &HeaderName) -> bool {
    *name != CONTENT_LENGTH && !HOP_BY_HOP.contains(&name.as_str())
}

#[instrument(skip_all, fields(request_id = %request.context().request_id, method = %request.context().method))]
pub(super) async fn handle(
    state: &AppState,
    request: &AuthenticatedRequest,
    body: Bytes,
) -> AppResult<Response> {
    let ctx = request.context();
    let target = ctx
        .path()
        .strip_prefix(Endpoint::Proxy.prefix())
        .unwrap_or_default();

    let mut call = upstream_call(state, request, Endpoint::Proxy, ctx.method.clone(), target)
        .raw_query(ctx.query());
    if !body.is_empty() {
        call = call.body(body, ctx.headers.get(CONTENT_TYPE).cloned());
    }

    let upstream = state
        .upstream
        .send(call)
        .await
        .map_err(|e| AppError::upstream(Endpoint::Proxy, e))?;

    let status = upstream.status();
    let headers = upstream.headers().clone();
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| AppError::upstream(Endpoint::Proxy, UpstreamError::Transport(e)))?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    for (name, value) in headers.iter().filter(|(name, _)| is_relayed(name)) {
        response.headers_mut().append(name.clone(), value.clone());
    }

    debug!(target, %status, "Proxied upstream response");
    Ok(state.responses.with_cors(response))
}
