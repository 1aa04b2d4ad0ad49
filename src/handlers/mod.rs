//! Request dispatch and domain handlers.
//!
//! [`dispatch`] is the router fallback for every path except the health
//! check. It runs the middleware pipeline, matches the prefix table and runs
//! the matched handler in its own task so that a panic still produces an
//! envelope. Handler errors are logged exactly once here.

mod bus_location;
mod health;
mod proxy;
mod realtime;
mod route_info;
mod stop_info;

use std::time::Instant;

use axum::body::{Bytes, to_bytes};
use axum::extract::{Request, State};
use axum::http::Method;
use axum::response::Response;
use serde_json::json;
use tracing::debug;

pub use health::{health_check, health_method_not_allowed, health_preflight};

use crate::error::{AppError, AppResult};
use crate::logger::{LogEntry, LogLevel};
use crate::metrics;
use crate::middleware::auth::AuthenticatedRequest;
use crate::middleware::pipeline::PipelineOutcome;
use crate::middleware::timeout::effective_timeout;
use crate::models::User;
use crate::request::{RequestContext, parse_body};
use crate::routes::Endpoint;
use crate::state::AppState;
use crate::upstream::UpstreamRequest;
use crate::validation::validate_identifier;

/// Router fallback: pipeline, prefix dispatch, error shaping.
///
/// The pipeline sees only the request head. The body is read once the
/// request is admitted, so preflight, rate limiting and auth answer first
/// whatever the body holds.
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let ctx = RequestContext::from_parts(&parts, state.config.clone());
    let policy = state.api_policy.clone();
    let method = ctx.method.clone();
    let endpoint = Endpoint::for_path(ctx.path());
    let label = endpoint.map_or("unmatched", |e| e.label());

    // Hook for an identity attached by an outer layer; none is installed by
    // `build_router`, so requests partition by client IP.
    let prior = parts.extensions.get::<User>();

    let (request, admission) = match state.pipeline.process(ctx, &policy, prior) {
        PipelineOutcome::Respond(response) => {
            record(label, &method, &response, started);
            return response;
        }
        PipelineOutcome::Continue { request, admission } => (request, admission),
    };

    let body = match to_bytes(body, state.config.max_request_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            let completion = admission.start(&request, None);
            let error = AppError::InvalidBody(
                "Request body is too large or could not be read".to_string(),
            );
            let response = failure_response(&state, &request, &error);
            completion.complete(response.status());
            record(label, &method, &response, started);
            return response;
        }
    };

    let logged_body = admission
        .wants_body()
        .then(|| parse_body(request.context().content_type(), &body).ok())
        .flatten();
    let completion = admission.start(&request, logged_body.as_ref());

    let response = match endpoint {
        Some(endpoint) => run_handler(&state, endpoint, request, body).await,
        None => {
            let error = AppError::NotFound(format!(
                "No route for {}",
                request.context().path()
            ));
            failure_response(&state, &request, &error)
        }
    };

    completion.complete(response.status());
    record(label, &method, &response, started);
    response
}

/// Run the handler for `endpoint` in its own task.
async fn run_handler(
    state: &AppState,
    endpoint: Endpoint,
    request: AuthenticatedRequest,
    body: Bytes,
) -> Response {
    let task_state = state.clone();
    let task_request = request.clone();
    let joined = tokio::spawn(async move {
        route(endpoint, &task_state, &task_request, body).await
    })
    .await;

    let error = match joined {
        Ok(Ok(response)) => return response,
        Ok(Err(error)) => error,
        Err(join_error) => AppError::Internal(format!("{endpoint} handler aborted: {join_error}")),
    };
    failure_response(state, &request, &error)
}

async fn route(
    endpoint: Endpoint,
    state: &AppState,
    request: &AuthenticatedRequest,
    body: Bytes,
) -> AppResult<Response> {
    match endpoint {
        Endpoint::BusLocation => bus_location::handle(state, request, body).await,
        Endpoint::RouteInfo => route_info::handle(state, request).await,
        Endpoint::StopInfo => stop_info::handle(state, request).await,
        Endpoint::Realtime => realtime::handle(state, request).await,
        Endpoint::Proxy => proxy::handle(state, request, body).await,
    }
}

/// Log `error` once and render it as an envelope.
///
/// Server faults are logged at `error` with the caller's identity, client
/// errors at `warn`.
fn failure_response(state: &AppState, request: &AuthenticatedRequest, error: &AppError) -> Response {
    let ctx = request.context();
    let level = if error.is_server_error() {
        LogLevel::Error
    } else {
        LogLevel::Warn
    };

    let entry = LogEntry::new(
        level,
        "Request failed",
        ctx.request_id.clone(),
        ctx.method.as_str(),
        ctx.url(),
    )
    .with_user_agent(ctx.user_agent.clone())
    .with_ip(ctx.client_ip.clone())
    .with_user_id(request.user_id().map(str::to_string))
    .with_status(error.status().as_u16())
    .with_error(error.to_string())
    .with_metadata(json!({ "code": error.code() }));
    state.pipeline.record(&state.api_policy.logging, entry);

    error.to_response(&state.responses, &ctx.request_id)
}

fn record(label: &str, method: &Method, response: &Response, started: Instant) {
    metrics::record_request(
        label,
        method.as_str(),
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
}

/// Upstream call carrying the caller's credentials and deadline.
fn upstream_call(
    state: &AppState,
    request: &AuthenticatedRequest,
    endpoint: Endpoint,
    method: Method,
    path: impl Into<String>,
) -> UpstreamRequest {
    let ctx = request.context();
    UpstreamRequest::new(method, path)
        .forward_auth(&ctx.headers)
        .timeout(effective_timeout(&ctx.headers, state.upstream.timeout()))
        .label(endpoint.label())
}

/// Optional identifier query parameter, validated when present.
fn identifier_param(ctx: &RequestContext, name: &str) -> AppResult<Option<String>> {
    ctx.query_param(name)
        .map(|value| validate_identifier(&value, name).map(|()| value))
        .transpose()
}

/// Reject everything except `GET`.
fn require_get(ctx: &RequestContext) -> AppResult<()> {
    if ctx.method == Method::GET {
        Ok(())
    } else {
        Err(AppError::MethodNotAllowed(ctx.method.to_string()))
    }
}
