//! Vehicle location read and write.
//!
//! - `GET /api/bus/location[?routeId=][&busId=]`: upstream locations, each
//!   validated and defaulted; invalid records are dropped.
//! - `POST /api/bus/location`: a JSON location report, validated and
//!   forwarded upstream.

use axum::body::Bytes;
use axum::http::Method;
use axum::response::Response;
use tracing::{debug, instrument};

use super::{identifier_param, upstream_call};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedRequest;
use crate::request::{ParsedBody, parse_body};
use crate::routes::Endpoint;
use crate::state::AppState;
use crate::validation::{normalize_bus_locations, validate_bus_location};

const UPSTREAM_PATH: &str = "bus/location";

#[instrument(skip_all, fields(request_id = %request.context().request_id, method = %request.context().method))]
pub(super) async fn handle(
    state: &AppState,
    request: &AuthenticatedRequest,
    body: Bytes,
) -> AppResult<Response> {
    match request.context().method {
        Method::GET => list(state, request).await,
        Method::POST => update(state, request, body).await,
        ref other => Err(AppError::MethodNotAllowed(other.to_string())),
    }
}

async fn list(state: &AppState, request: &AuthenticatedRequest) -> AppResult<Response> {
    let ctx = request.context();
    let route_id = identifier_param(ctx, "routeId")?;
    let bus_id = identifier_param(ctx, "busId")?;

    let call = upstream_call(state, request, Endpoint::BusLocation, Method::GET, UPSTREAM_PATH)
        .query_params(&[("routeId", route_id.as_deref()), ("busId", bus_id.as_deref())]);

    let payload = state
        .upstream
        .fetch_json(call)
        .await
        .map_err(|e| AppError::upstream(Endpoint::BusLocation, e))?;
    let locations = normalize_bus_locations(&payload)
        .map_err(|e| AppError::upstream(Endpoint::BusLocation, e))?;

    debug!(count = locations.len(), "Bus locations fetched");
    Ok(state.responses.success(locations, &ctx.request_id, None))
}

async fn update(
    state: &AppState,
    request: &AuthenticatedRequest,
    body: Bytes,
) -> AppResult<Response> {
    let ctx = request.context();

    let ParsedBody::Json(value) = parse_body(ctx.content_type(), &body)? else {
        return Err(AppError::InvalidBody(
            "Expected an application/json body".to_string(),
        ));
    };

    let location = validate_bus_location(&value).ok_or_else(|| {
        AppError::InvalidData(
            "Invalid bus location: busId, routeId and numeric latitude/longitude are required"
                .to_string(),
        )
    })?;

    let call = upstream_call(state, request, Endpoint::BusLocation, Method::POST, UPSTREAM_PATH)
        .json(&serde_json::to_value(&location)?);

    state
        .upstream
        .send_ok(call)
        .await
        .map_err(|e| AppError::upstream(Endpoint::BusLocation, e))?;

    debug!(bus_id = %location.bus_id, "Bus location forwarded");
    Ok(state.responses.success(
        location,
        &ctx.request_id,
        Some("Bus location updated".to_string()),
    ))
}
