//! `GET /api/realtime?routeId=&stopId=`
//!
//! Wraps the upstream snapshot in a single update `{type, data, timestamp,
//! source}`. The type follows the filters: a stop filter yields
//! `stop_arrivals`, a route filter `bus_locations`, neither
//! `network_snapshot`.

use axum::http::Method;
use axum::response::Response;
use tracing::{debug, instrument};

use super::{identifier_param, require_get, upstream_call};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedRequest;
use crate::models::{RealtimeKind, RealtimeUpdate};
use crate::routes::Endpoint;
use crate::state::AppState;

const UPSTREAM_PATH: &str = "realtime";

#[instrument(skip_all, fields(request_id = %request.context().request_id))]
pub(super) async fn handle(state: &AppState, request: &AuthenticatedRequest) -> AppResult<Response> {
    let ctx = request.context();
    require_get(ctx)?;

    let route_id = identifier_param(ctx, "routeId")?;
    let stop_id = identifier_param(ctx, "stopId")?;
    let kind = RealtimeKind::from_filters(route_id.as_deref(), stop_id.as_deref());

    let call = upstream_call(state, request, Endpoint::Realtime, Method::GET, UPSTREAM_PATH)
        .query_params(&[("routeId", route_id.as_deref()), ("stopId", stop_id.as_deref())]);

    let payload = state
        .upstream
        .fetch_json(call)
        .await
        .map_err(|e| AppError::upstream(Endpoint::Realtime, e))?;

    debug!(?kind, "Realtime snapshot fetched");
    Ok(state
        .responses
        .success(RealtimeUpdate::new(kind, payload), &ctx.request_id, None))
}
