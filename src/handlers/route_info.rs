//! `GET /api/route?routeId=&includeStops=`

use axum::http::Method;
use axum::response::Response;
use tracing::{debug, instrument};

use super::{identifier_param, require_get, upstream_call};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedRequest;
use crate::models::OneOrMany;
use crate::routes::Endpoint;
use crate::state::AppState;
use crate::validation::{normalize_route_info, parse_flag};

const UPSTREAM_PATH: &str = "route";

/// Route metadata, one route or a list. Stops are only kept when
/// `includeStops` is set.
#[instrument(skip_all, fields(request_id = %request.context().request_id))]
pub(super) async fn handle(state: &AppState, request: &AuthenticatedRequest) -> AppResult<Response> {
    let ctx = request.context();
    require_get(ctx)?;

    let route_id = identifier_param(ctx, "routeId")?;
    let include_stops = parse_flag(ctx.query_param("includeStops").as_deref(), "includeStops")?;

    let call = upstream_call(state, request, Endpoint::RouteInfo, Method::GET, UPSTREAM_PATH)
        .query_params(&[
            ("routeId", route_id.as_deref()),
            ("includeStops", include_stops.then_some("true")),
        ]);

    let payload = state
        .upstream
        .fetch_json(call)
        .await
        .map_err(|e| AppError::upstream(Endpoint::RouteInfo, e))?;
    let mut routes =
        normalize_route_info(&payload).map_err(|e| AppError::upstream(Endpoint::RouteInfo, e))?;

    if !include_stops {
        match &mut routes {
            OneOrMany::One(route) => route.stops = None,
            OneOrMany::Many(list) => list.iter_mut().for_each(|route| route.stops = None),
        }
    }

    debug!(count = routes.len(), include_stops, "Route info fetched");
    Ok(state.responses.success(routes, &ctx.request_id, None))
}
