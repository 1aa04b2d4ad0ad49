//! `GET /api/stop?stopId=&routeId=`

use axum::http::Method;
use axum::response::Response;
use tracing::{debug, instrument};

use super::{identifier_param, require_get, upstream_call};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedRequest;
use crate::routes::Endpoint;
use crate::state::AppState;
use crate::validation::normalize_stop_info;

const UPSTREAM_PATH: &str = "stop";

#[instrument(skip_all, fields(request_id = %request.context().request_id))]
pub(super) async fn handle(state: &AppState, request: &AuthenticatedRequest) -> AppResult<Response> {
    let ctx = request.context();
    require_get(ctx)?;

    let stop_id = identifier_param(ctx, "stopId")?;
    let route_id = identifier_param(ctx, "routeId")?;

    let call = upstream_call(state, request, Endpoint::StopInfo, Method::GET, UPSTREAM_PATH)
        .query_params(&[("stopId", stop_id.as_deref()), ("routeId", route_id.as_deref())]);

    let payload = state
        .upstream
        .fetch_json(call)
        .await
        .map_err(|e| AppError::upstream(Endpoint::StopInfo, e))?;
    let stops =
        normalize_stop_info(&payload).map_err(|e| AppError::upstream(Endpoint::StopInfo, e))?;

    debug!(count = stops.len(), "Stop info fetched");
    Ok(state.responses.success(stops, &ctx.request_id, None))
}
