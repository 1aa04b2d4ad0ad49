//! Application routing.
//!
//! # Layers (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← X-Request-Id honoured or generated, echoed
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response spans
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Body Limit     │ ← MAX_REQUEST_BODY_SIZE
//! └────────┬─────────┘
//!          ▼
//!   /api/health ──────────────▶ health (no pipeline; other methods 405)
//!   everything else ──────────▶ dispatch (pipeline, prefix table)
//! ```
//!
//! # Prefix Table
//!
//! Matched in order against the request path:
//!
//! | Prefix              | Endpoint      |
//! |---------------------|---------------|
//! | `/api/bus/location` | bus location  |
//! | `/api/route`        | route info    |
//! | `/api/stop`         | stop info     |
//! | `/api/realtime`     | realtime      |
//! | `/api/proxy/`       | proxy         |

use std::fmt;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::request_id::RequestIdLayer;
use crate::state::AppState;

/// Health check path, answered before the pipeline.
pub const HEALTH_PATH: &str = "/api/health";

/// Routed domain endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    BusLocation,
    RouteInfo,
    StopInfo,
    Realtime,
    Proxy,
}

const ROUTE_TABLE: [(&str, Endpoint); 5] = [
    ("/api/bus/location", Endpoint::BusLocation),
    ("/api/route", Endpoint::RouteInfo),
    ("/api/stop", Endpoint::StopInfo),
    ("/api/realtime", Endpoint::Realtime),
    ("/api/proxy/", Endpoint::Proxy),
];

impl Endpoint {
    /// First endpoint whose prefix matches `path`.
    pub fn for_path(path: &str) -> Option<Self> {
        ROUTE_TABLE
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix))
            .map(|(_, endpoint)| *endpoint)
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Endpoint::BusLocation => "/api/bus/location",
            Endpoint::RouteInfo => "/api/route",
            Endpoint::StopInfo => "/api/stop",
            Endpoint::Realtime => "/api/realtime",
            Endpoint::Proxy => "/api/proxy/",
        }
    }

    /// Error code for upstream failures on this endpoint.
    pub fn error_code(&self) -> &'static str {
        match self {
            Endpoint::BusLocation => "BUS_LOCATION_ERROR",
            Endpoint::RouteInfo => "ROUTE_INFO_ERROR",
            Endpoint::StopInfo => "STOP_INFO_ERROR",
            Endpoint::Realtime => "REALTIME_ERROR",
            Endpoint::Proxy => "PROXY_ERROR",
        }
    }

    /// Client-facing message for upstream failures on this endpoint.
    pub fn failure_message(&self) -> &'static str {
        match self {
            Endpoint::BusLocation => "Failed to process bus location request",
            Endpoint::RouteInfo => "Failed to fetch route information",
            Endpoint::StopInfo => "Failed to fetch stop information",
            Endpoint::Realtime => "Failed to fetch realtime data",
            Endpoint::Proxy => "Proxy request failed",
        }
    }

    /// Metrics and log label.
    pub fn label(&self) -> &'static str {
        match self {
            Endpoint::BusLocation => "bus_location",
            Endpoint::RouteInfo => "route_info",
            Endpoint::StopInfo => "stop_info",
            Endpoint::Realtime => "realtime",
            Endpoint::Proxy => "proxy",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Build the application router with all layers configured.
pub fn build_router(state: AppState) -> Router {
    let max_body = state.config.max_request_body_size;
    info!(
        max_size_kb = max_body / 1024,
        "Request body size limit configured"
    );

    Router::new()
        .route(
            HEALTH_PATH,
            get(handlers::health_check)
                .options(handlers::health_preflight)
                .fallback(handlers::health_method_not_allowed),
        )
        .fallback(handlers::dispatch)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .layer(RequestIdLayer::new())
        .with_state(state)
}
