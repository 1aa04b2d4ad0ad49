//! # Transit Gateway
//!
//! Request-handling gateway in front of a public-transit vehicle-location
//! backend.
//!
//! - **Middleware pipeline**: CORS preflight, public-path bypass, fixed-window
//!   rate limiting, API key / bearer authentication, lifecycle logging
//! - **Domain endpoints**: bus locations, routes, stops and realtime
//!   snapshots, validated and normalized from the upstream JSON
//! - **Proxy**: transparent passthrough under `/api/proxy/`
//! - **Uniform envelopes**: every response carries a request id and CORS headers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Request ID → Trace → Pipeline (CORS, bypass, rate, auth)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Prefix dispatch → handlers (bus, route, stop, realtime,    │
//! │  proxy)                                                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  UpstreamClient (timeouts, GET retries with backoff)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transit backend (UPSTREAM_BASE_URL)                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use transit_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     state.spawn_background_tasks();
//!
//!     let app = build_router(state);
//!     // Serve `app`...
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod logger;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod request;
pub mod response;
pub mod routes;
pub mod state;
pub mod upstream;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use logger::{LogEntry, LogLevel, Logger};
pub use routes::build_router;
pub use state::AppState;
pub use upstream::UpstreamClient;
