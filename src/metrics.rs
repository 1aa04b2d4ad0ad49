//! Prometheus metrics for gateway observability.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_requests_total` - Completed requests (labels: endpoint, method, status)
//! - `gateway_rate_limit_rejections_total` - Requests rejected with 429
//! - `gateway_auth_failures_total` - Auth rejections (labels: reason)
//! - `gateway_upstream_errors_total` - Failed upstream calls (labels: endpoint, kind)
//! - `gateway_upstream_retries_total` - Retried upstream attempts (labels: endpoint)
//!
//! ## Histograms
//! - `gateway_request_duration_seconds` - End-to-end request duration
//! - `gateway_upstream_duration_seconds` - Upstream call duration
//!
//! ## Gauges
//! - `gateway_rate_limit_keys` - Partition keys currently tracked by the rate limiter
//!
//! # Usage
//!
//! ```rust,ignore
//! use transit_gateway::metrics::{init_metrics, record_request};
//!
//! init_metrics(addr)?;
//! record_request("bus_location", "GET", 200, 0.045);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "gateway_rate_limit_rejections_total";
    pub const AUTH_FAILURES_TOTAL: &str = "gateway_auth_failures_total";
    pub const UPSTREAM_ERRORS_TOTAL: &str = "gateway_upstream_errors_total";
    pub const UPSTREAM_RETRIES_TOTAL: &str = "gateway_upstream_retries_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
    pub const UPSTREAM_DURATION_SECONDS: &str = "gateway_upstream_duration_seconds";
    pub const RATE_LIMIT_KEYS: &str = "gateway_rate_limit_keys";
}

/// Initialize the Prometheus metrics exporter.
///
/// Sets up metric descriptions and starts the Prometheus HTTP listener
/// on the specified address.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::REQUESTS_TOTAL,
        "Total number of requests answered by the gateway"
    );
    describe_counter!(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of requests rejected or failed during authentication"
    );
    describe_counter!(
        names::UPSTREAM_ERRORS_TOTAL,
        "Total number of failed upstream calls"
    );
    describe_counter!(
        names::UPSTREAM_RETRIES_TOTAL,
        "Total number of retried upstream attempts"
    );

    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Gateway request duration in seconds"
    );
    describe_histogram!(
        names::UPSTREAM_DURATION_SECONDS,
        "Upstream call duration in seconds"
    );

    describe_gauge!(
        names::RATE_LIMIT_KEYS,
        "Number of partition keys tracked by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record a completed request and its duration.
pub fn record_request(endpoint: &str, method: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    counter!(names::REQUESTS_TOTAL, "endpoint" => endpoint.to_string(), "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "endpoint" => endpoint.to_string(), "method" => method.to_string(), "status" => status)
        .record(duration_secs);
}

/// Record a rate limit rejection.
pub fn record_rate_limit_rejection() {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL).increment(1);
}

/// Record an authentication failure.
///
/// `reason` is `"missing"` for unresolved identities or `"store_error"` for
/// credential store faults.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// Record a failed upstream call.
pub fn record_upstream_error(endpoint: &str, kind: &'static str) {
    counter!(names::UPSTREAM_ERRORS_TOTAL, "endpoint" => endpoint.to_string(), "kind" => kind)
        .increment(1);
}

/// Record a retried upstream attempt.
pub fn record_upstream_retry(endpoint: &str) {
    counter!(names::UPSTREAM_RETRIES_TOTAL, "endpoint" => endpoint.to_string()).increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record upstream call duration.
pub fn record_upstream_duration(endpoint: &str, duration_secs: f64) {
    histogram!(names::UPSTREAM_DURATION_SECONDS, "endpoint" => endpoint.to_string())
        .record(duration_secs);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

/// Update the tracked partition key gauge.
pub fn set_rate_limit_keys(count: usize) {
    gauge!(names::RATE_LIMIT_KEYS).set(count as f64);
}
