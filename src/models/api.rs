use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Success envelope wrapped around every handler payload.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessEnvelope<T> {
    /// Always `true`
    pub success: bool,
    /// Handler payload
    pub data: T,
    /// Optional human-readable note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the response was built
    pub timestamp: DateTime<Utc>,
    /// Correlation id of the inbound request
    pub request_id: String,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(data: T, request_id: impl Into<String>, message: Option<String>) -> Self {
        Self {
            success: true,
            data,
            message,
            timestamp: Utc::now(),
            request_id: request_id.into(),
        }
    }
}

/// Error envelope returned for every failure.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// Client-facing message
    pub error: String,
    /// Stable machine-readable code (e.g. `AUTH_REQUIRED`)
    pub code: String,
    /// Optional structured details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// When the response was built
    pub timestamp: DateTime<Utc>,
    /// Correlation id of the inbound request
    pub request_id: String,
}

impl ErrorEnvelope {
    pub fn new(
        error: impl Into<String>,
        code: impl Into<String>,
        request_id: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details,
            timestamp: Utc::now(),
            request_id: request_id.into(),
        }
    }
}

/// Health check payload.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Service version
    pub version: String,
    /// Seconds since the process started
    pub uptime_seconds: u64,
    /// Whether an upstream base URL is configured
    pub upstream_configured: bool,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}
