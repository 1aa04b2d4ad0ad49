//! Request middleware for the gateway.
//!
//! - **Request ID**: Tower layer assigning `X-Request-Id` before anything else
//! - **Pipeline**: CORS preflight, bypass, rate limiting, authentication and
//!   lifecycle logging, in that order
//! - **Rate Limiting**: keyed fixed-window counters
//! - **Authentication**: API key or bearer token lookup
//! - **Request Timeout**: client-specified upstream deadline
//!
//! # Architecture
//!
//! ```text
//! Request → Request ID → Trace → Pipeline → Router → Handler → Response
//!                                  ↓
//!                  200 preflight / 429 / 401 / 500 AUTH_ERROR
//! ```
//!
//! # Failure Policy
//!
//! - Rate limiter store faults fail open: the request proceeds.
//! - Credential store faults fail closed: the request is answered with 500.

pub mod auth;
pub mod ip;
pub mod pipeline;
pub mod policy;
pub mod rate_limit;
pub mod request_id;
pub mod timeout;

pub use auth::{AuthError, AuthManager, AuthenticatedRequest, CredentialStore, MemoryCredentialStore};
pub use ip::{UNKNOWN_IP, extract_client_ip};
pub use pipeline::{MiddlewarePipeline, PipelineOutcome, RequestAdmission, RequestCompletion};
pub use policy::{
    AuthPolicy, AuthStrategy, CorsPolicy, LoggingPolicy, MiddlewareConfig, MiddlewareOverrides,
    RateLimitConfig,
};
pub use rate_limit::{
    MemoryRateLimitStore, RateLimitData, RateLimitDecision, RateLimitError, RateLimitStore,
    RateLimiter,
};
pub use request_id::{REQUEST_ID_HEADER, RequestId, RequestIdLayer};
pub use timeout::{REQUEST_TIMEOUT_HEADER, RequestTimeout, effective_timeout};
