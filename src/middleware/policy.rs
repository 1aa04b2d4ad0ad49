//! Per-route middleware policy.
//!
//! A [`MiddlewareConfig`] bundles the CORS, auth, rate-limit and logging
//! policies applied to one request. Routes supply a partial
//! [`MiddlewareOverrides`] which is merged onto the process defaults.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::logger::{LogFormat, LogLevel};

/// Default window length for rate limiting (one minute).
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Default request budget per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 100;

/// Default preflight cache lifetime (one day).
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86_400;

/// Fixed-window rate-limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

/// Cross-origin policy stamped on every response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsPolicy {
    pub allow_origin: String,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: u64,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
            allow_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allow_headers: ["Content-Type", "Authorization", "X-API-Key"]
                .map(String::from)
                .to_vec(),
            allow_credentials: false,
            max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
        }
    }
}

/// Credential scheme accepted by the auth stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthStrategy {
    /// `X-API-Key: <key>`
    ApiKey,
    /// `Authorization: Bearer <token>`
    Bearer,
}

/// Authentication policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    /// Reject unauthenticated callers with 401
    pub required: bool,
    /// Accepted credential schemes, in resolution order
    pub strategies: Vec<AuthStrategy>,
    /// Path prefixes that skip rate limiting and authentication
    pub bypass_paths: Vec<String>,
}

impl AuthPolicy {
    /// Whether `path` starts with any bypass prefix.
    pub fn is_bypassed(&self, path: &str) -> bool {
        self.bypass_paths
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }

    pub fn accepts(&self, strategy: AuthStrategy) -> bool {
        self.strategies.contains(&strategy)
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            required: false,
            strategies: vec![AuthStrategy::ApiKey, AuthStrategy::Bearer],
            bypass_paths: Vec::new(),
        }
    }
}

/// Request lifecycle logging policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingPolicy {
    /// Entries below this level are not recorded
    pub level: LogLevel,
    pub format: LogFormat,
    /// Parse and attach request body metadata to the "Request started" entry
    pub include_request_body: bool,
    pub include_response_body: bool,
}

impl Default for LoggingPolicy {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            include_request_body: false,
            include_response_body: false,
        }
    }
}

/// Complete policy for one request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MiddlewareConfig {
    pub cors: CorsPolicy,
    pub auth: AuthPolicy,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingPolicy,
}

impl MiddlewareConfig {
    /// Process defaults derived from the environment configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            cors: CorsPolicy {
                allow_origin: config.cors_allowed_origin.clone(),
                allow_credentials: config.cors_allow_credentials,
                max_age_secs: config.cors_max_age_secs,
                ..CorsPolicy::default()
            },
            auth: AuthPolicy {
                bypass_paths: config.auth_bypass_paths.clone(),
                ..AuthPolicy::default()
            },
            rate_limit: RateLimitConfig {
                window_ms: config.rate_limit_window_ms,
                max_requests: config.rate_limit_max_requests,
            },
            logging: LoggingPolicy {
                level: config.log_level,
                format: config.log_format,
                include_request_body: config.log_include_request_body,
                include_response_body: false,
            },
        }
    }

    /// Apply a partial per-route override onto these defaults.
    pub fn merged(&self, overrides: &MiddlewareOverrides) -> Self {
        let mut merged = self.clone();

        if let Some(origin) = &overrides.cors_origin {
            merged.cors.allow_origin = origin.clone();
        }
        if let Some(credentials) = overrides.cors_credentials {
            merged.cors.allow_credentials = credentials;
        }
        if let Some(required) = overrides.auth_required {
            merged.auth.required = required;
        }
        if let Some(strategies) = &overrides.auth_strategies {
            merged.auth.strategies = strategies.clone();
        }
        if let Some(bypass) = &overrides.bypass_paths {
            merged.auth.bypass_paths = bypass.clone();
        }
        if let Some(window_ms) = overrides.window_ms {
            merged.rate_limit.window_ms = window_ms;
        }
        if let Some(max_requests) = overrides.max_requests {
            merged.rate_limit.max_requests = max_requests;
        }
        if let Some(level) = overrides.log_level {
            merged.logging.level = level;
        }
        if let Some(format) = overrides.log_format {
            merged.logging.format = format;
        }
        if let Some(include) = overrides.include_request_body {
            merged.logging.include_request_body = include;
        }
        if let Some(include) = overrides.include_response_body {
            merged.logging.include_response_body = include;
        }

        merged
    }
}

/// Partial override of [`MiddlewareConfig`]. `None` keeps the default.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareOverrides {
    pub cors_origin: Option<String>,
    pub cors_credentials: Option<bool>,
    pub auth_required: Option<bool>,
    pub auth_strategies: Option<Vec<AuthStrategy>>,
    pub bypass_paths: Option<Vec<String>>,
    pub window_ms: Option<u64>,
    pub max_requests: Option<u32>,
    pub log_level: Option<LogLevel>,
    pub log_format: Option<LogFormat>,
    pub include_request_body: Option<bool>,
    pub include_response_body: Option<bool>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cors_policy() {
        let cors = CorsPolicy::default();
        assert_eq!(cors.allow_origin, "*");
        assert_eq!(cors.allow_methods.join(","), "GET,POST,PUT,DELETE,OPTIONS");
        assert_eq!(
            cors.allow_headers.join(","),
            "Content-Type,Authorization,X-API-Key"
        );
    }

    #[test]
    fn test_bypass_is_prefix_match() {
        let policy = AuthPolicy {
            bypass_paths: vec!["/api/health".into()],
            ..AuthPolicy::default()
        };
        assert!(policy.is_bypassed("/api/health"));
        assert!(policy.is_bypassed("/api/health/deep"));
        assert!(!policy.is_bypassed("/api/route"));
    }

    #[test]
    fn test_empty_bypass_prefix_matches_nothing() {
        let policy = AuthPolicy {
            bypass_paths: vec![String::new()],
            ..AuthPolicy::default()
        };
        assert!(!policy.is_bypassed("/api/route"));
    }

    #[test]
    fn test_merge_only_touches_set_fields() {
        let defaults = MiddlewareConfig::default();
        let merged = defaults.merged(&MiddlewareOverrides {
            auth_required: Some(true),
            max_requests: Some(5),
            ..MiddlewareOverrides::default()
        });

        assert!(merged.auth.required);
        assert_eq!(merged.rate_limit.max_requests, 5);
        assert_eq!(merged.rate_limit.window_ms, DEFAULT_WINDOW_MS);
        assert_eq!(merged.cors, defaults.cors);
        assert_eq!(merged.logging, defaults.logging);
    }

    #[test]
    fn test_from_config_uses_environment_values() {
        let config = Config {
            rate_limit_max_requests: 7,
            cors_allowed_origin: "https://transit.example".into(),
            ..Config::default()
        };
        let policy = MiddlewareConfig::from_config(&config);
        assert_eq!(policy.rate_limit.max_requests, 7);
        assert_eq!(policy.cors.allow_origin, "https://transit.example");
        assert_eq!(policy.auth.bypass_paths, vec!["/api/health".to_string()]);
    }

    #[test]
    fn test_rate_limit_config_serde() {
        let value = serde_json::to_value(RateLimitConfig::default()).unwrap();
        assert_eq!(value["windowMs"], 60_000);
        assert_eq!(value["maxRequests"], 100);
    }
}
