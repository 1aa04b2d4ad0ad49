//! Application configuration loaded from environment variables.
//!
//! # Required
//!
//! - `UPSTREAM_BASE_URL`: base URL of the transit backend. Startup fails
//!   without it.
//!
//! # Upstream
//!
//! - `UPSTREAM_TIMEOUT_MS`: per-attempt timeout ceiling (default: 10000)
//! - `UPSTREAM_RETRIES`: extra attempts for idempotent `GET` calls (default: 2)
//! - `UPSTREAM_RETRY_BASE_DELAY_MS` / `UPSTREAM_RETRY_MAX_DELAY_MS`: backoff bounds
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_WINDOW_MS`: fixed window length (default: 60000)
//! - `RATE_LIMIT_MAX_REQUESTS`: budget per window and caller (default: 100, 0 = deny all)
//! - `RATE_LIMIT_CLEANUP_INTERVAL_SECS`: expired window sweep (default: 60)
//!
//! # Credentials
//!
//! - `SEED_API_KEYS`: `user_id:key` pairs, comma-separated
//! - `SEED_BEARER_TOKENS`: `user_id:token` pairs, comma-separated

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::error::{AppError, AppResult};
use crate::logger::{DEFAULT_LOG_CAPACITY, LogFormat, LogLevel};
use crate::middleware::policy::{DEFAULT_CORS_MAX_AGE_SECS, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_MS};

/// Path answered before the middleware pipeline.
pub const DEFAULT_BYPASS_PATH: &str = "/api/health";

/// A credential provisioned at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedCredential {
    pub user_id: String,
    pub secret: String,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Maximum accepted request body in bytes (default: 1 MiB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Upstream Configuration
    // =========================================================================
    pub upstream_base_url: String,

    pub upstream_timeout: Duration,

    /// Extra attempts for `GET` calls (0 = single attempt)
    pub upstream_retries: u32,

    pub upstream_retry_base_delay: Duration,

    pub upstream_retry_max_delay: Duration,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    pub rate_limit_window_ms: u64,

    pub rate_limit_max_requests: u32,

    pub rate_limit_cleanup_interval: Duration,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Path prefixes exempt from rate limiting and authentication
    pub auth_bypass_paths: Vec<String>,

    pub cors_allowed_origin: String,

    pub cors_allow_credentials: bool,

    pub cors_max_age_secs: u64,

    pub seed_api_keys: Vec<SeedCredential>,

    pub seed_bearer_tokens: Vec<SeedCredential>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Entries retained by the in-memory request log
    pub log_buffer_capacity: usize,

    /// Threshold for the in-memory request log
    pub log_level: LogLevel,

    pub log_format: LogFormat,

    pub log_include_request_body: bool,

    /// Prometheus listener port (0 disables)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if `UPSTREAM_BASE_URL` is missing or any
    /// value fails to parse or validate.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let upstream_base_url = env::var("UPSTREAM_BASE_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::ConfigError("UPSTREAM_BASE_URL is required".to_string()))?;

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,

            // Upstream
            upstream_base_url,
            upstream_timeout: Duration::from_millis(Self::parse_env("UPSTREAM_TIMEOUT_MS", 10_000)?),
            upstream_retries: Self::parse_env("UPSTREAM_RETRIES", 2)?,
            upstream_retry_base_delay: Duration::from_millis(Self::parse_env(
                "UPSTREAM_RETRY_BASE_DELAY_MS",
                200,
            )?),
            upstream_retry_max_delay: Duration::from_millis(Self::parse_env(
                "UPSTREAM_RETRY_MAX_DELAY_MS",
                2000,
            )?),

            // Rate limiting
            rate_limit_window_ms: Self::parse_env("RATE_LIMIT_WINDOW_MS", DEFAULT_WINDOW_MS)?,
            rate_limit_max_requests: Self::parse_env(
                "RATE_LIMIT_MAX_REQUESTS",
                DEFAULT_MAX_REQUESTS,
            )?,
            rate_limit_cleanup_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_CLEANUP_INTERVAL_SECS",
                60,
            )?),

            // Security
            auth_bypass_paths: Self::parse_bypass_paths(),
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "*".to_string()),
            cors_allow_credentials: Self::parse_env("CORS_ALLOW_CREDENTIALS", false)?,
            cors_max_age_secs: Self::parse_env("CORS_MAX_AGE_SECS", DEFAULT_CORS_MAX_AGE_SECS)?,
            seed_api_keys: parse_seed_credentials(
                "SEED_API_KEYS",
                &env::var("SEED_API_KEYS").unwrap_or_default(),
            )?,
            seed_bearer_tokens: parse_seed_credentials(
                "SEED_BEARER_TOKENS",
                &env::var("SEED_BEARER_TOKENS").unwrap_or_default(),
            )?,

            // Observability
            log_buffer_capacity: Self::parse_env("LOG_BUFFER_CAPACITY", DEFAULT_LOG_CAPACITY)?,
            log_level: Self::parse_env("LOG_LEVEL", LogLevel::Info)?,
            log_format: Self::parse_env("LOG_FORMAT", LogFormat::Json)?,
            log_include_request_body: Self::parse_env("LOG_INCLUDE_REQUEST_BODY", false)?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        let url = Url::parse(&self.upstream_base_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid UPSTREAM_BASE_URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::ConfigError(format!(
                "UPSTREAM_BASE_URL must be http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.upstream_retry_base_delay > self.upstream_retry_max_delay {
            return Err(AppError::ConfigError(format!(
                "UPSTREAM_RETRY_BASE_DELAY_MS ({:?}) must be <= UPSTREAM_RETRY_MAX_DELAY_MS ({:?})",
                self.upstream_retry_base_delay, self.upstream_retry_max_delay
            )));
        }

        if self.upstream_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "UPSTREAM_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_window_ms == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_MS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_cleanup_interval.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_CLEANUP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.log_buffer_capacity == 0 {
            return Err(AppError::ConfigError(
                "LOG_BUFFER_CAPACITY must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse auth bypass paths from environment variable.
    ///
    /// Default: "/api/health". Entries must start with '/'.
    fn parse_bypass_paths() -> Vec<String> {
        env::var("AUTH_BYPASS_PATHS")
            .unwrap_or_else(|_| DEFAULT_BYPASS_PATH.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && s.starts_with('/'))
            .collect()
    }
}

/// Parse `user_id:secret` pairs separated by commas.
///
/// Whitespace around entries is ignored. An entry without `:` or with an empty
/// half is a configuration error.
pub fn parse_seed_credentials(name: &str, raw: &str) -> AppResult<Vec<SeedCredential>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (user_id, secret) = entry
                .split_once(':')
                .map(|(u, s)| (u.trim(), s.trim()))
                .filter(|(u, s)| !u.is_empty() && !s.is_empty())
                .ok_or_else(|| {
                    AppError::ConfigError(format!("Invalid {name} entry, expected user_id:secret"))
                })?;
            Ok(SeedCredential {
                user_id: user_id.to_string(),
                secret: secret.to_string(),
            })
        })
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_request_body_size: 1024 * 1024,
            // Upstream
            upstream_base_url: "http://localhost:8080".to_string(),
            upstream_timeout: Duration::from_secs(10),
            upstream_retries: 2,
            upstream_retry_base_delay: Duration::from_millis(200),
            upstream_retry_max_delay: Duration::from_secs(2),
            // Rate limiting
            rate_limit_window_ms: DEFAULT_WINDOW_MS,
            rate_limit_max_requests: DEFAULT_MAX_REQUESTS,
            rate_limit_cleanup_interval: Duration::from_secs(60),
            // Security
            auth_bypass_paths: vec![DEFAULT_BYPASS_PATH.to_string()],
            cors_allowed_origin: "*".to_string(),
            cors_allow_credentials: false,
            cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
            seed_api_keys: vec![],
            seed_bearer_tokens: vec![],
            // Observability
            log_buffer_capacity: DEFAULT_LOG_CAPACITY,
            log_level: LogLevel::Info,
            log_format: LogFormat::Json,
            log_include_request_body: false,
            metrics_port: 9090,
        }
    }
}
