//! Shared application state for Axum handlers.
//!
//! The rate limiter, credential tables and request log are process-wide:
//! they are constructed once here and shared by every in-flight request.
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop them before exit.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::logger::Logger;
use crate::metrics;
use crate::middleware::auth::AuthManager;
use crate::middleware::pipeline::MiddlewarePipeline;
use crate::middleware::policy::{MiddlewareConfig, MiddlewareOverrides};
use crate::middleware::rate_limit::RateLimiter;
use crate::models::User;
use crate::response::ResponseBuilder;
use crate::upstream::UpstreamClient;

/// Shared application state. Cloning is cheap; every component is shared.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: MiddlewarePipeline,
    pub rate_limiter: RateLimiter,
    pub auth: AuthManager,
    pub logger: Logger,
    pub responses: ResponseBuilder,
    pub upstream: UpstreamClient,
    /// Policy applied to every routed `/api` request
    pub api_policy: Arc<MiddlewareConfig>,
    /// Timestamp when the application started
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state with in-memory stores and seed credentials from `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the upstream URL is unusable or a
    /// seed credential cannot be stored.
    pub fn new(config: Config) -> AppResult<Self> {
        let logger = Logger::new(config.log_buffer_capacity, config.log_format);
        Self::with_components(
            config,
            RateLimiter::in_memory(),
            AuthManager::in_memory(),
            logger,
        )
    }

    /// Build state around explicit components.
    pub fn with_components(
        config: Config,
        rate_limiter: RateLimiter,
        auth: AuthManager,
        logger: Logger,
    ) -> AppResult<Self> {
        let upstream = UpstreamClient::from_config(&config)?;

        let api_policy = MiddlewareConfig::from_config(&config).merged(&MiddlewareOverrides {
            auth_required: Some(true),
            ..MiddlewareOverrides::default()
        });

        let pipeline = MiddlewarePipeline::new(
            rate_limiter.clone(),
            auth.clone(),
            logger.clone(),
            api_policy.cors.clone(),
        );
        let responses = pipeline.responses_for(&api_policy.cors);

        let state = Self {
            config: Arc::new(config),
            pipeline,
            rate_limiter,
            auth,
            logger,
            responses,
            upstream,
            api_policy: Arc::new(api_policy),
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.seed_credentials()?;
        Ok(state)
    }

    fn seed_credentials(&self) -> AppResult<()> {
        for seed in &self.config.seed_api_keys {
            self.auth
                .register_api_key(&seed.secret, User::new(seed.user_id.clone(), vec![]))
                .map_err(|e| AppError::ConfigError(format!("SEED_API_KEYS: {e}")))?;
        }
        for seed in &self.config.seed_bearer_tokens {
            self.auth
                .register_bearer_token(&seed.secret, User::new(seed.user_id.clone(), vec![]))
                .map_err(|e| AppError::ConfigError(format!("SEED_BEARER_TOKENS: {e}")))?;
        }

        let seeded = self.config.seed_api_keys.len() + self.config.seed_bearer_tokens.len();
        if seeded > 0 {
            info!(
                api_keys = self.config.seed_api_keys.len(),
                bearer_tokens = self.config.seed_bearer_tokens.len(),
                "Seeded credentials"
            );
        }
        Ok(())
    }

    /// Spawn the periodic rate-limit cleanup task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_background_tasks(&self) {
        let rate_limiter = self.rate_limiter.clone();
        let period = self.config.rate_limit_cleanup_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limit cleanup task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = rate_limiter.cleanup() {
                            warn!(error = %e, "Rate limit cleanup failed");
                        }
                        metrics::set_rate_limit_keys(rate_limiter.tracked_keys());
                    }
                }
            }

            debug!("Rate limit cleanup task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
