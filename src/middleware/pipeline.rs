//! Ordered request pipeline run before every routed handler.
//!
//! # Stages
//!
//! ```text
//! OPTIONS?  ──yes──▶ 200 preflight
//!    │
//! bypass?   ──yes──▶ continue anonymous (no rate limit, no auth)
//!    │
//! rate limit ──over──▶ 429 RATE_LIMIT_EXCEEDED
//!    │
//! auth      ──store fault──▶ 500 AUTH_ERROR
//!    │      ──required, none──▶ 401 AUTH_REQUIRED
//!    │
//! continue ──▶ RequestAdmission::start ("Request started")
//! ```
//!
//! Every stage runs on the request head alone; the body is read only after
//! the request is admitted. A continued request carries a
//! [`RequestAdmission`]: starting it logs "Request started" and yields the
//! [`RequestCompletion`] that logs "Request completed".

use std::time::Instant;

use axum::http::{Method, StatusCode};
use axum::response::Response;
use serde_json::json;
use tracing::debug;

use super::auth::{AuthManager, AuthenticatedRequest};
use super::policy::{CorsPolicy, LoggingPolicy, MiddlewareConfig};
use super::rate_limit::{RateLimiter, now_millis};
use crate::error::AppError;
use crate::logger::{LogEntry, LogLevel, Logger};
use crate::metrics;
use crate::models::User;
use crate::request::{ParsedBody, RequestContext, rate_limit_key};
use crate::response::ResponseBuilder;

/// Result of running the pipeline for one request.
pub enum PipelineOutcome {
    /// The pipeline answered the request itself.
    Respond(Response),
    /// Hand the request to the router.
    Continue {
        request: AuthenticatedRequest,
        admission: RequestAdmission,
    },
}

/// Shared middleware components, constructed once per process.
#[derive(Clone)]
pub struct MiddlewarePipeline {
    rate_limiter: RateLimiter,
    auth: AuthManager,
    logger: Logger,
    responses: ResponseBuilder,
    cors: CorsPolicy,
}

impl MiddlewarePipeline {
    /// `cors` is the policy `responses` was built from.
    pub fn new(
        rate_limiter: RateLimiter,
        auth: AuthManager,
        logger: Logger,
        cors: CorsPolicy,
    ) -> Self {
        Self {
            rate_limiter,
            auth,
            logger,
            responses: ResponseBuilder::new(&cors),
            cors,
        }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Response builder for `policy`, reusing the shared one when it matches.
    pub fn responses_for(&self, policy: &CorsPolicy) -> ResponseBuilder {
        if *policy == self.cors {
            self.responses.clone()
        } else {
            ResponseBuilder::new(policy)
        }
    }

    /// Append `entry` if it passes the policy's level threshold.
    pub fn record(&self, policy: &LoggingPolicy, entry: LogEntry) {
        if entry.level >= policy.level {
            self.logger.log_as(entry, policy.format);
        }
    }

    /// Run every stage for `ctx` under `config`.
    ///
    /// `prior` is an identity established before the pipeline ran; it
    /// selects the `user:` rate-limit partition.
    pub fn process(
        &self,
        ctx: RequestContext,
        config: &MiddlewareConfig,
        prior: Option<&User>,
    ) -> PipelineOutcome {
        let started = Instant::now();
        let responses = self.responses_for(&config.cors);

        if ctx.method == Method::OPTIONS {
            return PipelineOutcome::Respond(responses.cors_preflight());
        }

        if config.auth.is_bypassed(ctx.path()) {
            debug!(path = ctx.path(), "Bypass path, skipping rate limit and auth");
            let request = AuthenticatedRequest::anonymous(ctx, None);
            return self.admit(request, config, started);
        }

        let key = rate_limit_key(&ctx, prior);
        match self.rate_limiter.check_rate_limit(&key, &config.rate_limit) {
            Ok(decision) if !decision.allowed => {
                metrics::record_rate_limit_rejection();
                let error = AppError::RateLimitExceeded {
                    retry_after: decision.retry_after_secs(now_millis()),
                    limit: config.rate_limit.max_requests,
                };
                self.record(
                    &config.logging,
                    entry_for(&ctx, LogLevel::Warn, "Rate limit exceeded")
                        .with_user_id(prior.map(|u| u.id.clone()))
                        .with_status(error.status().as_u16())
                        .with_metadata(json!({ "key": key })),
                );
                return PipelineOutcome::Respond(error.to_response(&responses, &ctx.request_id));
            }
            Ok(_) => {}
            Err(e) => {
                // Fail open.
                self.record(
                    &config.logging,
                    entry_for(&ctx, LogLevel::Error, "Rate limit check failed")
                        .with_error(e.to_string()),
                );
            }
        }

        let request = match self.auth.authenticate_request(&ctx, &config.auth.strategies) {
            Ok(request) => request,
            Err(e) => {
                // Fail closed.
                metrics::record_auth_failure("store_error");
                self.record(
                    &config.logging,
                    entry_for(&ctx, LogLevel::Error, "Authentication failed")
                        .with_error(e.to_string()),
                );
                let error = AppError::AuthFailed(e);
                return PipelineOutcome::Respond(error.to_response(&responses, &ctx.request_id));
            }
        };

        if config.auth.required && !request.is_authenticated() {
            metrics::record_auth_failure("missing");
            self.record(
                &config.logging,
                entry_for(&ctx, LogLevel::Warn, "Authentication required")
                    .with_status(StatusCode::UNAUTHORIZED.as_u16()),
            );
            return PipelineOutcome::Respond(
                AppError::AuthRequired.to_response(&responses, &ctx.request_id),
            );
        }

        self.admit(request, config, started)
    }

    fn admit(
        &self,
        request: AuthenticatedRequest,
        config: &MiddlewareConfig,
        started: Instant,
    ) -> PipelineOutcome {
        let admission = RequestAdmission {
            pipeline: self.clone(),
            policy: config.logging.clone(),
            started,
        };
        PipelineOutcome::Continue { request, admission }
    }
}

/// An admitted request whose "Request started" entry is not written yet.
#[must_use = "call `start` before running the handler"]
pub struct RequestAdmission {
    pipeline: MiddlewarePipeline,
    policy: LoggingPolicy,
    started: Instant,
}

impl RequestAdmission {
    /// Whether the logging policy wants the parsed body on the start entry.
    pub fn wants_body(&self) -> bool {
        self.policy.include_request_body
    }

    /// Log "Request started", with `body` metadata when the policy asks for it.
    pub fn start(self, request: &AuthenticatedRequest, body: Option<&ParsedBody>) -> RequestCompletion {
        let ctx = request.context();
        let user_id = request.user_id().map(str::to_string);

        let mut entry = entry_for(ctx, LogLevel::Info, "Request started").with_user_id(user_id.clone());
        if self.policy.include_request_body
            && let Some(body) = body
        {
            entry = entry.with_metadata(json!({ "body": body.to_log_value() }));
        }
        self.pipeline.record(&self.policy, entry);

        RequestCompletion {
            template: entry_for(ctx, LogLevel::Info, "Request completed").with_user_id(user_id),
            pipeline: self.pipeline,
            policy: self.policy,
            started: self.started,
        }
    }
}

/// Logs "Request completed" with status and duration.
#[must_use = "call `complete` once the response status is known"]
pub struct RequestCompletion {
    pipeline: MiddlewarePipeline,
    policy: LoggingPolicy,
    template: LogEntry,
    started: Instant,
}

impl RequestCompletion {
    /// Client errors and failures complete at `warn`; the failure itself is
    /// logged once by whoever handled it.
    pub fn complete(self, status: StatusCode) {
        let mut entry = self
            .template
            .with_status(status.as_u16())
            .with_duration_ms(self.started.elapsed().as_millis() as u64);
        if status.is_client_error() || status.is_server_error() {
            entry.level = LogLevel::Warn;
        }
        self.pipeline.record(&self.policy, entry);
    }
}

fn entry_for(ctx: &RequestContext, level: LogLevel, message: &str) -> LogEntry {
    LogEntry::new(
        level,
        message,
        ctx.request_id.clone(),
        ctx.method.as_str(),
        ctx.url(),
    )
    .with_user_agent(ctx.user_agent.clone())
    .with_ip(ctx.client_ip.clone())
}
