//! Caller identity resolution.
//!
//! # Resolution Order
//!
//! 1. `X-API-Key` header: looked up in the key table. A live key resolves its
//!    user and stamps `last_used`. An expired key is deleted on detection and
//!    then behaves exactly like an unknown key.
//! 2. `Authorization: Bearer <token>`, when no live key resolved: looked up
//!    directly in the user table. A presented key is still carried on the
//!    result.
//!    There is no signature verification; a token is either registered or not.
//! 3. Neither: anonymous.
//!
//! Being unauthenticated is a normal outcome, not an error. [`AuthError`]
//! only reports credential store faults, which the pipeline treats as
//! fail-closed.
//!
//! # Tables
//!
//! Users are keyed by the credential that resolves them (API key or bearer
//! token). There is no user-id index.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use rand::distr::Alphanumeric;
use thiserror::Error;
use tracing::{debug, info};

use super::policy::{AuthStrategy, RateLimitConfig};
use crate::models::{ApiKey, User};
use crate::request::RequestContext;

/// Header name for API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Prefix of every issued API key.
pub const API_KEY_PREFIX: &str = "mtc_";

/// Random characters following the prefix.
pub const API_KEY_RANDOM_LENGTH: usize = 32;

/// Credential store failure.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Backing tables for API keys and users.
pub trait CredentialStore: Send + Sync {
    fn api_key(&self, key: &str) -> Result<Option<ApiKey>, AuthError>;

    fn insert_api_key(&self, record: ApiKey) -> Result<(), AuthError>;

    /// Remove a key record. Returns whether it existed.
    fn remove_api_key(&self, key: &str) -> Result<bool, AuthError>;

    /// Stamp `last_used` on a key record.
    fn touch_api_key(&self, key: &str, at: DateTime<Utc>) -> Result<(), AuthError>;

    /// User resolved by `credential`.
    fn user(&self, credential: &str) -> Result<Option<User>, AuthError>;

    fn insert_user(&self, credential: &str, user: User) -> Result<(), AuthError>;

    /// Stamp `last_active` and return the updated user.
    fn touch_user(&self, credential: &str, at: DateTime<Utc>) -> Result<Option<User>, AuthError>;

    fn remove_user(&self, credential: &str) -> Result<bool, AuthError>;
}

/// In-memory credential tables.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    api_keys: DashMap<String, ApiKey>,
    users: DashMap<String, User>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn api_key(&self, key: &str) -> Result<Option<ApiKey>, AuthError> {
        Ok(self.api_keys.get(key).map(|entry| entry.value().clone()))
    }

    fn insert_api_key(&self, record: ApiKey) -> Result<(), AuthError> {
        self.api_keys.insert(record.key.clone(), record);
        Ok(())
    }

    fn remove_api_key(&self, key: &str) -> Result<bool, AuthError> {
        Ok(self.api_keys.remove(key).is_some())
    }

    fn touch_api_key(&self, key: &str, at: DateTime<Utc>) -> Result<(), AuthError> {
        if let Some(mut record) = self.api_keys.get_mut(key) {
            record.last_used = Some(at);
        }
        Ok(())
    }

    fn user(&self, credential: &str) -> Result<Option<User>, AuthError> {
        Ok(self.users.get(credential).map(|entry| entry.value().clone()))
    }

    fn insert_user(&self, credential: &str, user: User) -> Result<(), AuthError> {
        self.users.insert(credential.to_string(), user);
        Ok(())
    }

    fn touch_user(&self, credential: &str, at: DateTime<Utc>) -> Result<Option<User>, AuthError> {
        Ok(self.users.get_mut(credential).map(|mut user| {
            user.last_active = at;
            user.clone()
        }))
    }

    fn remove_user(&self, credential: &str) -> Result<bool, AuthError> {
        Ok(self.users.remove(credential).is_some())
    }
}

/// Request context plus the identity resolved for it.
///
/// `is_authenticated()` is true exactly when a user was resolved.
#[derive(Debug, Clone)]
pub struct AuthenticatedRequest {
    context: RequestContext,
    user: Option<User>,
    api_key: Option<String>,
}

impl AuthenticatedRequest {
    /// No identity. `api_key` carries a presented but unresolved key.
    pub fn anonymous(context: RequestContext, api_key: Option<String>) -> Self {
        Self {
            context,
            user: None,
            api_key,
        }
    }

    pub fn authenticated(context: RequestContext, user: User, api_key: Option<String>) -> Self {
        Self {
            context,
            user: Some(user),
            api_key,
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Resolves identities and issues credentials.
#[derive(Clone)]
pub struct AuthManager {
    store: Arc<dyn CredentialStore>,
}

impl AuthManager {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Auth manager backed by a fresh [`MemoryCredentialStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCredentialStore::new()))
    }

    /// Resolve the caller for `ctx` using the accepted `strategies`.
    pub fn authenticate_request(
        &self,
        ctx: &RequestContext,
        strategies: &[AuthStrategy],
    ) -> Result<AuthenticatedRequest, AuthError> {
        self.authenticate_request_at(ctx, strategies, Utc::now())
    }

    /// Same as [`authenticate_request`](Self::authenticate_request) with an explicit clock.
    pub fn authenticate_request_at(
        &self,
        ctx: &RequestContext,
        strategies: &[AuthStrategy],
        now: DateTime<Utc>,
    ) -> Result<AuthenticatedRequest, AuthError> {
        let mut presented = None;
        if strategies.contains(&AuthStrategy::ApiKey)
            && let Some(key) = ctx.header(API_KEY_HEADER).map(str::trim)
            && !key.is_empty()
        {
            if let Some(user) = self.resolve_api_key(key, now)? {
                return Ok(AuthenticatedRequest::authenticated(
                    ctx.clone(),
                    user,
                    Some(key.to_string()),
                ));
            }
            presented = Some(key.to_string());
        }

        if strategies.contains(&AuthStrategy::Bearer)
            && let Some(token) = bearer_token(ctx)
        {
            match self.store.touch_user(token, now)? {
                Some(user) => {
                    debug!(user_id = %user.id, "Bearer token resolved");
                    return Ok(AuthenticatedRequest::authenticated(ctx.clone(), user, presented));
                }
                None => debug!("Unknown bearer token"),
            }
        }

        Ok(AuthenticatedRequest::anonymous(ctx.clone(), presented))
    }

    /// User behind a live key. Unknown and expired keys resolve to `None`.
    fn resolve_api_key(&self, key: &str, now: DateTime<Utc>) -> Result<Option<User>, AuthError> {
        let Some(record) = self.store.api_key(key)? else {
            debug!("Unknown API key");
            return Ok(None);
        };

        if record.is_expired_at(now) {
            self.store.remove_api_key(key)?;
            self.store.remove_user(key)?;
            info!(user_id = %record.user_id, "Expired API key removed");
            return Ok(None);
        }

        self.store.touch_api_key(key, now)?;
        let user = match self.store.touch_user(key, now)? {
            Some(user) => user,
            None => {
                // Key issued without a user row; rebuild it from the key record.
                let mut user = User::new(record.user_id.clone(), record.permissions.clone());
                user.last_active = now;
                self.store.insert_user(key, user.clone())?;
                user
            }
        };

        debug!(user_id = %user.id, "API key resolved");
        Ok(Some(user))
    }

    /// Issue a new non-expiring key for `user_id`.
    pub fn create_api_key(
        &self,
        user_id: &str,
        permissions: Vec<String>,
    ) -> Result<ApiKey, AuthError> {
        self.create_api_key_with_ttl(user_id, permissions, None)
    }

    /// Issue a new key that expires `ttl` after creation.
    pub fn create_api_key_with_ttl(
        &self,
        user_id: &str,
        permissions: Vec<String>,
        ttl: Option<Duration>,
    ) -> Result<ApiKey, AuthError> {
        let created_at = Utc::now();
        let record = ApiKey {
            key: generate_api_key(),
            user_id: user_id.to_string(),
            permissions: permissions.clone(),
            rate_limit: RateLimitConfig::default(),
            created_at,
            expires_at: ttl.map(|ttl| created_at + ttl),
            last_used: None,
        };

        self.store.insert_api_key(record.clone())?;
        self.store
            .insert_user(&record.key, User::new(user_id, permissions))?;

        info!(user_id, expires_at = ?record.expires_at, "API key issued");
        Ok(record)
    }

    /// Register a known key string for `user` (used for seeding).
    pub fn register_api_key(&self, key: &str, user: User) -> Result<ApiKey, AuthError> {
        let record = ApiKey {
            key: key.to_string(),
            user_id: user.id.clone(),
            permissions: user.permissions.clone(),
            rate_limit: RateLimitConfig::default(),
            created_at: Utc::now(),
            expires_at: None,
            last_used: None,
        };
        self.store.insert_api_key(record.clone())?;
        self.store.insert_user(key, user)?;
        Ok(record)
    }

    /// Register a bearer token resolving to `user`.
    pub fn register_bearer_token(&self, token: &str, user: User) -> Result<(), AuthError> {
        self.store.insert_user(token, user)
    }

    /// Delete a key and its user row. Returns whether the key existed.
    pub fn revoke_api_key(&self, key: &str) -> Result<bool, AuthError> {
        let existed = self.store.remove_api_key(key)?;
        self.store.remove_user(key)?;
        Ok(existed)
    }

    /// Current key record, if any.
    pub fn api_key(&self, key: &str) -> Result<Option<ApiKey>, AuthError> {
        self.store.api_key(key)
    }
}

/// `mtc_` followed by 32 random alphanumerics.
pub fn generate_api_key() -> String {
    let random: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(API_KEY_RANDOM_LENGTH)
        .map(char::from)
        .collect();
    format!("{API_KEY_PREFIX}{random}")
}

/// Token from `Authorization: Bearer <token>`. The scheme is case-insensitive.
fn bearer_token(ctx: &RequestContext) -> Option<&str> {
    let value = ctx.header("authorization")?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::middleware::request_id::RequestId;
    use axum::body::Body;
    use axum::http::Request;

    const BOTH: [AuthStrategy; 2] = [AuthStrategy::ApiKey, AuthStrategy::Bearer];

    fn context(headers: &[(&'static str, &str)]) -> RequestContext {
        let mut builder = Request::builder().uri("/api/bus/location");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(Body::empty()).unwrap().into_parts();
        parts.extensions.insert(RequestId("req_auth".into()));
        RequestContext::from_parts(&parts, Arc::new(Config::default()))
    }

    #[test]
    fn test_generated_key_format() {
        let key = generate_api_key();
        assert!(key.starts_with(API_KEY_PREFIX));
        assert_eq!(key.len(), API_KEY_PREFIX.len() + API_KEY_RANDOM_LENGTH);
        assert!(key[API_KEY_PREFIX.len()..].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(key, generate_api_key());
    }

    #[test]
    fn test_created_key_authenticates() {
        let auth = AuthManager::in_memory();
        let issued = auth.create_api_key("driver-7", vec!["read".into()]).unwrap();
        assert_eq!(issued.rate_limit, RateLimitConfig::default());

        let result = auth
            .authenticate_request(&context(&[(API_KEY_HEADER, issued.key.as_str())]), &BOTH)
            .unwrap();

        assert!(result.is_authenticated());
        assert_eq!(result.user_id(), Some("driver-7"));
        assert_eq!(result.api_key(), Some(issued.key.as_str()));
        assert!(auth.api_key(&issued.key).unwrap().unwrap().last_used.is_some());
    }

    #[test]
    fn test_unknown_key_is_anonymous_with_raw_key() {
        let auth = AuthManager::in_memory();
        let result = auth
            .authenticate_request(&context(&[(API_KEY_HEADER, "mtc_nope")]), &BOTH)
            .unwrap();

        assert!(!result.is_authenticated());
        assert!(result.user().is_none());
        assert_eq!(result.api_key(), Some("mtc_nope"));
    }

    #[test]
    fn test_expired_key_is_removed_and_idempotent() {
        let auth = AuthManager::in_memory();
        let issued = auth
            .create_api_key_with_ttl("u1", vec![], Some(Duration::minutes(5)))
            .unwrap();
        let ctx = context(&[(API_KEY_HEADER, issued.key.as_str())]);
        let later = Utc::now() + Duration::minutes(10);

        let first = auth.authenticate_request_at(&ctx, &BOTH, later).unwrap();
        assert!(!first.is_authenticated());
        assert!(auth.api_key(&issued.key).unwrap().is_none());

        let second = auth.authenticate_request_at(&ctx, &BOTH, later).unwrap();
        assert!(!second.is_authenticated());
        assert_eq!(second.api_key(), Some(issued.key.as_str()));
    }

    #[test]
    fn test_bearer_token_lookup() {
        let auth = AuthManager::in_memory();
        auth.register_bearer_token("tok-123", User::new("ops", vec!["admin".into()]))
            .unwrap();

        let result = auth
            .authenticate_request(&context(&[("authorization", "bearer tok-123")]), &BOTH)
            .unwrap();
        assert!(result.is_authenticated());
        assert_eq!(result.user_id(), Some("ops"));
        assert_eq!(result.api_key(), None);

        let unknown = auth
            .authenticate_request(&context(&[("authorization", "Bearer other")]), &BOTH)
            .unwrap();
        assert!(!unknown.is_authenticated());
    }

    #[test]
    fn test_unknown_api_key_falls_through_to_bearer() {
        let auth = AuthManager::in_memory();
        auth.register_bearer_token("tok-123", User::new("ops", vec![]))
            .unwrap();

        let result = auth
            .authenticate_request(
                &context(&[(API_KEY_HEADER, "bogus"), ("authorization", "Bearer tok-123")]),
                &BOTH,
            )
            .unwrap();
        assert!(result.is_authenticated());
        assert_eq!(result.user_id(), Some("ops"));
        assert_eq!(result.api_key(), Some("bogus"));
    }

    #[test]
    fn test_expired_api_key_falls_through_to_bearer() {
        let auth = AuthManager::in_memory();
        auth.register_bearer_token("tok-123", User::new("ops", vec![]))
            .unwrap();
        let issued = auth
            .create_api_key_with_ttl("u1", vec![], Some(Duration::minutes(5)))
            .unwrap();
        let ctx = context(&[
            (API_KEY_HEADER, issued.key.as_str()),
            ("authorization", "Bearer tok-123"),
        ]);

        let result = auth
            .authenticate_request_at(&ctx, &BOTH, Utc::now() + Duration::minutes(10))
            .unwrap();
        assert_eq!(result.user_id(), Some("ops"));
        assert!(auth.api_key(&issued.key).unwrap().is_none());
    }

    #[test]
    fn test_live_api_key_wins_over_bearer() {
        let auth = AuthManager::in_memory();
        auth.register_bearer_token("tok-123", User::new("ops", vec![]))
            .unwrap();
        let issued = auth.create_api_key("driver-7", vec![]).unwrap();

        let result = auth
            .authenticate_request(
                &context(&[
                    (API_KEY_HEADER, issued.key.as_str()),
                    ("authorization", "Bearer tok-123"),
                ]),
                &BOTH,
            )
            .unwrap();
        assert_eq!(result.user_id(), Some("driver-7"));
    }

    #[test]
    fn test_strategies_restrict_resolution() {
        let auth = AuthManager::in_memory();
        let issued = auth.create_api_key("u1", vec![]).unwrap();

        let result = auth
            .authenticate_request(
                &context(&[(API_KEY_HEADER, issued.key.as_str())]),
                &[AuthStrategy::Bearer],
            )
            .unwrap();
        assert!(!result.is_authenticated());
        assert_eq!(result.api_key(), None);
    }

    #[test]
    fn test_no_credentials() {
        let auth = AuthManager::in_memory();
        let result = auth.authenticate_request(&context(&[]), &BOTH).unwrap();
        assert!(!result.is_authenticated());
        assert_eq!(result.api_key(), None);
    }

    #[test]
    fn test_non_bearer_scheme_is_ignored() {
        let auth = AuthManager::in_memory();
        auth.register_bearer_token("abc", User::new("u", vec![])).unwrap();
        let result = auth
            .authenticate_request(&context(&[("authorization", "Basic abc")]), &BOTH)
            .unwrap();
        assert!(!result.is_authenticated());
    }

    #[test]
    fn test_revoke_api_key() {
        let auth = AuthManager::in_memory();
        let issued = auth.create_api_key("u1", vec![]).unwrap();

        assert!(auth.revoke_api_key(&issued.key).unwrap());
        assert!(!auth.revoke_api_key(&issued.key).unwrap());

        let result = auth
            .authenticate_request(&context(&[(API_KEY_HEADER, issued.key.as_str())]), &BOTH)
            .unwrap();
        assert!(!result.is_authenticated());
    }

    #[test]
    fn test_registered_key_resolves_seeded_user() {
        let auth = AuthManager::in_memory();
        auth.register_api_key("dispatch-key", User::new("dispatch", vec![]))
            .unwrap();

        let result = auth
            .authenticate_request(&context(&[(API_KEY_HEADER, "dispatch-key")]), &BOTH)
            .unwrap();
        assert_eq!(result.user_id(), Some("dispatch"));
    }
}
