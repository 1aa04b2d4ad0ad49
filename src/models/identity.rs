use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::middleware::policy::RateLimitConfig;

/// Caller role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Resolved caller identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: Role,
    pub permissions: Vec<String>,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a plain `user`-role identity.
    pub fn new(id: impl Into<String>, permissions: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            email: None,
            role: Role::User,
            permissions,
            last_active: now,
            created_at: now,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Issued API key record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub key: String,
    pub user_id: String,
    pub permissions: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// A key is expired once `now` is strictly past `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(expires_at: Option<DateTime<Utc>>) -> ApiKey {
        ApiKey {
            key: "mtc_test".into(),
            user_id: "u1".into(),
            permissions: vec!["read".into()],
            rate_limit: RateLimitConfig::default(),
            created_at: Utc::now(),
            expires_at,
            last_used: None,
        }
    }

    #[test]
    fn test_key_without_expiry_never_expires() {
        assert!(!key(None).is_expired_at(Utc::now() + Duration::days(3650)));
    }

    #[test]
    fn test_key_expiry_boundary() {
        let expires = Utc::now();
        let api_key = key(Some(expires));
        assert!(!api_key.is_expired_at(expires));
        assert!(api_key.is_expired_at(expires + Duration::milliseconds(1)));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let user = User::new("u1", vec![]).with_role(Role::Admin);
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["role"], "admin");
        assert!(value.get("email").is_none());
    }
}
