//! Authentication configuration.

use crate::security::EmailDomainPolicy;
use chrono::Duration;

/// Secrets, token lifetimes and lockout policy for [`super::AuthManager`]
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    pub pepper: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub reset_token_ttl: Duration,
    pub max_failed_logins: i32,
    pub lockout_duration: Duration,
    pub email_policy: EmailDomainPolicy,
}

impl AuthConfig {
    /// Defaults: 60 min access tokens, 7 day refresh tokens, 2 h reset tokens,
    /// 30 min lockout after 5 failed logins.
    pub fn new(jwt_secret: impl Into<String>, pepper: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            issuer: "acervo-educacional".to_string(),
            audience: "acervo-educacional-app".to_string(),
            pepper: pepper.into(),
            access_token_ttl: Duration::minutes(60),
            refresh_token_ttl: Duration::days(7),
            reset_token_ttl: Duration::hours(2),
            max_failed_logins: 5,
            lockout_duration: Duration::minutes(30),
            email_policy: EmailDomainPolicy::new(),
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    pub fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    pub fn with_reset_token_ttl(mut self, ttl: Duration) -> Self {
        self.reset_token_ttl = ttl;
        self
    }

    /// Lock the account for `duration` once `max_failed_logins` is reached
    pub fn with_lockout(mut self, max_failed_logins: i32, duration: Duration) -> Self {
        self.max_failed_logins = max_failed_logins;
        self.lockout_duration = duration;
        self
    }

    pub fn with_email_policy(mut self, policy: EmailDomainPolicy) -> Self {
        self.email_policy = policy;
        self
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("reset_token_ttl", &self.reset_token_ttl)
            .field("max_failed_logins", &self.max_failed_logins)
            .field("lockout_duration", &self.lockout_duration)
            .finish_non_exhaustive()
    }
}
