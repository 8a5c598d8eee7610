//! Authentication error types.

use crate::db::StoreError;
use thiserror::Error;

/// Authentication errors
///
/// The first group is the taxonomy callers see. The internal group never leaves
/// [`AuthManager`](super::AuthManager): it is logged and replaced by
/// [`AuthError::Internal`] at the operation boundary.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed email or empty field
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown email or wrong password
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Account is not active
    #[error("Account is inactive")]
    AccountInactive,

    /// Account is temporarily locked after repeated failures
    #[error("Account temporarily locked due to too many failed login attempts")]
    AccountLocked,

    /// Password too weak
    #[error("Password too weak: {0}")]
    WeakPassword(String),

    /// Refresh, reset or access token unknown, used, revoked or expired
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    /// Email already registered
    #[error("Email already registered")]
    EmailTaken,

    /// Rate limited
    #[error("Too many attempts, please try again later")]
    RateLimited,

    /// Unexpected fault, details logged server-side
    #[error("Internal server error")]
    Internal,

    /// Persistence failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Password hashing failed
    #[error("Password hashing failed")]
    HashingFailed,

    /// JWT encoding failure
    #[error("JWT error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl AuthError {
    /// Whether this is an internal fault rather than a business-rule rejection
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AuthError::Internal
                | AuthError::Store(_)
                | AuthError::HashingFailed
                | AuthError::Token(_)
        )
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    pub fn client_message(&self) -> String {
        if self.is_internal() {
            return "Internal server error".to_string();
        }
        self.to_string()
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
