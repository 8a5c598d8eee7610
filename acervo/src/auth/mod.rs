//! Authentication module providing registration, login, and session management.
//!
//! This module implements:
//! - Argon2id password hashing with server-side pepper
//! - HS256 access tokens (60-minute expiry) cross-checked against live sessions
//! - Rotating refresh tokens (7-day expiry)
//! - Account lockout after repeated failed logins
//! - Single-use password reset tokens (2-hour expiry)
//!
//! ## Example
//!
//! ```
//! use acervo::auth::{AuthConfig, AuthManager, RegisterRequest};
//! use acervo::clock::SystemClock;
//! use acervo::db::{MemoryStore, Stores};
//! use acervo::mailer::LogMailer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let auth = AuthManager::new(
//!         Stores::in_memory(MemoryStore::shared()),
//!         Arc::new(LogMailer::default()),
//!         Arc::new(SystemClock),
//!         AuthConfig::new("jwt_secret_at_least_32_characters_long", "pepper_16_chars_"),
//!     );
//!
//!     auth.register(RegisterRequest {
//!         name: "Alice".to_string(),
//!         email: "alice@x.com".to_string(),
//!         password: "Str0ng@Pass".to_string(),
//!         role: None,
//!     })
//!     .await?;
//!
//!     let login = auth.login("alice@x.com", "Str0ng@Pass", None, None).await?;
//!     assert!(auth.validate_token(&login.access_token).await);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod errors;
pub mod manager;
pub mod models;
pub mod password;
pub mod tokens;

pub use config::AuthConfig;
pub use errors::{AuthError, AuthResult};
pub use manager::{AuthManager, CleanupReport};
pub use models::{
    AccessTokenClaims, LoginResponse, NewResetToken, NewSession, NewUser, RegisterRequest,
    ResetToken, Session, SessionRotation, TokenPair, User, UserId, UserRole, UserStatus,
    UserSummary,
};
pub use password::{PasswordHasher, PasswordPolicy};
pub use tokens::TokenIssuer;
