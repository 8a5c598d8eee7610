//! # Acervo
//!
//! Authentication and security core of the Acervo Educacional content
//! management system.
//!
//! ## Core Modules
//!
//! - [`auth`]: login, token refresh, logout, password reset and change, token validation
//! - [`security`]: rate limiting, IP blocking, suspicious-activity detection, input validation
//! - [`db`]: repository traits with PostgreSQL and in-memory backends
//! - [`clock`]: injectable time source
//! - [`mailer`]: outbound email collaborator
//!
//! All durable state goes through the repository traits in [`db`], and all
//! time is read from a [`clock::Clock`], so every flow can be exercised
//! deterministically in memory.

/// Authentication flows, tokens and password handling.
pub mod auth;

/// Injectable time source.
pub mod clock;

/// Persistence layer.
pub mod db;

/// Outbound email.
pub mod mailer;

/// Rate limiting, IP blocking and activity auditing.
pub mod security;

pub use auth::{AuthConfig, AuthError, AuthManager, AuthResult};
