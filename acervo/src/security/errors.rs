//! Error types for security module

use crate::db::StoreError;
use thiserror::Error;

/// Result type for security operations
pub type SecurityResult<T> = Result<T, SecurityError>;

/// Security component errors
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Persistence error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Value is not an IP address
    #[error("Invalid IP address: {0}")]
    InvalidIp(String),

    /// Rate limit configuration is unusable
    #[error("Invalid rate limit configuration: {0}")]
    Configuration(String),

    /// Shared state lock was poisoned by a panicking holder
    #[error("Security state unavailable: {0}")]
    Unavailable(&'static str),
}
