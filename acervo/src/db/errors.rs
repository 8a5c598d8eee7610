//! Persistence error types.

use thiserror::Error;

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unique constraint violated
    #[error("Duplicate value for {0}")]
    Duplicate(&'static str),

    /// Stored value could not be decoded
    #[error("Corrupt {column} value: {value}")]
    Corrupt { column: &'static str, value: String },
}

/// Result type for persistence operations
pub type StoreResult<T> = Result<T, StoreError>;
