//! Persistence layer: repository traits, PostgreSQL and in-memory backends.
//!
//! The PostgreSQL pool is managed with sqlx; the schema lives in
//! `migrations/001_auth_schema.sql`.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod memory;
pub mod repository;

pub use config::DatabaseConfig;
pub use errors::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use repository::{
    ActivityLogRepository, PgActivityLogRepository, PgResetTokenRepository, PgSessionRepository,
    PgUserRepository, ResetTokenRepository, SessionRepository, UserRepository,
};

/// Schema applied by [`Database::migrate`]
const SCHEMA: &str = include_str!("../../migrations/001_auth_schema.sql");

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use acervo::db::{Database, DatabaseConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), sqlx::Error> {
    ///     let config = DatabaseConfig::with_url("postgres://postgres@localhost/acervo");
    ///     let db = Database::new(&config).await?;
    ///     db.health_check().await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(config.idle_timeout())
            .max_lifetime(config.max_lifetime())
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the authentication tables if they do not exist
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if the database connection is healthy
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Repository handles backed by this pool
    pub fn stores(&self) -> Stores {
        Stores {
            users: Arc::new(PgUserRepository::new(self.pool.clone())),
            sessions: Arc::new(PgSessionRepository::new(self.pool.clone())),
            reset_tokens: Arc::new(PgResetTokenRepository::new(self.pool.clone())),
            activity: Arc::new(PgActivityLogRepository::new(self.pool.clone())),
        }
    }

    /// Close the database connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// The four repositories the authentication core depends on
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub reset_tokens: Arc<dyn ResetTokenRepository>,
    pub activity: Arc<dyn ActivityLogRepository>,
}

impl Stores {
    /// Point every repository at one in-memory store
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            sessions: store.clone(),
            reset_tokens: store.clone(),
            activity: store,
        }
    }
}
