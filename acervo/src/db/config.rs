//! Connection pool settings for the PostgreSQL backend.

use std::time::Duration;

const DEV_DATABASE_URL: &str = "postgres://postgres@localhost/acervo";

/// Pool sizing and timeouts. Timeouts are whole seconds so they can be
/// read straight from `DB_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long `acquire` waits for a free connection
    pub connection_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    /// Connections are recycled after this age
    pub max_lifetime_secs: u64,
}

impl DatabaseConfig {
    /// Local defaults pointed at `database_url`
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::development()
        }
    }

    /// Small pool against a local `acervo` database
    pub fn development() -> Self {
        Self {
            database_url: DEV_DATABASE_URL.to_string(),
            max_connections: 20,
            min_connections: 2,
            connection_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    /// Describes the problem when the pool bounds cannot be satisfied
    pub fn pool_bounds_error(&self) -> Option<String> {
        if self.max_connections == 0 {
            Some("Max connections must be greater than 0".to_string())
        } else if self.min_connections > self.max_connections {
            Some(format!(
                "Min connections ({}) cannot exceed max connections ({})",
                self.min_connections, self.max_connections
            ))
        } else {
            None
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::development()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_url_keeps_pool_defaults() {
        let config = DatabaseConfig::with_url("postgres://u@db/acervo_test");
        assert_eq!(config.database_url, "postgres://u@db/acervo_test");
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(10));
        assert!(config.pool_bounds_error().is_none());
    }

    #[test]
    fn test_pool_bounds() {
        let mut config = DatabaseConfig::development();
        config.min_connections = 30;
        assert!(config.pool_bounds_error().is_some());

        config.min_connections = 0;
        config.max_connections = 0;
        assert!(config.pool_bounds_error().is_some());
    }
}
