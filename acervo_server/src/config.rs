//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use acervo::{
    auth::AuthConfig,
    db::DatabaseConfig,
    security::{EmailDomainPolicy, RateLimitConfig},
};
use std::net::SocketAddr;

/// Where durable state lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local maps; everything is lost on restart
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(ConfigError::Invalid {
                var: "STORAGE_BACKEND".to_string(),
                reason: format!("Unknown backend '{other}', expected postgres or memory"),
            }),
        }
    }
}

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    pub storage: StorageBackend,
    /// Database configuration (unused with the memory backend)
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    /// Base URL of the reset page; the token is appended as `?token=`
    pub reset_url_base: String,
    /// Comma-separated registration allow-list, empty for any domain
    pub allowed_email_domains: String,
    /// How long an IP stays blocked after exceeding the login limit
    pub ip_block_minutes: i64,
    pub cleanup_interval_secs: u64,
    pub rate_limits: RateLimits,
}

/// Security-related configuration
#[derive(Clone)]
pub struct SecurityConfig {
    /// JWT signing secret (required)
    pub jwt_secret: String,
    /// Password hashing pepper (required)
    pub password_pepper: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .finish_non_exhaustive()
    }
}

/// Per-endpoint rate limits
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub login: RateLimitConfig,
    pub forgot_password: RateLimitConfig,
    pub reset_password: RateLimitConfig,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            login: RateLimitConfig::login(),
            forgot_password: RateLimitConfig::forgot_password(),
            reset_password: RateLimitConfig::reset_password(),
        }
    }
}

impl RateLimits {
    /// Presets, each overridable with `RATE_LIMIT_<ACTION>_ATTEMPTS` and
    /// `RATE_LIMIT_<ACTION>_WINDOW_MINS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            login: limit_from_env(defaults.login),
            forgot_password: limit_from_env(defaults.forgot_password),
            reset_password: limit_from_env(defaults.reset_password),
        }
    }

    /// Timestamps older than this cannot affect any limit
    pub fn longest_window(&self) -> chrono::Duration {
        [&self.login, &self.forgot_password, &self.reset_password]
            .into_iter()
            .map(RateLimitConfig::window)
            .max()
            .unwrap_or_else(|| chrono::Duration::hours(1))
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `force_memory` - Use the memory backend regardless of `STORAGE_BACKEND`
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        force_memory: bool,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => match std::env::var("SERVER_BIND") {
                Ok(value) => value.parse().map_err(|_| ConfigError::Invalid {
                    var: "SERVER_BIND".to_string(),
                    reason: format!("'{value}' is not an IP:PORT address"),
                })?,
                Err(_) => SocketAddr::from(([127, 0, 0, 1], 8080)),
            },
        };

        let storage = if force_memory {
            StorageBackend::Memory
        } else {
            match std::env::var("STORAGE_BACKEND") {
                Ok(value) => value.parse()?,
                Err(_) => StorageBackend::Postgres,
            }
        };

        let defaults = DatabaseConfig::development();
        let database = DatabaseConfig {
            database_url: database_url_override
                .or_else(|| std::env::var("DATABASE_URL").ok())
                .unwrap_or(defaults.database_url),
            max_connections: parse_env_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: parse_env_or("DB_MIN_CONNECTIONS", defaults.min_connections),
            connection_timeout_secs: parse_env_or(
                "DB_CONNECTION_TIMEOUT_SECS",
                defaults.connection_timeout_secs,
            ),
            idle_timeout_secs: parse_env_or("DB_IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs),
            max_lifetime_secs: parse_env_or("DB_MAX_LIFETIME_SECS", defaults.max_lifetime_secs),
        };

        // Security configuration (REQUIRED)
        let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;

        let password_pepper =
            std::env::var("PASSWORD_PEPPER").map_err(|_| ConfigError::MissingRequired {
                var: "PASSWORD_PEPPER".to_string(),
                hint: "Generate with: openssl rand -hex 16".to_string(),
            })?;

        let security = SecurityConfig {
            jwt_secret,
            password_pepper,
            jwt_issuer: std::env::var("JWT_ISSUER")
                .unwrap_or_else(|_| "acervo-educacional".to_string()),
            jwt_audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "acervo-educacional-app".to_string()),
        };

        let config = ServerConfig {
            bind,
            storage,
            database,
            security,
            reset_url_base: std::env::var("RESET_URL_BASE")
                .unwrap_or_else(|_| "http://localhost:3000/reset-password".to_string()),
            allowed_email_domains: std::env::var("ALLOWED_EMAIL_DOMAINS").unwrap_or_default(),
            ip_block_minutes: parse_env_or("IP_BLOCK_MINUTES", 30),
            cleanup_interval_secs: parse_env_or("CLEANUP_INTERVAL_SECS", 3600),
            rate_limits: RateLimits::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        if self.security.password_pepper.len() < 16 {
            return Err(ConfigError::Invalid {
                var: "PASSWORD_PEPPER".to_string(),
                reason: "Must be at least 16 characters (64-bit security)".to_string(),
            });
        }

        if self.security.jwt_issuer.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "JWT_ISSUER".to_string(),
                reason: "Must not be empty".to_string(),
            });
        }

        if self.security.jwt_audience.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "JWT_AUDIENCE".to_string(),
                reason: "Must not be empty".to_string(),
            });
        }

        if !self.reset_url_base.starts_with("http://") && !self.reset_url_base.starts_with("https://")
        {
            return Err(ConfigError::Invalid {
                var: "RESET_URL_BASE".to_string(),
                reason: "Must be an http(s) URL".to_string(),
            });
        }

        if self.ip_block_minutes <= 0 {
            return Err(ConfigError::Invalid {
                var: "IP_BLOCK_MINUTES".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "CLEANUP_INTERVAL_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.storage == StorageBackend::Postgres {
            if let Some(reason) = self.database.pool_bounds_error() {
                return Err(ConfigError::Invalid {
                    var: "DB_MAX_CONNECTIONS / DB_MIN_CONNECTIONS".to_string(),
                    reason,
                });
            }
        }

        for limit in [
            &self.rate_limits.login,
            &self.rate_limits.forgot_password,
            &self.rate_limits.reset_password,
        ] {
            limit.validate().map_err(|e| ConfigError::Invalid {
                var: format!("RATE_LIMIT ({})", limit.action),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    /// Settings for the authentication core
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(
            self.security.jwt_secret.clone(),
            self.security.password_pepper.clone(),
        )
        .with_issuer(self.security.jwt_issuer.clone())
        .with_audience(self.security.jwt_audience.clone())
        .with_email_policy(EmailDomainPolicy::with_allowed_domains(
            &self.allowed_email_domains,
        ))
    }

    pub fn ip_block_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.ip_block_minutes)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn limit_from_env(preset: RateLimitConfig) -> RateLimitConfig {
    let prefix = format!("RATE_LIMIT_{}", preset.action.to_uppercase());
    RateLimitConfig {
        max_attempts: parse_env_or(&format!("{prefix}_ATTEMPTS"), preset.max_attempts),
        window_mins: parse_env_or(&format!("{prefix}_WINDOW_MINS"), preset.window_mins),
        ..preset
    }
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn valid_config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:8080".parse().unwrap(),
            storage: StorageBackend::Memory,
            database: DatabaseConfig::development(),
            security: SecurityConfig {
                jwt_secret: "a".repeat(32),
                password_pepper: "b".repeat(16),
                jwt_issuer: "acervo-educacional".to_string(),
                jwt_audience: "acervo-educacional-app".to_string(),
            },
            reset_url_base: "https://acervo.example/reset".to_string(),
            allowed_email_domains: String::new(),
            ip_block_minutes: 30,
            cleanup_interval_secs: 3600,
            rate_limits: RateLimits::default(),
        }
    }

    fn clear_env() {
        for key in [
            "SERVER_BIND",
            "STORAGE_BACKEND",
            "DATABASE_URL",
            "JWT_SECRET",
            "PASSWORD_PEPPER",
            "JWT_ISSUER",
            "IP_BLOCK_MINUTES",
            "RATE_LIMIT_LOGIN_ATTEMPTS",
            "RATE_LIMIT_FORGOT_PASSWORD_WINDOW_MINS",
        ] {
            // SAFETY: env-touching tests are serialised
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Use openssl".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("JWT_SECRET"));
        assert!(msg.contains("Use openssl"));
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut config = valid_config();
        config.security.jwt_secret = "short".to_string();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "JWT_SECRET"));
    }

    #[test]
    fn test_short_pepper_rejected() {
        let mut config = valid_config();
        config.security.password_pepper = "pepper".to_string();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "PASSWORD_PEPPER"));
    }

    #[test]
    fn test_non_http_reset_url_rejected() {
        let mut config = valid_config();
        config.reset_url_base = "acervo.example/reset".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let debug = format!("{:?}", valid_config());
        assert!(!debug.contains(&"a".repeat(32)));
        assert!(!debug.contains(&"b".repeat(16)));
    }

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!("memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert_eq!(
            " PostgreSQL ".parse::<StorageBackend>().unwrap(),
            StorageBackend::Postgres
        );
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_auth_config_carries_issuer() {
        let mut config = valid_config();
        config.security.jwt_issuer = "acervo-test".to_string();
        assert_eq!(config.auth_config().issuer, "acervo-test");
    }

    #[test]
    #[serial]
    fn test_from_env_requires_secret() {
        clear_env();

        let err = ServerConfig::from_env(None, None, true).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref var, .. } if var == "JWT_SECRET"));
    }

    #[test]
    #[serial]
    fn test_from_env_with_overrides() {
        clear_env();
        // SAFETY: env-touching tests are serialised
        unsafe {
            std::env::set_var("JWT_SECRET", "s".repeat(40));
            std::env::set_var("PASSWORD_PEPPER", "p".repeat(20));
            std::env::set_var("STORAGE_BACKEND", "postgres");
            std::env::set_var("IP_BLOCK_MINUTES", "45");
        }

        let config = ServerConfig::from_env(
            Some("0.0.0.0:9000".parse().unwrap()),
            Some("postgres://localhost/override".to_string()),
            false,
        )
        .unwrap();

        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(config.database.database_url, "postgres://localhost/override");
        assert_eq!(config.ip_block_minutes, 45);
        assert_eq!(config.security.jwt_issuer, "acervo-educacional");

        let memory = ServerConfig::from_env(None, None, true).unwrap();
        assert_eq!(memory.storage, StorageBackend::Memory);
        assert_eq!(memory.bind, SocketAddr::from(([127, 0, 0, 1], 8080)));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_rate_limit_overrides() {
        clear_env();
        // SAFETY: env-touching tests are serialised
        unsafe {
            std::env::set_var("RATE_LIMIT_LOGIN_ATTEMPTS", "10");
            std::env::set_var("RATE_LIMIT_FORGOT_PASSWORD_WINDOW_MINS", "120");
        }

        let limits = RateLimits::from_env();
        assert_eq!(limits.login.max_attempts, 10);
        // Only the server config reads overrides; library presets stay fixed.
        assert_eq!(RateLimitConfig::login().max_attempts, 5);
        assert_eq!(limits.login.window_mins, 15);
        assert_eq!(limits.forgot_password.window_mins, 120);
        assert_eq!(limits.reset_password, RateLimitConfig::reset_password());
        assert_eq!(limits.longest_window(), chrono::Duration::minutes(120));

        clear_env();
    }
}
