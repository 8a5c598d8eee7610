//! Structured logging.
//!
//! The `acervo` library logs through the `log` facade; those records are
//! bridged into the tracing subscriber installed here, so library and server
//! output share one filter and one format.

use acervo::auth::UserId;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default directives when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
///
/// Call once, before the first log line.
///
/// ```no_run
/// acervo_server::logging::init();
/// tracing::info!("Server starting");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    tracing::debug!("Structured logging initialized");
}

/// Security-relevant decisions taken by the HTTP layer.
///
/// Events about accounts (lockouts, disposable emails) are recorded by the
/// library in the activity log; these cover what only the server sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLog<'a> {
    RateLimited {
        action: &'a str,
        ip: Option<&'a str>,
    },
    IpBlocked {
        ip: &'a str,
        minutes: i64,
    },
    BlockedIpRequest {
        ip: &'a str,
    },
    SuspiciousLogin {
        user_id: UserId,
    },
}

impl SecurityLog<'_> {
    pub fn event_type(&self) -> &'static str {
        match self {
            SecurityLog::RateLimited { .. } => "rate_limited",
            SecurityLog::IpBlocked { .. } => "ip_blocked",
            SecurityLog::BlockedIpRequest { .. } => "blocked_ip_request",
            SecurityLog::SuspiciousLogin { .. } => "suspicious_login",
        }
    }

    /// Emit as a `SECURITY:` warning with `event_type`, `user_id` and
    /// `ip_address` fields.
    ///
    /// ```
    /// use acervo_server::logging::SecurityLog;
    ///
    /// SecurityLog::RateLimited { action: "login", ip: Some("192.168.1.1") }.emit();
    /// ```
    pub fn emit(&self) {
        let (user_id, ip_address) = match *self {
            SecurityLog::RateLimited { ip, .. } => (None, ip),
            SecurityLog::IpBlocked { ip, .. } | SecurityLog::BlockedIpRequest { ip } => {
                (None, Some(ip))
            }
            SecurityLog::SuspiciousLogin { user_id } => (Some(user_id), None),
        };

        tracing::warn!(
            event_type = self.event_type(),
            user_id,
            ip_address,
            "SECURITY: {}",
            self.describe()
        );
    }

    fn describe(&self) -> String {
        match self {
            SecurityLog::RateLimited { action, .. } => format!("{action} rate limit exceeded"),
            SecurityLog::IpBlocked { minutes, .. } => format!("IP blocked for {minutes} minutes"),
            SecurityLog::BlockedIpRequest { .. } => "Request from blocked IP refused".to_string(),
            SecurityLog::SuspiciousLogin { .. } => {
                "Suspicious activity detected after login".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(DEFAULT_FILTER.parse::<EnvFilter>().is_ok());
    }

    #[test]
    fn test_descriptions() {
        let limited = SecurityLog::RateLimited {
            action: "forgot_password",
            ip: None,
        };
        assert_eq!(limited.event_type(), "rate_limited");
        assert_eq!(limited.describe(), "forgot_password rate limit exceeded");

        let blocked = SecurityLog::IpBlocked {
            ip: "10.0.0.1",
            minutes: 30,
        };
        assert_eq!(blocked.describe(), "IP blocked for 30 minutes");
    }

    #[test]
    fn test_emit_without_subscriber() {
        SecurityLog::SuspiciousLogin { user_id: 7 }.emit();
        SecurityLog::BlockedIpRequest { ip: "127.0.0.1" }.emit();
    }
}
