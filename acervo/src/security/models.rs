//! Activity log data models.

use crate::auth::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Activity log event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Login,
    LoginFailed,
    Logout,
    RefreshToken,
    PasswordResetRequested,
    PasswordChanged,
    SecurityAlert,
    SuspiciousActivity,
}

impl ActivityKind {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Login => "login",
            ActivityKind::LoginFailed => "login_failed",
            ActivityKind::Logout => "logout",
            ActivityKind::RefreshToken => "refresh_token",
            ActivityKind::PasswordResetRequested => "password_reset_requested",
            ActivityKind::PasswordChanged => "password_changed",
            ActivityKind::SecurityAlert => "security_alert",
            ActivityKind::SuspiciousActivity => "suspicious_activity",
        }
    }

    /// Parse the database representation
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "login" => Some(ActivityKind::Login),
            "login_failed" => Some(ActivityKind::LoginFailed),
            "logout" => Some(ActivityKind::Logout),
            "refresh_token" => Some(ActivityKind::RefreshToken),
            "password_reset_requested" => Some(ActivityKind::PasswordResetRequested),
            "password_changed" => Some(ActivityKind::PasswordChanged),
            "security_alert" => Some(ActivityKind::SecurityAlert),
            "suspicious_activity" => Some(ActivityKind::SuspiciousActivity),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only activity log record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub user_id: Option<UserId>,
    pub kind: ActivityKind,
    pub description: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to append an activity record
#[derive(Debug, Clone)]
pub struct NewActivityEntry {
    pub user_id: Option<UserId>,
    pub kind: ActivityKind,
    pub description: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewActivityEntry {
    /// Build an entry, normalizing the IP and dropping unparsable ones
    pub fn new(
        user_id: Option<UserId>,
        kind: ActivityKind,
        description: impl Into<String>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            kind,
            description: description.into(),
            ip_address: ip_address.and_then(super::validation::parse_ip),
            user_agent: user_agent
                .map(str::trim)
                .filter(|ua| !ua.is_empty())
                .map(str::to_string),
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            ActivityKind::Login,
            ActivityKind::LoginFailed,
            ActivityKind::Logout,
            ActivityKind::RefreshToken,
            ActivityKind::PasswordResetRequested,
            ActivityKind::PasswordChanged,
            ActivityKind::SecurityAlert,
            ActivityKind::SuspiciousActivity,
        ] {
            assert_eq!(ActivityKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_new_entry_normalizes_ip_and_user_agent() {
        let entry = NewActivityEntry::new(
            Some(1),
            ActivityKind::Login,
            "ok",
            Some("::ffff:10.0.0.1"),
            Some("   "),
            Utc::now(),
        );
        assert_eq!(entry.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(entry.user_agent, None);

        let entry = NewActivityEntry::new(
            None,
            ActivityKind::LoginFailed,
            "bad",
            Some("not-an-ip"),
            Some("curl/8.0"),
            Utc::now(),
        );
        assert_eq!(entry.ip_address, None);
        assert_eq!(entry.user_agent.as_deref(), Some("curl/8.0"));
    }
}
