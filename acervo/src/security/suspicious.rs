//! Suspicious-activity heuristics over a user's recent activity log.

use super::{
    errors::SecurityResult,
    models::{ActivityEntry, ActivityKind, NewActivityEntry},
};
use crate::{auth::UserId, clock::SharedClock, db::ActivityLogRepository};
use chrono::Duration;
use std::{collections::HashSet, fmt, sync::Arc};

/// More distinct source IPs than this in the window is suspicious
pub const MAX_DISTINCT_IPS: usize = 3;

/// More failed logins than this in the window is suspicious
pub const MAX_FAILED_LOGINS: usize = 10;

/// More distinct user agents than this in the window is suspicious
pub const MAX_DISTINCT_USER_AGENTS: usize = 5;

/// Heuristic that fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspicionTrigger {
    /// Too many distinct source IPs
    MultipleIps { count: usize },

    /// Too many failed logins
    ExcessiveLoginAttempts { count: usize },

    /// Too many distinct user agents
    MultipleUserAgents { count: usize },
}

impl SuspicionTrigger {
    /// Event code written into the activity log
    pub fn code(&self) -> &'static str {
        match self {
            SuspicionTrigger::MultipleIps { .. } => "MULTIPLE_IPS",
            SuspicionTrigger::ExcessiveLoginAttempts { .. } => "EXCESSIVE_LOGIN_ATTEMPTS",
            SuspicionTrigger::MultipleUserAgents { .. } => "MULTIPLE_USER_AGENTS",
        }
    }
}

impl fmt::Display for SuspicionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspicionTrigger::MultipleIps { count } => {
                write!(f, "[{}] {} distinct IPs in 24h", self.code(), count)
            }
            SuspicionTrigger::ExcessiveLoginAttempts { count } => {
                write!(f, "[{}] {} failed logins in 24h", self.code(), count)
            }
            SuspicionTrigger::MultipleUserAgents { count } => {
                write!(f, "[{}] {} distinct user agents in 24h", self.code(), count)
            }
        }
    }
}

/// Apply the thresholds to a window of entries
pub fn evaluate(entries: &[ActivityEntry]) -> Vec<SuspicionTrigger> {
    let mut triggers = Vec::new();

    let distinct_ips = entries
        .iter()
        .filter_map(|e| e.ip_address.as_deref())
        .collect::<HashSet<_>>()
        .len();
    if distinct_ips > MAX_DISTINCT_IPS {
        triggers.push(SuspicionTrigger::MultipleIps {
            count: distinct_ips,
        });
    }

    let failed_logins = entries
        .iter()
        .filter(|e| e.kind == ActivityKind::LoginFailed)
        .count();
    if failed_logins > MAX_FAILED_LOGINS {
        triggers.push(SuspicionTrigger::ExcessiveLoginAttempts {
            count: failed_logins,
        });
    }

    let distinct_agents = entries
        .iter()
        .filter_map(|e| e.user_agent.as_deref())
        .collect::<HashSet<_>>()
        .len();
    if distinct_agents > MAX_DISTINCT_USER_AGENTS {
        triggers.push(SuspicionTrigger::MultipleUserAgents {
            count: distinct_agents,
        });
    }

    triggers
}

/// Scans the last 24 hours of a user's activity
pub struct SuspiciousActivityDetector {
    activity: Arc<dyn ActivityLogRepository>,
    clock: SharedClock,
    window: Duration,
}

impl SuspiciousActivityDetector {
    pub fn new(activity: Arc<dyn ActivityLogRepository>, clock: SharedClock) -> Self {
        Self {
            activity,
            clock,
            window: Duration::hours(24),
        }
    }

    /// Evaluate the window and append one `SuspiciousActivity` entry per trigger
    pub async fn scan(&self, user_id: UserId) -> SecurityResult<Vec<SuspicionTrigger>> {
        let now = self.clock.now();
        let entries = self
            .activity
            .list_for_user_since(user_id, now - self.window)
            .await?;

        let triggers = evaluate(&entries);

        for trigger in &triggers {
            self.activity
                .append(NewActivityEntry::new(
                    Some(user_id),
                    ActivityKind::SuspiciousActivity,
                    trigger.to_string(),
                    None,
                    None,
                    now,
                ))
                .await?;

            log::warn!("Suspicious activity for user {}: {}", user_id, trigger);
        }

        Ok(triggers)
    }

    /// Whether any heuristic fired; errors are logged and read as `false`
    pub async fn detect(&self, user_id: UserId) -> bool {
        match self.scan(user_id).await {
            Ok(triggers) => !triggers.is_empty(),
            Err(e) => {
                log::error!("Suspicious activity scan failed for user {}: {}", user_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(kind: ActivityKind, ip: Option<&str>, ua: Option<&str>) -> ActivityEntry {
        ActivityEntry {
            id: 0,
            user_id: Some(1),
            kind,
            description: String::new(),
            ip_address: ip.map(str::to_string),
            user_agent: ua.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_thresholds_are_strict() {
        let three_ips: Vec<_> = (1..=3)
            .map(|i| entry(ActivityKind::Login, Some(&format!("10.0.0.{i}")), None))
            .collect();
        assert!(evaluate(&three_ips).is_empty());

        let four_ips: Vec<_> = (1..=4)
            .map(|i| entry(ActivityKind::Login, Some(&format!("10.0.0.{i}")), None))
            .collect();
        assert_eq!(evaluate(&four_ips), vec![SuspicionTrigger::MultipleIps { count: 4 }]);
    }

    #[test]
    fn test_failed_login_threshold() {
        let ten: Vec<_> = (0..10).map(|_| entry(ActivityKind::LoginFailed, None, None)).collect();
        assert!(evaluate(&ten).is_empty());

        let eleven: Vec<_> = (0..11).map(|_| entry(ActivityKind::LoginFailed, None, None)).collect();
        assert_eq!(
            evaluate(&eleven),
            vec![SuspicionTrigger::ExcessiveLoginAttempts { count: 11 }]
        );
    }

    #[test]
    fn test_user_agent_threshold_and_codes() {
        let agents: Vec<_> = (0..6)
            .map(|i| entry(ActivityKind::Login, None, Some(&format!("agent/{i}"))))
            .collect();
        let triggers = evaluate(&agents);
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].code(), "MULTIPLE_USER_AGENTS");
        assert!(triggers[0].to_string().starts_with("[MULTIPLE_USER_AGENTS] 6"));
    }
}
