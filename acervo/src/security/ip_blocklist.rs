//! Temporary IP blocking.

use super::{
    errors::{SecurityError, SecurityResult},
    events::SecurityEventRecorder,
    validation::parse_ip,
};
use crate::clock::SharedClock;
use chrono::{DateTime, Duration, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

/// Map of normalized IP to blocked-until
pub struct IpBlocklist {
    blocked: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    events: Option<SecurityEventRecorder>,
    clock: SharedClock,
}

impl IpBlocklist {
    /// Blocklist that only logs
    pub fn new(clock: SharedClock) -> Self {
        Self {
            blocked: Arc::new(RwLock::new(HashMap::new())),
            events: None,
            clock,
        }
    }

    /// Also record an `IP_BLOCKED` security event for every block
    pub fn with_events(mut self, events: SecurityEventRecorder) -> Self {
        self.events = Some(events);
        self
    }

    /// Whether `ip` is blocked right now; drops the entry if its block elapsed
    pub async fn is_blocked(&self, ip: &str) -> bool {
        let Some(ip) = parse_ip(ip) else {
            return false;
        };
        let now = self.clock.now();

        {
            let blocked = self.blocked.read().await;
            match blocked.get(&ip) {
                None => return false,
                Some(until) if *until > now => return true,
                Some(_) => {}
            }
        }

        let mut blocked = self.blocked.write().await;
        if blocked.get(&ip).is_some_and(|until| *until <= now) {
            blocked.remove(&ip);
        }
        false
    }

    /// Block `ip` for `duration`, extending any shorter existing block
    pub async fn block(&self, ip: &str, duration: Duration, reason: &str) -> SecurityResult<()> {
        let normalized = parse_ip(ip).ok_or_else(|| SecurityError::InvalidIp(ip.to_string()))?;
        let until = self.clock.now() + duration;

        {
            let mut blocked = self.blocked.write().await;
            let entry = blocked.entry(normalized.clone()).or_insert(until);
            if *entry < until {
                *entry = until;
            }
        }

        log::warn!(
            "IP {} blocked for {} minutes: {}",
            normalized,
            duration.num_minutes(),
            reason
        );

        if let Some(events) = &self.events {
            events
                .record(
                    None,
                    "IP_BLOCKED",
                    &format!("IP {normalized} blocked for {} minutes: {reason}", duration.num_minutes()),
                    Some(&normalized),
                    None,
                )
                .await;
        }

        Ok(())
    }

    /// Lift a block early
    pub async fn unblock(&self, ip: &str) -> bool {
        match parse_ip(ip) {
            Some(ip) => self.blocked.write().await.remove(&ip).is_some(),
            None => false,
        }
    }

    /// Drop elapsed blocks, returning how many were removed
    pub async fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut blocked = self.blocked.write().await;
        let before = blocked.len();
        blocked.retain(|_, until| *until > now);
        before - blocked.len()
    }

    /// Number of entries, elapsed or not
    pub async fn len(&self) -> usize {
        self.blocked.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blocked.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn blocklist() -> (Arc<ManualClock>, IpBlocklist) {
        let clock = Arc::new(ManualClock::starting_now());
        (clock.clone(), IpBlocklist::new(clock))
    }

    #[tokio::test]
    async fn test_block_expires_lazily() {
        let (clock, list) = blocklist();
        list.block("10.0.0.1", Duration::minutes(30), "test").await.unwrap();

        assert!(list.is_blocked("10.0.0.1").await);
        clock.advance(Duration::minutes(31));
        assert!(!list.is_blocked("10.0.0.1").await);
        assert!(list.is_empty().await);
    }

    #[tokio::test]
    async fn test_mapped_ipv6_matches_ipv4() {
        let (_, list) = blocklist();
        list.block("::ffff:10.0.0.2", Duration::minutes(5), "test").await.unwrap();
        assert!(list.is_blocked("10.0.0.2").await);
    }

    #[tokio::test]
    async fn test_block_rejects_garbage() {
        let (_, list) = blocklist();
        assert!(matches!(
            list.block("nope", Duration::minutes(5), "test").await,
            Err(SecurityError::InvalidIp(_))
        ));
        assert!(!list.is_blocked("nope").await);
    }

    #[tokio::test]
    async fn test_shorter_block_does_not_shorten() {
        let (clock, list) = blocklist();
        list.block("10.0.0.3", Duration::minutes(60), "long").await.unwrap();
        list.block("10.0.0.3", Duration::minutes(5), "short").await.unwrap();

        clock.advance(Duration::minutes(10));
        assert!(list.is_blocked("10.0.0.3").await);
    }

    #[tokio::test]
    async fn test_cleanup_and_unblock() {
        let (clock, list) = blocklist();
        list.block("10.0.0.4", Duration::minutes(5), "a").await.unwrap();
        list.block("10.0.0.5", Duration::minutes(60), "b").await.unwrap();
        list.block("10.0.0.6", Duration::minutes(60), "c").await.unwrap();

        clock.advance(Duration::minutes(10));
        assert_eq!(list.cleanup().await, 1);
        assert!(list.unblock("10.0.0.5").await);
        assert!(!list.unblock("10.0.0.5").await);
        assert_eq!(list.len().await, 1);
    }
}
