//! In-memory sliding-window rate limiting.
//!
//! Each `identifier:action` key owns the timestamps of its recent attempts.
//! State is per-instance and not persisted, so a restart forgets attempts but
//! never invents them.

use super::errors::{SecurityError, SecurityResult};
use crate::clock::SharedClock;
use chrono::{DateTime, Duration, Utc};
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

/// Rate limit configuration for an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Action name, second half of the limiter key
    pub action: &'static str,

    /// Maximum attempts allowed in window
    pub max_attempts: u32,

    /// Trailing window in minutes
    pub window_mins: i64,
}

impl RateLimitConfig {
    /// Configuration for login attempts
    pub fn login() -> Self {
        Self {
            action: "login",
            max_attempts: 5,
            window_mins: 15,
        }
    }

    /// Configuration for forgot-password requests
    pub fn forgot_password() -> Self {
        Self {
            action: "forgot_password",
            max_attempts: 3,
            window_mins: 60,
        }
    }

    /// Configuration for reset-password submissions
    pub fn reset_password() -> Self {
        Self {
            action: "reset_password",
            max_attempts: 5,
            window_mins: 15,
        }
    }

    /// Reject limits that would block everything or nothing
    pub fn validate(&self) -> SecurityResult<()> {
        if self.max_attempts == 0 {
            return Err(SecurityError::Configuration(format!(
                "{}: max_attempts must be greater than 0",
                self.action
            )));
        }
        if self.window_mins <= 0 {
            return Err(SecurityError::Configuration(format!(
                "{}: window must be at least one minute",
                self.action
            )));
        }
        Ok(())
    }

    /// Window as a duration
    pub fn window(&self) -> Duration {
        Duration::minutes(self.window_mins)
    }
}

/// Rate limit check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Attempt recorded
    Allowed { remaining: u32 },

    /// Limit reached, nothing recorded
    Exceeded { retry_after_secs: i64 },
}

impl RateLimitResult {
    /// Check if action is allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    /// Seconds until the oldest attempt leaves the window (if exceeded)
    pub fn retry_after(&self) -> Option<i64> {
        match self {
            RateLimitResult::Exceeded { retry_after_secs } => Some(*retry_after_secs),
            RateLimitResult::Allowed { .. } => None,
        }
    }
}

/// Sliding-window rate limiter keyed by `identifier:action`
pub struct RateLimiter {
    attempts: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    clock: SharedClock,
}

impl RateLimiter {
    /// Create an empty limiter reading time from `clock`
    pub fn new(clock: SharedClock) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Prune, check and record in one step.
    ///
    /// Returns `true` when the limit is exceeded. Internal failures are logged
    /// and treated as not exceeded.
    ///
    /// # Example
    ///
    /// ```
    /// use acervo::{clock::SystemClock, security::RateLimiter};
    /// use chrono::Duration;
    /// use std::sync::Arc;
    ///
    /// let limiter = RateLimiter::new(Arc::new(SystemClock));
    /// for _ in 0..5 {
    ///     assert!(!limiter.check_and_record("10.0.0.1", "login", 5, Duration::minutes(15)));
    /// }
    /// assert!(limiter.check_and_record("10.0.0.1", "login", 5, Duration::minutes(15)));
    /// ```
    pub fn check_and_record(
        &self,
        identifier: &str,
        action: &str,
        max_attempts: u32,
        window: Duration,
    ) -> bool {
        match self.try_check_and_record(identifier, action, max_attempts, window) {
            Ok(result) => !result.is_allowed(),
            Err(e) => {
                log::error!(
                    "Rate limiter failure for {}:{}, allowing request: {}",
                    identifier,
                    action,
                    e
                );
                false
            }
        }
    }

    /// [`Self::check_and_record`] using a named configuration
    pub fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitResult {
        self.try_check_and_record(identifier, config.action, config.max_attempts, config.window())
            .unwrap_or_else(|e| {
                log::error!(
                    "Rate limiter failure for {}:{}, allowing request: {}",
                    identifier,
                    config.action,
                    e
                );
                RateLimitResult::Allowed { remaining: 0 }
            })
    }

    /// Fallible core of [`Self::check_and_record`]
    pub fn try_check_and_record(
        &self,
        identifier: &str,
        action: &str,
        max_attempts: u32,
        window: Duration,
    ) -> SecurityResult<RateLimitResult> {
        let now = self.clock.now();
        let window_start = now - window;
        let key = format!("{identifier}:{action}");

        let mut attempts = self
            .attempts
            .lock()
            .map_err(|_| SecurityError::Unavailable("rate limiter"))?;
        let timestamps = attempts.entry(key).or_default();

        while timestamps.front().is_some_and(|t| *t < window_start) {
            timestamps.pop_front();
        }

        let count = timestamps.len() as u32;
        if count >= max_attempts {
            let retry_after_secs = timestamps
                .front()
                .map(|oldest| (*oldest + window - now).num_seconds().max(0))
                .unwrap_or(0);
            return Ok(RateLimitResult::Exceeded { retry_after_secs });
        }

        timestamps.push_back(now);
        Ok(RateLimitResult::Allowed {
            remaining: max_attempts - count - 1,
        })
    }

    /// Forget every attempt recorded for a key
    pub fn reset(&self, identifier: &str, action: &str) {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.remove(&format!("{identifier}:{action}"));
        }
    }

    /// Drop timestamps older than `max_age` and keys left empty.
    ///
    /// Returns the number of keys removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = self.clock.now() - max_age;
        let Ok(mut attempts) = self.attempts.lock() else {
            log::error!("Rate limiter cleanup skipped: state lock poisoned");
            return 0;
        };

        let before = attempts.len();
        attempts.retain(|_, timestamps| {
            timestamps.retain(|t| *t >= cutoff);
            !timestamps.is_empty()
        });
        before - attempts.len()
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.attempts.lock().map(|a| a.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tracked_keys", &self.tracked_keys())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn limiter() -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::starting_now());
        let limiter = RateLimiter::new(clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_remaining_counts_down() {
        let (_, limiter) = limiter();
        for expected in (0..5).rev() {
            let result = limiter
                .try_check_and_record("u", "login", 5, Duration::minutes(15))
                .unwrap();
            assert_eq!(result, RateLimitResult::Allowed { remaining: expected });
        }
    }

    #[test]
    fn test_exceeded_attempts_are_not_recorded() {
        let (clock, limiter) = limiter();
        for _ in 0..5 {
            assert!(!limiter.check_and_record("u", "login", 5, Duration::minutes(15)));
        }
        clock.advance(Duration::minutes(10));
        for _ in 0..3 {
            assert!(limiter.check_and_record("u", "login", 5, Duration::minutes(15)));
        }

        // Only the original five age out; rejected calls left no trace.
        clock.advance(Duration::minutes(6));
        assert!(!limiter.check_and_record("u", "login", 5, Duration::minutes(15)));
    }

    #[test]
    fn test_retry_after_tracks_oldest_attempt() {
        let (clock, limiter) = limiter();
        limiter.check_and_record("u", "forgot", 1, Duration::minutes(60));
        clock.advance(Duration::minutes(20));

        let result = limiter
            .try_check_and_record("u", "forgot", 1, Duration::minutes(60))
            .unwrap();
        assert_eq!(result.retry_after(), Some(40 * 60));
    }

    #[test]
    fn test_keys_are_independent() {
        let (_, limiter) = limiter();
        for _ in 0..5 {
            limiter.check_and_record("a", "login", 5, Duration::minutes(15));
        }
        assert!(limiter.check_and_record("a", "login", 5, Duration::minutes(15)));
        assert!(!limiter.check_and_record("b", "login", 5, Duration::minutes(15)));
        assert!(!limiter.check_and_record("a", "forgot", 5, Duration::minutes(15)));
    }

    #[test]
    fn test_reset_clears_key() {
        let (_, limiter) = limiter();
        limiter.check_and_record("u", "login", 1, Duration::minutes(15));
        assert!(limiter.check_and_record("u", "login", 1, Duration::minutes(15)));

        limiter.reset("u", "login");
        assert!(!limiter.check_and_record("u", "login", 1, Duration::minutes(15)));
    }

    #[test]
    fn test_cleanup_drops_stale_keys() {
        let (clock, limiter) = limiter();
        limiter.check_and_record("old", "login", 5, Duration::minutes(15));
        clock.advance(Duration::minutes(90));
        limiter.check_and_record("new", "login", 5, Duration::minutes(15));

        assert_eq!(limiter.cleanup(Duration::hours(1)), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_config_presets_validate() {
        for config in [
            RateLimitConfig::login(),
            RateLimitConfig::forgot_password(),
            RateLimitConfig::reset_password(),
        ] {
            assert!(config.validate().is_ok(), "{config:?}");
        }

        assert_eq!(
            (RateLimitConfig::login().max_attempts, RateLimitConfig::login().window_mins),
            (5, 15)
        );
        assert_eq!(RateLimitConfig::forgot_password().max_attempts, 3);
        assert_eq!(RateLimitConfig::forgot_password().window_mins, 60);

        let broken = RateLimitConfig {
            action: "login",
            max_attempts: 0,
            window_mins: 15,
        };
        assert!(matches!(
            broken.validate(),
            Err(SecurityError::Configuration(_))
        ));
    }
}
