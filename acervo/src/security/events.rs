//! Security event recording into the activity log.

use super::models::{ActivityKind, NewActivityEntry};
use crate::{auth::UserId, clock::SharedClock, db::ActivityLogRepository};
use std::sync::Arc;

/// Appends `SecurityAlert` entries; never fails the caller
#[derive(Clone)]
pub struct SecurityEventRecorder {
    activity: Arc<dyn ActivityLogRepository>,
    clock: SharedClock,
}

impl SecurityEventRecorder {
    pub fn new(activity: Arc<dyn ActivityLogRepository>, clock: SharedClock) -> Self {
        Self { activity, clock }
    }

    /// Record `description` under `event_type` as `"[EVENT_TYPE] description"`
    pub async fn record(
        &self,
        user_id: Option<UserId>,
        event_type: &str,
        description: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) {
        log::warn!(
            "Security event {} (user: {:?}, ip: {:?}): {}",
            event_type,
            user_id,
            ip_address,
            description
        );

        let entry = NewActivityEntry::new(
            user_id,
            ActivityKind::SecurityAlert,
            format!("[{event_type}] {description}"),
            ip_address,
            user_agent,
            self.clock.now(),
        );

        if let Err(e) = self.activity.append(entry).await {
            log::error!("Failed to record security event {}: {}", event_type, e);
        }
    }
}
