//! Periodic removal of expired sessions, reset tokens, rate-limit keys and
//! IP blocks.

use crate::api::AppState;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Run one cleanup pass over every store of expiring state
pub async fn run_once(state: &AppState) {
    match state.auth_manager.cleanup_expired().await {
        Ok(report) => tracing::debug!(
            sessions = report.sessions,
            reset_tokens = report.reset_tokens,
            "Expired credentials removed"
        ),
        Err(e) => tracing::error!("Credential cleanup failed: {}", e),
    }

    let keys = state
        .rate_limiter
        .cleanup(state.rate_limits.longest_window());
    let blocks = state.ip_blocklist.cleanup().await;

    tracing::debug!(
        rate_limit_keys = keys,
        ip_blocks = blocks,
        "In-memory security state pruned"
    );
}

/// Spawn a task that runs [`run_once`] every `every`
pub fn spawn(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            run_once(&state).await;
        }
    })
}
