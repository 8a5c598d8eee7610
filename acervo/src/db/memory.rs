//! In-process implementation of every repository trait.
//!
//! Used by the test suites and by the server's `--memory` mode. Each table is a
//! map behind a `tokio::sync::RwLock`; IDs come from per-table counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};
use tokio::sync::RwLock;

use super::{
    errors::{StoreError, StoreResult},
    repository::{ActivityLogRepository, ResetTokenRepository, SessionRepository, UserRepository},
};
use crate::auth::{
    NewResetToken, NewSession, NewUser, ResetToken, Session, SessionRotation, User, UserId,
    UserStatus,
};
use crate::security::{ActivityEntry, NewActivityEntry};

#[derive(Debug, Default)]
struct Sequence(AtomicI64);

impl Sequence {
    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// In-memory store backing all four repositories
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<UserId, User>>,
    sessions: RwLock<HashMap<i64, Session>>,
    reset_tokens: RwLock<HashMap<i64, ResetToken>>,
    activity: RwLock<Vec<ActivityEntry>>,
    user_ids: Sequence,
    session_ids: Sequence,
    reset_token_ids: Sequence,
    activity_ids: Sequence,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in an `Arc` so the same store can back every repository handle
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Every activity entry, oldest first
    pub async fn activity_entries(&self) -> Vec<ActivityEntry> {
        self.activity.read().await.clone()
    }

    /// Every session of a user, including revoked ones
    pub async fn sessions_for_user(&self, user_id: UserId) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// Every reset token of a user
    pub async fn reset_tokens_for_user(&self, user_id: UserId) -> Vec<ResetToken> {
        let mut tokens: Vec<ResetToken> = self
            .reset_tokens
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.id);
        tokens
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut users = self.users.write().await;

        if users
            .values()
            .any(|u| u.deleted_at.is_none() && u.email == user.email)
        {
            return Err(StoreError::Duplicate("email"));
        }

        let created = User {
            id: self.user_ids.next(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            status: user.status,
            failed_login_attempts: 0,
            locked_until: None,
            last_login: None,
            created_at: user.created_at,
            updated_at: None,
            deleted_at: None,
        };
        users.insert(created.id, created.clone());

        Ok(created)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.deleted_at.is_none() && u.email == email)
            .cloned())
    }

    async fn find_by_id(&self, user_id: UserId) -> StoreResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .get(&user_id)
            .filter(|u| u.deleted_at.is_none())
            .cloned())
    }

    async fn record_failed_login(
        &self,
        user_id: UserId,
        max_attempts: i32,
        lockout_until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&user_id).filter(|u| u.deleted_at.is_none()) else {
            return Ok(None);
        };

        user.failed_login_attempts += 1;
        if user.failed_login_attempts >= max_attempts {
            user.locked_until = Some(lockout_until);
        }
        user.updated_at = Some(at);

        Ok(Some(user.clone()))
    }

    async fn record_successful_login(
        &self,
        user_id: UserId,
        verified_hash: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(&user_id) {
            Some(user) if user.deleted_at.is_none() && user.password_hash == verified_hash => {
                user.failed_login_attempts = 0;
                user.locked_until = None;
                user.last_login = Some(at);
                user.updated_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_password(
        &self,
        user_id: UserId,
        password_hash: &str,
        expected_hash: Option<&str>,
        clear_lockout: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&user_id).filter(|u| u.deleted_at.is_none()) else {
            return Ok(false);
        };
        if expected_hash.is_some_and(|expected| user.password_hash != expected) {
            return Ok(false);
        }

        user.password_hash = password_hash.to_string();
        if clear_lockout {
            user.failed_login_attempts = 0;
            user.locked_until = None;
        }
        user.updated_at = Some(at);

        Ok(true)
    }

    async fn set_status(
        &self,
        user_id: UserId,
        status: UserStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(&user_id).filter(|u| u.deleted_at.is_none()) {
            Some(user) => {
                user.status = status;
                user.updated_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn soft_delete(&self, user_id: UserId, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(user) = self.users.write().await.get_mut(&user_id) {
            user.deleted_at.get_or_insert(at);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create_session(&self, session: NewSession) -> StoreResult<Session> {
        let mut sessions = self.sessions.write().await;

        if sessions.values().any(|s| {
            s.access_token == session.access_token || s.refresh_token == session.refresh_token
        }) {
            return Err(StoreError::Duplicate("session token"));
        }

        let created = Session {
            id: self.session_ids.next(),
            user_id: session.user_id,
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            expires_at: session.expires_at,
            refresh_expires_at: session.refresh_expires_at,
            revoked: false,
            revoked_at: None,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            created_at: session.created_at,
            updated_at: None,
        };
        sessions.insert(created.id, created.clone());

        Ok(created)
    }

    async fn find_by_access_token(&self, token: &str) -> StoreResult<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.access_token == token)
            .cloned())
    }

    async fn find_by_refresh_token(&self, token: &str) -> StoreResult<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.refresh_token == token)
            .cloned())
    }

    async fn rotate_session(
        &self,
        session_id: i64,
        presented_refresh_token: &str,
        rotation: SessionRotation,
    ) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().await;

        match sessions.get(&session_id) {
            Some(s) if !s.revoked && s.refresh_token == presented_refresh_token => {}
            _ => return Ok(false),
        }

        if sessions.values().any(|s| {
            s.id != session_id
                && (s.access_token == rotation.access_token
                    || s.refresh_token == rotation.refresh_token)
        }) {
            return Err(StoreError::Duplicate("session token"));
        }

        let Some(stored) = sessions.get_mut(&session_id) else {
            return Ok(false);
        };
        stored.access_token = rotation.access_token;
        stored.refresh_token = rotation.refresh_token;
        stored.expires_at = rotation.expires_at;
        stored.refresh_expires_at = rotation.refresh_expires_at;
        stored.updated_at = Some(rotation.rotated_at);

        Ok(true)
    }

    async fn revoke_session(&self, session_id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        match self.sessions.write().await.get_mut(&session_id) {
            Some(session) if !session.revoked => {
                session.revoked = true;
                session.revoked_at = Some(at);
                session.updated_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: UserId, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut revoked = 0;
        for session in self.sessions.write().await.values_mut() {
            if session.user_id == user_id && !session.revoked {
                session.revoked = true;
                session.revoked_at = Some(at);
                session.updated_at = Some(at);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut sessions = self.sessions.write().await;
        let len = sessions.len();
        sessions.retain(|_, s| s.refresh_expires_at >= before);
        Ok((len - sessions.len()) as u64)
    }
}

#[async_trait]
impl ResetTokenRepository for MemoryStore {
    async fn create_token(&self, token: NewResetToken) -> StoreResult<ResetToken> {
        let mut tokens = self.reset_tokens.write().await;

        if tokens.values().any(|t| t.token == token.token) {
            return Err(StoreError::Duplicate("reset token"));
        }

        let created = ResetToken {
            id: self.reset_token_ids.next(),
            user_id: token.user_id,
            token: token.token,
            expires_at: token.expires_at,
            used: false,
            used_at: None,
            created_at: token.created_at,
        };
        tokens.insert(created.id, created.clone());

        Ok(created)
    }

    async fn find_by_token(&self, token: &str) -> StoreResult<Option<ResetToken>> {
        Ok(self
            .reset_tokens
            .read()
            .await
            .values()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn mark_used(&self, token_id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        match self.reset_tokens.write().await.get_mut(&token_id) {
            Some(token) if !token.used => {
                token.used = true;
                token.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn invalidate_all_for_user(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut invalidated = 0;
        for token in self.reset_tokens.write().await.values_mut() {
            if token.user_id == user_id && !token.used {
                token.used = true;
                token.used_at = Some(at);
                invalidated += 1;
            }
        }
        Ok(invalidated)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut tokens = self.reset_tokens.write().await;
        let len = tokens.len();
        tokens.retain(|_, t| t.expires_at >= before);
        Ok((len - tokens.len()) as u64)
    }
}

#[async_trait]
impl ActivityLogRepository for MemoryStore {
    async fn append(&self, entry: NewActivityEntry) -> StoreResult<ActivityEntry> {
        let created = ActivityEntry {
            id: self.activity_ids.next(),
            user_id: entry.user_id,
            kind: entry.kind,
            description: entry.description,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            created_at: entry.created_at,
        };
        self.activity.write().await.push(created.clone());
        Ok(created)
    }

    async fn list_for_user_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ActivityEntry>> {
        Ok(self
            .activity
            .read()
            .await
            .iter()
            .filter(|e| e.user_id == Some(user_id) && e.created_at >= since)
            .cloned()
            .collect())
    }
}
