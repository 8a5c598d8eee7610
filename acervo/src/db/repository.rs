//! Repository trait definitions for testability and dependency injection.
//!
//! The authentication core only talks to these traits. [`PgUserRepository`] and
//! friends are the PostgreSQL implementations; [`super::MemoryStore`] implements
//! every trait in process for tests and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::errors::{StoreError, StoreResult};
use crate::auth::{
    NewResetToken, NewSession, NewUser, ResetToken, Session, SessionRotation, User, UserId,
    UserRole, UserStatus,
};
use crate::security::{ActivityEntry, ActivityKind, NewActivityEntry};

/// Trait for user repository operations
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user; fails with [`StoreError::Duplicate`] if the email is taken
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    /// Find a live (not soft-deleted) user by email
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Find a live user by ID
    async fn find_by_id(&self, user_id: UserId) -> StoreResult<Option<User>>;

    /// Count one failed login and lock the account once the count reaches
    /// `max_attempts`.
    ///
    /// The increment happens in the store, so concurrent failures are never
    /// lost. Returns the row as it stands after the update, or `None` if the
    /// user no longer exists.
    async fn record_failed_login(
        &self,
        user_id: UserId,
        max_attempts: i32,
        lockout_until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>>;

    /// Clear the failure counter and stamp `last_login`, but only while the
    /// stored hash is still `verified_hash`. `false` means the password
    /// changed after it was verified.
    async fn record_successful_login(
        &self,
        user_id: UserId,
        verified_hash: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Replace the password hash.
    ///
    /// With `expected_hash` set, the write only applies while the stored hash
    /// still matches it. `clear_lockout` also resets the failure counter and
    /// lock. Returns whether a row changed.
    async fn set_password(
        &self,
        user_id: UserId,
        password_hash: &str,
        expected_hash: Option<&str>,
        clear_lockout: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Change the account status; `false` if the user does not exist
    async fn set_status(
        &self,
        user_id: UserId,
        status: UserStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Soft-delete a user
    async fn soft_delete(&self, user_id: UserId, at: DateTime<Utc>) -> StoreResult<()>;
}

/// Trait for session repository operations
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Create a new session
    async fn create_session(&self, session: NewSession) -> StoreResult<Session>;

    /// Find session by access token
    async fn find_by_access_token(&self, token: &str) -> StoreResult<Option<Session>>;

    /// Find session by refresh token
    async fn find_by_refresh_token(&self, token: &str) -> StoreResult<Option<Session>>;

    /// Swap in a new token pair.
    ///
    /// Applies only if the session is not revoked and still holds
    /// `presented_refresh_token`; `false` otherwise. A lost race against
    /// another refresh or a revocation therefore never resurrects the session.
    async fn rotate_session(
        &self,
        session_id: i64,
        presented_refresh_token: &str,
        rotation: SessionRotation,
    ) -> StoreResult<bool>;

    /// Revoke one session; `false` if it was already revoked or is gone.
    /// Never clears the revoked flag.
    async fn revoke_session(&self, session_id: i64, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Revoke every non-revoked session of a user, returning how many changed
    async fn revoke_all_for_user(&self, user_id: UserId, at: DateTime<Utc>) -> StoreResult<u64>;

    /// Delete sessions whose refresh window closed before `before`
    async fn delete_expired(&self, before: DateTime<Utc>) -> StoreResult<u64>;
}

/// Trait for password reset token repository operations
#[async_trait]
pub trait ResetTokenRepository: Send + Sync {
    /// Store a new reset token
    async fn create_token(&self, token: NewResetToken) -> StoreResult<ResetToken>;

    /// Find a reset token by its value
    async fn find_by_token(&self, token: &str) -> StoreResult<Option<ResetToken>>;

    /// Mark a token as used; `false` if it already was
    async fn mark_used(&self, token_id: i64, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Mark every unused token of a user as used, returning how many changed
    async fn invalidate_all_for_user(&self, user_id: UserId, at: DateTime<Utc>)
    -> StoreResult<u64>;

    /// Delete tokens that expired before `before`
    async fn delete_expired(&self, before: DateTime<Utc>) -> StoreResult<u64>;
}

/// Trait for the append-only activity log
#[async_trait]
pub trait ActivityLogRepository: Send + Sync {
    /// Append an entry
    async fn append(&self, entry: NewActivityEntry) -> StoreResult<ActivityEntry>;

    /// Entries of a user created at or after `since`, oldest first
    async fn list_for_user_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ActivityEntry>>;
}

fn map_unique_violation(err: sqlx::Error, field: &'static str) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::Duplicate(field)
        }
        _ => StoreError::Database(err),
    }
}

const USER_COLUMNS: &str = "id, name, email, password_hash, role, status, failed_login_attempts, \
     locked_until, last_login, created_at, updated_at, deleted_at";

fn user_from_row(r: &PgRow) -> StoreResult<User> {
    let role: String = r.try_get("role")?;
    let status: String = r.try_get("status")?;

    Ok(User {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        email: r.try_get("email")?,
        password_hash: r.try_get("password_hash")?,
        role: UserRole::parse(&role).ok_or(StoreError::Corrupt {
            column: "users.role",
            value: role,
        })?,
        status: UserStatus::parse(&status).ok_or(StoreError::Corrupt {
            column: "users.status",
            value: status,
        })?,
        failed_login_attempts: r.try_get("failed_login_attempts")?,
        locked_until: r.try_get("locked_until")?,
        last_login: r.try_get("last_login")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
        deleted_at: r.try_get("deleted_at")?,
    })
}

/// PostgreSQL implementation of `UserRepository`
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (name, email, password_hash, role, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "email"))?;

        user_from_row(&row)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_id(&self, user_id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn record_failed_login(
        &self,
        user_id: UserId,
        max_attempts: i32,
        lockout_until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!(
            "UPDATE users
             SET failed_login_attempts = failed_login_attempts + 1,
                 locked_until = CASE
                     WHEN failed_login_attempts + 1 >= $2 THEN $3
                     ELSE locked_until
                 END,
                 updated_at = $4
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(max_attempts)
        .bind(lockout_until)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn record_successful_login(
        &self,
        user_id: UserId,
        verified_hash: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE users
             SET failed_login_attempts = 0, locked_until = NULL, last_login = $3, updated_at = $3
             WHERE id = $1 AND password_hash = $2 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(verified_hash)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_password(
        &self,
        user_id: UserId,
        password_hash: &str,
        expected_hash: Option<&str>,
        clear_lockout: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE users
             SET password_hash = $2,
                 failed_login_attempts = CASE WHEN $4 THEN 0 ELSE failed_login_attempts END,
                 locked_until = CASE WHEN $4 THEN NULL ELSE locked_until END,
                 updated_at = $5
             WHERE id = $1 AND deleted_at IS NULL
               AND ($3::text IS NULL OR password_hash = $3)",
        )
        .bind(user_id)
        .bind(password_hash)
        .bind(expected_hash)
        .bind(clear_lockout)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_status(
        &self,
        user_id: UserId,
        status: UserStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET status = $2, updated_at = $3 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(status.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn soft_delete(&self, user_id: UserId, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE users SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL")
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

const SESSION_COLUMNS: &str = "id, user_id, access_token, refresh_token, expires_at, \
     refresh_expires_at, revoked, revoked_at, ip_address, user_agent, created_at, updated_at";

fn session_from_row(r: &PgRow) -> StoreResult<Session> {
    Ok(Session {
        id: r.try_get("id")?,
        user_id: r.try_get("user_id")?,
        access_token: r.try_get("access_token")?,
        refresh_token: r.try_get("refresh_token")?,
        expires_at: r.try_get("expires_at")?,
        refresh_expires_at: r.try_get("refresh_expires_at")?,
        revoked: r.try_get("revoked")?,
        revoked_at: r.try_get("revoked_at")?,
        ip_address: r.try_get("ip_address")?,
        user_agent: r.try_get("user_agent")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

/// PostgreSQL implementation of `SessionRepository`
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn create_session(&self, session: NewSession) -> StoreResult<Session> {
        let row = sqlx::query(&format!(
            "INSERT INTO sessions
                (user_id, access_token, refresh_token, expires_at, refresh_expires_at,
                 ip_address, user_agent, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(session.user_id)
        .bind(&session.access_token)
        .bind(&session.refresh_token)
        .bind(session.expires_at)
        .bind(session.refresh_expires_at)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "session token"))?;

        session_from_row(&row)
    }

    async fn find_by_access_token(&self, token: &str) -> StoreResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE access_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn find_by_refresh_token(&self, token: &str) -> StoreResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn rotate_session(
        &self,
        session_id: i64,
        presented_refresh_token: &str,
        rotation: SessionRotation,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE sessions
             SET access_token = $3, refresh_token = $4, expires_at = $5,
                 refresh_expires_at = $6, updated_at = $7
             WHERE id = $1 AND refresh_token = $2 AND revoked = FALSE",
        )
        .bind(session_id)
        .bind(presented_refresh_token)
        .bind(&rotation.access_token)
        .bind(&rotation.refresh_token)
        .bind(rotation.expires_at)
        .bind(rotation.refresh_expires_at)
        .bind(rotation.rotated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "session token"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_session(&self, session_id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked = TRUE, revoked_at = $2, updated_at = $2
             WHERE id = $1 AND revoked = FALSE",
        )
        .bind(session_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_user(&self, user_id: UserId, at: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked = TRUE, revoked_at = $2, updated_at = $2
             WHERE user_id = $1 AND revoked = FALSE",
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE refresh_expires_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

const RESET_TOKEN_COLUMNS: &str = "id, user_id, token, expires_at, used, used_at, created_at";

fn reset_token_from_row(r: &PgRow) -> StoreResult<ResetToken> {
    Ok(ResetToken {
        id: r.try_get("id")?,
        user_id: r.try_get("user_id")?,
        token: r.try_get("token")?,
        expires_at: r.try_get("expires_at")?,
        used: r.try_get("used")?,
        used_at: r.try_get("used_at")?,
        created_at: r.try_get("created_at")?,
    })
}

/// PostgreSQL implementation of `ResetTokenRepository`
pub struct PgResetTokenRepository {
    pool: PgPool,
}

impl PgResetTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResetTokenRepository for PgResetTokenRepository {
    async fn create_token(&self, token: NewResetToken) -> StoreResult<ResetToken> {
        let row = sqlx::query(&format!(
            "INSERT INTO reset_tokens (user_id, token, expires_at, created_at)
             VALUES ($1, $2, $3, $4)
             RETURNING {RESET_TOKEN_COLUMNS}"
        ))
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.expires_at)
        .bind(token.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "reset token"))?;

        reset_token_from_row(&row)
    }

    async fn find_by_token(&self, token: &str) -> StoreResult<Option<ResetToken>> {
        let row = sqlx::query(&format!(
            "SELECT {RESET_TOKEN_COLUMNS} FROM reset_tokens WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(reset_token_from_row).transpose()
    }

    async fn mark_used(&self, token_id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE reset_tokens SET used = TRUE, used_at = $2 WHERE id = $1 AND used = FALSE",
        )
        .bind(token_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn invalidate_all_for_user(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE reset_tokens SET used = TRUE, used_at = $2 WHERE user_id = $1 AND used = FALSE",
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM reset_tokens WHERE expires_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn activity_from_row(r: &PgRow) -> StoreResult<ActivityEntry> {
    let kind: String = r.try_get("kind")?;

    Ok(ActivityEntry {
        id: r.try_get("id")?,
        user_id: r.try_get("user_id")?,
        kind: ActivityKind::parse(&kind).ok_or(StoreError::Corrupt {
            column: "activity_log.kind",
            value: kind,
        })?,
        description: r.try_get("description")?,
        ip_address: r.try_get("ip_address")?,
        user_agent: r.try_get("user_agent")?,
        created_at: r.try_get("created_at")?,
    })
}

/// PostgreSQL implementation of `ActivityLogRepository`
pub struct PgActivityLogRepository {
    pool: PgPool,
}

impl PgActivityLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityLogRepository for PgActivityLogRepository {
    async fn append(&self, entry: NewActivityEntry) -> StoreResult<ActivityEntry> {
        let row = sqlx::query(
            "INSERT INTO activity_log (user_id, kind, description, ip_address, user_agent, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, user_id, kind, description, ip_address, user_agent, created_at",
        )
        .bind(entry.user_id)
        .bind(entry.kind.as_str())
        .bind(&entry.description)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await?;

        activity_from_row(&row)
    }

    async fn list_for_user_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ActivityEntry>> {
        let rows = sqlx::query(
            "SELECT id, user_id, kind, description, ip_address, user_agent, created_at
             FROM activity_log
             WHERE user_id = $1 AND created_at >= $2
             ORDER BY created_at, id",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(activity_from_row).collect()
    }
}
