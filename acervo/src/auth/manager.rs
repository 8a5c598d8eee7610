//! Authentication manager implementation.

use super::{
    config::AuthConfig,
    errors::{AuthError, AuthResult},
    models::{
        LoginResponse, NewResetToken, NewSession, NewUser, RegisterRequest, Session,
        SessionRotation, TokenPair, User, UserId, UserRole, UserStatus, UserSummary,
    },
    password::{PasswordHasher, PasswordPolicy},
    tokens::TokenIssuer,
};
use crate::{
    clock::SharedClock,
    db::{
        ActivityLogRepository, ResetTokenRepository, SessionRepository, StoreError, Stores,
        UserRepository,
    },
    mailer::Mailer,
    security::{
        ActivityKind, DomainVerdict, NewActivityEntry, SecurityEventRecorder, is_valid_email,
        parse_ip,
    },
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Rows removed by [`AuthManager::cleanup_expired`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub sessions: u64,
    pub reset_tokens: u64,
}

/// Authentication manager
///
/// Every public operation either succeeds or fails with a business error from
/// [`AuthError`]. Internal faults are logged here and reach the caller as
/// [`AuthError::Internal`].
#[derive(Clone)]
pub struct AuthManager {
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionRepository>,
    reset_tokens: Arc<dyn ResetTokenRepository>,
    activity: Arc<dyn ActivityLogRepository>,
    mailer: Arc<dyn Mailer>,
    clock: SharedClock,
    hasher: PasswordHasher,
    tokens: TokenIssuer,
    events: SecurityEventRecorder,
    config: AuthConfig,
}

impl AuthManager {
    /// Create a new authentication manager
    pub fn new(
        stores: Stores,
        mailer: Arc<dyn Mailer>,
        clock: SharedClock,
        config: AuthConfig,
    ) -> Self {
        let tokens = TokenIssuer::new(
            &config.jwt_secret,
            config.issuer.clone(),
            config.audience.clone(),
            config.access_token_ttl,
        );

        Self {
            events: SecurityEventRecorder::new(stores.activity.clone(), clock.clone()),
            users: stores.users,
            sessions: stores.sessions,
            reset_tokens: stores.reset_tokens,
            activity: stores.activity,
            mailer,
            clock,
            hasher: PasswordHasher::new(config.pepper.clone()),
            tokens,
            config,
        }
    }

    /// Register a new user
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidInput` - Empty name, malformed email or refused domain
    /// * `AuthError::WeakPassword` - Password fails the policy
    /// * `AuthError::EmailTaken` - Email already registered
    pub async fn register(&self, request: RegisterRequest) -> AuthResult<UserSummary> {
        let context = format!("email={}", request.email);
        let result = self.register_inner(request).await;
        self.boundary("register", &context, result)
    }

    async fn register_inner(&self, request: RegisterRequest) -> AuthResult<UserSummary> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(AuthError::InvalidInput("Name is required".to_string()));
        }

        let email = normalize_email(&request.email);
        match self.config.email_policy.evaluate(&email) {
            DomainVerdict::Allowed => {}
            DomainVerdict::Malformed => {
                return Err(AuthError::InvalidInput("Invalid email".to_string()));
            }
            DomainVerdict::Disposable(domain) => {
                self.events
                    .record(
                        None,
                        "DISPOSABLE_EMAIL",
                        &format!("Registration refused for disposable domain {domain}"),
                        None,
                        None,
                    )
                    .await;
                return Err(AuthError::InvalidInput(
                    "Disposable email addresses are not allowed".to_string(),
                ));
            }
            DomainVerdict::NotAllowed(domain) => {
                log::info!("Registration refused for domain {}", domain);
                return Err(AuthError::InvalidInput(
                    "Email domain is not allowed".to_string(),
                ));
            }
        }

        PasswordPolicy::enforce(&request.password)?;

        let password_hash = self.hasher.hash(&request.password)?;

        let user = self
            .users
            .create_user(NewUser {
                name: name.to_string(),
                email,
                password_hash,
                role: request.role.unwrap_or(UserRole::User),
                status: UserStatus::Active,
                created_at: self.clock.now(),
            })
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(_) => AuthError::EmailTaken,
                other => AuthError::Store(other),
            })?;

        log::info!("Registered user {} ({})", user.id, user.email);

        Ok(UserSummary::from(&user))
    }

    /// Login a user
    ///
    /// Unknown emails and wrong passwords both yield
    /// [`AuthError::InvalidCredentials`].
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidInput` - Malformed email or empty password
    /// * `AuthError::InvalidCredentials` - Unknown email or wrong password
    /// * `AuthError::AccountInactive` - Account is not active
    /// * `AuthError::AccountLocked` - Lockout still in force
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> AuthResult<LoginResponse> {
        let result = self.login_inner(email, password, ip_address, user_agent).await;
        self.boundary("login", &format!("email={email}"), result)
    }

    async fn login_inner(
        &self,
        email: &str,
        password: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> AuthResult<LoginResponse> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidInput("Invalid email".to_string()));
        }
        if password.is_empty() {
            return Err(AuthError::InvalidInput("Password is required".to_string()));
        }

        let Some(user) = self.users.find_by_email(&email).await? else {
            self.record(
                None,
                ActivityKind::LoginFailed,
                format!("Login attempt for unknown email {email}"),
                ip_address,
                user_agent,
            )
            .await;
            return Err(AuthError::InvalidCredentials);
        };

        if user.status != UserStatus::Active {
            self.record(
                Some(user.id),
                ActivityKind::LoginFailed,
                "Login attempt on inactive account",
                ip_address,
                user_agent,
            )
            .await;
            return Err(AuthError::AccountInactive);
        }

        let now = self.clock.now();

        if user.is_locked(now) {
            self.record(
                Some(user.id),
                ActivityKind::LoginFailed,
                "Login attempt on locked account",
                ip_address,
                user_agent,
            )
            .await;
            return Err(AuthError::AccountLocked);
        }

        if !self.hasher.verify(password, &user.password_hash)? {
            self.register_failed_login(user.id, now, ip_address, user_agent)
                .await?;
            return Err(AuthError::InvalidCredentials);
        }

        let session = self
            .open_session(&user, now, ip_address, user_agent)
            .await?;

        // Runs after the session exists: a reset that lands later still
        // revokes it, one that landed earlier is caught here.
        if !self
            .users
            .record_successful_login(user.id, &user.password_hash, now)
            .await?
        {
            self.sessions.revoke_session(session.id, now).await?;
            self.record(
                Some(user.id),
                ActivityKind::LoginFailed,
                "Password changed during login",
                ip_address,
                user_agent,
            )
            .await;
            return Err(AuthError::InvalidCredentials);
        }

        self.record(
            Some(user.id),
            ActivityKind::Login,
            "Login successful",
            ip_address,
            user_agent,
        )
        .await;

        Ok(LoginResponse {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            expires_at: session.expires_at,
            user: UserSummary::from(&user),
        })
    }

    async fn register_failed_login(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> AuthResult<()> {
        let lockout_until = now + self.config.lockout_duration;
        let Some(user) = self
            .users
            .record_failed_login(user_id, self.config.max_failed_logins, lockout_until, now)
            .await?
        else {
            return Ok(());
        };

        let locked = user.failed_login_attempts >= self.config.max_failed_logins
            && user.locked_until == Some(lockout_until);

        self.record(
            Some(user.id),
            ActivityKind::LoginFailed,
            "Wrong password",
            ip_address,
            user_agent,
        )
        .await;

        if locked {
            self.events
                .record(
                    Some(user.id),
                    "ACCOUNT_LOCKED",
                    &format!(
                        "Account locked for {} minutes after {} failed logins",
                        self.config.lockout_duration.num_minutes(),
                        user.failed_login_attempts
                    ),
                    ip_address,
                    user_agent,
                )
                .await;
        }

        Ok(())
    }

    /// Create a session with a fresh token pair
    async fn open_session(
        &self,
        user: &User,
        now: DateTime<Utc>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> AuthResult<Session> {
        let (access_token, expires_at) = self.tokens.issue_access_token(user, now)?;

        Ok(self
            .sessions
            .create_session(NewSession {
                user_id: user.id,
                access_token,
                refresh_token: self.tokens.issue_refresh_token(),
                expires_at,
                refresh_expires_at: now + self.config.refresh_token_ttl,
                ip_address: ip_address.and_then(parse_ip),
                user_agent: user_agent
                    .map(str::trim)
                    .filter(|ua| !ua.is_empty())
                    .map(str::to_string),
                created_at: now,
            })
            .await?)
    }

    /// Rotate a session's token pair
    ///
    /// The old refresh token stops working. If the owning user is missing or no
    /// longer active, the session is revoked.
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidOrExpiredToken` - Unknown, revoked or expired refresh
    ///   token, or the user may no longer sign in
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> AuthResult<TokenPair> {
        let result = self
            .refresh_token_inner(refresh_token, ip_address, user_agent)
            .await;
        self.boundary("refresh_token", "refresh token", result)
    }

    async fn refresh_token_inner(
        &self,
        refresh_token: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> AuthResult<TokenPair> {
        let now = self.clock.now();

        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let session = self
            .sessions
            .find_by_refresh_token(refresh_token)
            .await?
            .filter(|s| s.can_refresh(now))
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        let user = match self.users.find_by_id(session.user_id).await? {
            Some(user) if user.status == UserStatus::Active => user,
            _ => {
                log::warn!(
                    "Refresh refused for session {}: user {} missing or inactive",
                    session.id,
                    session.user_id
                );
                self.sessions.revoke_session(session.id, now).await?;
                return Err(AuthError::InvalidOrExpiredToken);
            }
        };

        let (access_token, expires_at) = self.tokens.issue_access_token(&user, now)?;
        let pair = TokenPair {
            access_token,
            refresh_token: self.tokens.issue_refresh_token(),
            expires_at,
        };
        let rotation = SessionRotation {
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            expires_at: pair.expires_at,
            refresh_expires_at: now + self.config.refresh_token_ttl,
            rotated_at: now,
        };

        // Lost to a concurrent refresh, logout or password reset.
        if !self
            .sessions
            .rotate_session(session.id, refresh_token, rotation)
            .await?
        {
            log::debug!("Refresh of session {} lost a concurrent update", session.id);
            return Err(AuthError::InvalidOrExpiredToken);
        }

        self.record(
            Some(user.id),
            ActivityKind::RefreshToken,
            "Token refreshed",
            ip_address,
            user_agent,
        )
        .await;

        Ok(pair)
    }

    /// Logout by revoking the session behind `access_token`
    ///
    /// Unknown or already revoked sessions are not an error.
    pub async fn logout(&self, access_token: &str) -> AuthResult<bool> {
        let result = self.logout_inner(access_token).await;
        self.boundary("logout", "access token", result)
    }

    async fn logout_inner(&self, access_token: &str) -> AuthResult<bool> {
        let Some(session) = self.sessions.find_by_access_token(access_token).await? else {
            return Ok(true);
        };

        if !session.revoked && self.sessions.revoke_session(session.id, self.clock.now()).await? {
            self.record(Some(session.user_id), ActivityKind::Logout, "Logout", None, None)
                .await;
        }

        Ok(true)
    }

    /// Start the password reset flow
    ///
    /// Returns `true` for every well-formed email, registered or not.
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidInput` - Malformed email
    pub async fn forgot_password(&self, email: &str) -> AuthResult<bool> {
        let result = self.forgot_password_inner(email).await;
        self.boundary("forgot_password", &format!("email={email}"), result)
    }

    async fn forgot_password_inner(&self, email: &str) -> AuthResult<bool> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidInput("Invalid email".to_string()));
        }

        let Some(user) = self.users.find_by_email(&email).await? else {
            log::debug!("Password reset requested for unknown email");
            return Ok(true);
        };

        let now = self.clock.now();
        self.reset_tokens
            .invalidate_all_for_user(user.id, now)
            .await?;

        let token = self.tokens.issue_reset_token();
        self.reset_tokens
            .create_token(NewResetToken {
                user_id: user.id,
                token: token.clone(),
                expires_at: now + self.config.reset_token_ttl,
                created_at: now,
            })
            .await?;

        self.record(
            Some(user.id),
            ActivityKind::PasswordResetRequested,
            "Password reset token issued",
            None,
            None,
        )
        .await;

        if !self.mailer.send_password_reset_email(&user.email, &token).await {
            log::warn!("Failed to send password reset email to user {}", user.id);
        }

        Ok(true)
    }

    /// Complete the password reset flow
    ///
    /// Consumes the token, clears any lockout and revokes every session of the
    /// user.
    ///
    /// # Errors
    ///
    /// * `AuthError::WeakPassword` - New password fails the policy
    /// * `AuthError::InvalidOrExpiredToken` - Unknown, used or expired token
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<bool> {
        let result = self.reset_password_inner(token, new_password).await;
        self.boundary("reset_password", "reset token", result)
    }

    async fn reset_password_inner(&self, token: &str, new_password: &str) -> AuthResult<bool> {
        PasswordPolicy::enforce(new_password)?;

        let now = self.clock.now();
        let reset_token = self
            .reset_tokens
            .find_by_token(token)
            .await?
            .filter(|t| t.is_redeemable(now))
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        let Some(user) = self.users.find_by_id(reset_token.user_id).await? else {
            return Err(AuthError::InvalidOrExpiredToken);
        };

        // Claiming the token first keeps it single-use under concurrent resets.
        if !self.reset_tokens.mark_used(reset_token.id, now).await? {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let password_hash = self.hasher.hash(new_password)?;
        if !self
            .users
            .set_password(user.id, &password_hash, None, true, now)
            .await?
        {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let revoked = self.sessions.revoke_all_for_user(user.id, now).await?;
        log::info!(
            "Password reset for user {}, {} session(s) revoked",
            user.id,
            revoked
        );

        self.record(
            Some(user.id),
            ActivityKind::PasswordChanged,
            "Password changed via reset",
            None,
            None,
        )
        .await;

        Ok(true)
    }

    /// Change the password of a signed-in user
    ///
    /// Other sessions stay valid.
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidInput` - Empty password fields
    /// * `AuthError::InvalidCredentials` - Unknown user or wrong current password
    /// * `AuthError::WeakPassword` - New password fails the policy
    pub async fn change_password(
        &self,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<bool> {
        let result = self
            .change_password_inner(user_id, current_password, new_password)
            .await;
        self.boundary("change_password", &format!("user_id={user_id}"), result)
    }

    async fn change_password_inner(
        &self,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<bool> {
        if current_password.is_empty() || new_password.is_empty() {
            return Err(AuthError::InvalidInput("Password is required".to_string()));
        }

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !self.hasher.verify(current_password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        PasswordPolicy::enforce(new_password)?;

        // Conditioned on the verified hash so a reset in between wins.
        let password_hash = self.hasher.hash(new_password)?;
        if !self
            .users
            .set_password(
                user.id,
                &password_hash,
                Some(&user.password_hash),
                false,
                self.clock.now(),
            )
            .await?
        {
            return Err(AuthError::InvalidCredentials);
        }

        self.record(
            Some(user.id),
            ActivityKind::PasswordChanged,
            "Password changed by user",
            None,
            None,
        )
        .await;

        Ok(true)
    }

    /// Whether `access_token` is correctly signed, unexpired and backed by a live
    /// session
    pub async fn validate_token(&self, access_token: &str) -> bool {
        match self.authenticate_session(access_token).await {
            Ok(_) => true,
            Err(e) => {
                if e.is_internal() {
                    log::error!("validate_token failed: {}", e);
                }
                false
            }
        }
    }

    /// Resolve the user behind a valid access token
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidOrExpiredToken` - Token or session not valid
    /// * `AuthError::AccountInactive` - User is no longer active
    pub async fn authenticate(&self, access_token: &str) -> AuthResult<User> {
        let result = self.authenticate_inner(access_token).await;
        self.boundary("authenticate", "access token", result)
    }

    async fn authenticate_inner(&self, access_token: &str) -> AuthResult<User> {
        let session = self.authenticate_session(access_token).await?;

        let user = self
            .users
            .find_by_id(session.user_id)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        if user.status != UserStatus::Active {
            return Err(AuthError::AccountInactive);
        }

        Ok(user)
    }

    async fn authenticate_session(&self, access_token: &str) -> AuthResult<Session> {
        let now = self.clock.now();
        let claims = self.tokens.decode_access_token(access_token, now)?;

        let session = self
            .sessions
            .find_by_access_token(access_token)
            .await?
            .filter(|s| s.is_active(now) && s.user_id == claims.sub)
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        Ok(session)
    }

    /// Summary of the user behind a valid access token
    pub async fn current_user(&self, access_token: &str) -> AuthResult<UserSummary> {
        self.authenticate(access_token)
            .await
            .map(|user| UserSummary::from(&user))
    }

    /// Delete sessions past their refresh window and expired reset tokens
    pub async fn cleanup_expired(&self) -> AuthResult<CleanupReport> {
        let result = self.cleanup_expired_inner().await;
        self.boundary("cleanup_expired", "scheduled", result)
    }

    async fn cleanup_expired_inner(&self) -> AuthResult<CleanupReport> {
        let now = self.clock.now();
        let report = CleanupReport {
            sessions: self.sessions.delete_expired(now).await?,
            reset_tokens: self.reset_tokens.delete_expired(now).await?,
        };

        if report != CleanupReport::default() {
            log::info!(
                "Cleanup removed {} session(s) and {} reset token(s)",
                report.sessions,
                report.reset_tokens
            );
        }

        Ok(report)
    }

    /// Append to the activity log; failures are logged, never returned
    async fn record(
        &self,
        user_id: Option<UserId>,
        kind: ActivityKind,
        description: impl Into<String>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) {
        let entry = NewActivityEntry::new(
            user_id,
            kind,
            description,
            ip_address,
            user_agent,
            self.clock.now(),
        );

        if let Err(e) = self.activity.append(entry).await {
            log::error!("Failed to append {} activity entry: {}", kind, e);
        }
    }

    /// Replace internal faults with [`AuthError::Internal`] after logging them
    fn boundary<T>(&self, operation: &str, context: &str, result: AuthResult<T>) -> AuthResult<T> {
        result.map_err(|e| {
            if e.is_internal() {
                log::error!("{} failed ({}): {}", operation, context, e);
                AuthError::Internal
            } else {
                e
            }
        })
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
