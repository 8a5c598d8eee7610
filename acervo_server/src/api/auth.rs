//! Authentication API handlers.
//!
//! Every handler delegates to [`acervo::AuthManager`]; this layer adds JSON
//! shapes, per-IP rate limiting and the IP blocklist.
//!
//! # Examples
//!
//! Login:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/auth/login \
//!   -H "Content-Type: application/json" \
//!   -d '{"email": "alice@x.com", "password": "Str0ng@Pass"}'
//! ```
//!
//! Current user:
//! ```bash
//! curl http://localhost:8080/api/v1/auth/me -H "Authorization: Bearer <access_token>"
//! ```

use acervo::{
    auth::{LoginResponse, RegisterRequest, TokenPair, UserSummary},
    security::{RateLimitConfig, RateLimitResult},
};
use axum::{
    Json,
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};

use super::{
    AppState,
    client::ClientInfo,
    error::ApiError,
    middleware::{AuthenticatedUser, bearer_token},
};
use crate::logging::SecurityLog;

#[derive(Debug, Deserialize)]
pub struct RegisterPayload {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshPayload {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordPayload {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordPayload {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordPayload {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: &'static str,
}

impl SuccessResponse {
    fn reply(message: &'static str) -> Json<Self> {
        Json(Self {
            success: true,
            message,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
}

/// Register a new account.
///
/// Public registration always creates a regular, active user.
///
/// # Errors
///
/// - `400 Bad Request`: Invalid email, refused domain or weak password
/// - `409 Conflict`: Email already registered
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<UserSummary>), ApiError> {
    let user = state
        .auth_manager
        .register(RegisterRequest {
            name: payload.name,
            email: payload.email,
            password: payload.password,
            role: None,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// Authenticate and open a session.
///
/// Exceeding the per-IP login limit blocks the IP for the configured time.
///
/// # Errors
///
/// - `400 Bad Request`: Malformed email or empty password
/// - `401 Unauthorized`: Unknown email or wrong password
/// - `403 Forbidden`: Inactive account or blocked IP
/// - `423 Locked`: Too many failed logins on this account
/// - `429 Too Many Requests`: Login rate limit exceeded
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<LoginResponse>, ApiError> {
    reject_blocked_ip(&state, &client).await?;

    if let RateLimitResult::Exceeded { retry_after_secs } = state
        .rate_limiter
        .check(client.rate_limit_key(), &state.rate_limits.login)
    {
        SecurityLog::RateLimited {
            action: state.rate_limits.login.action,
            ip: client.ip.as_deref(),
        }
        .emit();

        let retry_after_secs = match &client.ip {
            Some(ip) => match state
                .ip_blocklist
                .block(ip, state.ip_block_duration, "Login rate limit exceeded")
                .await
            {
                Ok(()) => {
                    SecurityLog::IpBlocked {
                        ip: ip.as_str(),
                        minutes: state.ip_block_duration.num_minutes(),
                    }
                    .emit();
                    state.ip_block_duration.num_seconds()
                }
                Err(e) => {
                    tracing::warn!("Could not block {}: {}", ip, e);
                    retry_after_secs
                }
            },
            None => retry_after_secs,
        };

        return Err(ApiError::RateLimited { retry_after_secs });
    }

    let response = state
        .auth_manager
        .login(
            &payload.email,
            &payload.password,
            client.ip.as_deref(),
            client.user_agent.as_deref(),
        )
        .await?;

    let detector = state.detector.clone();
    let user_id = response.user.id;
    tokio::spawn(async move {
        if detector.detect(user_id).await {
            SecurityLog::SuspiciousLogin { user_id }.emit();
        }
    });

    Ok(Json(response))
}

/// Rotate a session's token pair.
///
/// # Errors
///
/// - `401 Unauthorized`: Unknown, revoked or expired refresh token
pub async fn refresh_token(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(payload): Json<RefreshPayload>,
) -> Result<Json<TokenPair>, ApiError> {
    let pair = state
        .auth_manager
        .refresh_token(
            &payload.refresh_token,
            client.ip.as_deref(),
            client.user_agent.as_deref(),
        )
        .await?;

    Ok(Json(pair))
}

/// Revoke the session behind the bearer token.
///
/// Succeeds for unknown or already revoked tokens.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::MissingToken)?;
    state.auth_manager.logout(token).await?;

    Ok(SuccessResponse::reply("Logged out"))
}

/// Start the password reset flow.
///
/// The response is identical whether or not the email is registered.
///
/// # Errors
///
/// - `400 Bad Request`: Malformed email
/// - `429 Too Many Requests`: Rate limit exceeded
pub async fn forgot_password(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(payload): Json<ForgotPasswordPayload>,
) -> Result<Json<SuccessResponse>, ApiError> {
    reject_blocked_ip(&state, &client).await?;
    enforce_limit(&state, &client, &state.rate_limits.forgot_password)?;

    state.auth_manager.forgot_password(&payload.email).await?;

    Ok(SuccessResponse::reply(
        "If the email is registered, a password reset link has been sent",
    ))
}

/// Complete the password reset flow.
///
/// # Errors
///
/// - `400 Bad Request`: Weak password
/// - `401 Unauthorized`: Unknown, used or expired token
/// - `429 Too Many Requests`: Rate limit exceeded
pub async fn reset_password(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(payload): Json<ResetPasswordPayload>,
) -> Result<Json<SuccessResponse>, ApiError> {
    reject_blocked_ip(&state, &client).await?;
    enforce_limit(&state, &client, &state.rate_limits.reset_password)?;

    state
        .auth_manager
        .reset_password(&payload.token, &payload.new_password)
        .await?;

    Ok(SuccessResponse::reply("Password has been reset"))
}

/// Change the signed-in user's password.
///
/// # Errors
///
/// - `400 Bad Request`: Empty fields or weak new password
/// - `401 Unauthorized`: Wrong current password
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(payload): Json<ChangePasswordPayload>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state
        .auth_manager
        .change_password(
            auth.user.id,
            &payload.current_password,
            &payload.new_password,
        )
        .await?;

    Ok(SuccessResponse::reply("Password changed"))
}

/// Whether the bearer token is currently valid; never fails
pub async fn validate(State(state): State<AppState>, headers: HeaderMap) -> Json<ValidateResponse> {
    let valid = match bearer_token(&headers) {
        Some(token) => state.auth_manager.validate_token(token).await,
        None => false,
    };

    Json(ValidateResponse { valid })
}

/// Summary of the signed-in user
pub async fn me(Extension(auth): Extension<AuthenticatedUser>) -> Json<UserSummary> {
    Json(auth.user)
}

async fn reject_blocked_ip(state: &AppState, client: &ClientInfo) -> Result<(), ApiError> {
    if let Some(ip) = &client.ip {
        if state.ip_blocklist.is_blocked(ip).await {
            SecurityLog::BlockedIpRequest { ip: ip.as_str() }.emit();
            return Err(ApiError::IpBlocked);
        }
    }
    Ok(())
}

fn enforce_limit(
    state: &AppState,
    client: &ClientInfo,
    config: &RateLimitConfig,
) -> Result<(), ApiError> {
    match state.rate_limiter.check(client.rate_limit_key(), config) {
        RateLimitResult::Allowed { .. } => Ok(()),
        RateLimitResult::Exceeded { retry_after_secs } => {
            SecurityLog::RateLimited {
                action: config.action,
                ip: client.ip.as_deref(),
            }
            .emit();
            Err(ApiError::RateLimited { retry_after_secs })
        }
    }
}
