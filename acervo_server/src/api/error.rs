//! Mapping of domain errors onto HTTP responses.

use acervo::AuthError;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Everything a handler can fail with
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Too many requests, try again later")]
    RateLimited { retry_after_secs: i64 },

    #[error("Access from this address is temporarily blocked")]
    IpBlocked,

    #[error("Missing or malformed bearer token")]
    MissingToken,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(e) => match e {
                AuthError::InvalidInput(_) | AuthError::WeakPassword(_) => StatusCode::BAD_REQUEST,
                AuthError::InvalidCredentials | AuthError::InvalidOrExpiredToken => {
                    StatusCode::UNAUTHORIZED
                }
                AuthError::AccountInactive => StatusCode::FORBIDDEN,
                AuthError::AccountLocked => StatusCode::LOCKED,
                AuthError::EmailTaken => StatusCode::CONFLICT,
                AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::IpBlocked => StatusCode::FORBIDDEN,
            ApiError::MissingToken => StatusCode::UNAUTHORIZED,
        }
    }

    /// Message safe to show a client
    pub fn client_message(&self) -> String {
        match self {
            ApiError::Auth(e) => e.client_message(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let mut response = (
            status,
            Json(ErrorResponse {
                error: self.client_message(),
            }),
        )
            .into_response();

        if let ApiError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs.max(1)));
        }

        response
    }
}
