//! Authentication middleware for protected endpoints.
//!
//! The middleware extracts the access token from the `Authorization` header,
//! resolves it to a user through the [`acervo::AuthManager`] (signature, expiry
//! and a live session are all required) and injects an [`AuthenticatedUser`]
//! into request extensions for downstream handlers.
//!
//! # Extracting the user
//!
//! ```rust,no_run
//! use acervo_server::api::middleware::AuthenticatedUser;
//! use axum::extract::Extension;
//!
//! async fn protected_handler(Extension(auth): Extension<AuthenticatedUser>) -> String {
//!     format!("Authenticated as user {}", auth.user.id)
//! }
//! # let _ = protected_handler;
//! ```

use acervo::auth::UserSummary;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use super::{AppState, error::ApiError};

/// User resolved from a valid bearer token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: UserSummary,
    pub access_token: String,
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Reject the request with `401` unless it carries a valid access token.
///
/// Inactive accounts get `403`.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())
        .ok_or(ApiError::MissingToken)?
        .to_string();

    let user = state.auth_manager.authenticate(&token).await?;

    request.extensions_mut().insert(AuthenticatedUser {
        user: UserSummary::from(&user),
        access_token: token,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));
    }
}
