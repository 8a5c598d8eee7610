//! Access-token signing and opaque token generation.

use super::{
    errors::{AuthError, AuthResult},
    models::{AccessTokenClaims, User},
};
use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use uuid::Uuid;

/// Refresh tokens are 64 random bytes, base64-encoded
const REFRESH_TOKEN_BYTES: usize = 64;

/// Reset tokens are 32 random bytes, URL-safe base64 without padding
const RESET_TOKEN_BYTES: usize = 32;

/// Issues and verifies HS256 access tokens and generates opaque secrets
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_token_duration: Duration,
}

impl TokenIssuer {
    /// Create an issuer signing with `secret`
    pub fn new(
        secret: &str,
        issuer: String,
        audience: String,
        access_token_duration: Duration,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            access_token_duration,
        }
    }

    /// Sign an access token for `user`, returning the token and its expiry
    pub fn issue_access_token(
        &self,
        user: &User,
        now: DateTime<Utc>,
    ) -> AuthResult<(String, DateTime<Utc>)> {
        let expires_at = now + self.access_token_duration;
        let claims = AccessTokenClaims {
            sub: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            status: user.status,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        Ok((token, expires_at))
    }

    /// Generate a refresh token
    pub fn issue_refresh_token(&self) -> String {
        STANDARD.encode(random_bytes::<REFRESH_TOKEN_BYTES>())
    }

    /// Generate a single-use password reset token
    pub fn issue_reset_token(&self) -> String {
        URL_SAFE_NO_PAD.encode(random_bytes::<RESET_TOKEN_BYTES>())
    }

    /// Verify signature, issuer, audience and expiry of an access token.
    ///
    /// Expiry is checked against `now` rather than the system clock, with no
    /// leeway. This says nothing about the session behind the token.
    pub fn decode_access_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<AccessTokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|_| AuthError::InvalidOrExpiredToken)?
            .claims;

        if claims.exp <= now.timestamp() {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        Ok(claims)
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_duration", &self.access_token_duration)
            .finish_non_exhaustive()
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}
