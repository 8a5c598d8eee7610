//! Password strength policy and Argon2id hashing.

use super::errors::{AuthError, AuthResult};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Minimum password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Symbols accepted by the policy; at least one is required
pub const PASSWORD_SYMBOLS: &[char] = &['@', '$', '!', '%', '*', '?', '&'];

/// Passwords rejected regardless of composition (compared case-insensitively)
const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "123456",
    "123456789",
    "qwerty",
    "abc123",
    "password123",
    "admin",
    "letmein",
    "welcome",
    "monkey",
];

/// Stateless password complexity validator.
///
/// A strong password has at least 8 characters, one lowercase letter, one
/// uppercase letter, one digit and one symbol from [`PASSWORD_SYMBOLS`], uses no
/// other characters, and is not on the common-password denylist.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordPolicy;

impl PasswordPolicy {
    /// Whether `password` satisfies the policy
    pub fn is_strong(password: &str) -> bool {
        Self::check(password).is_ok()
    }

    /// Validate `password`, describing the first unmet rule
    pub fn check(password: &str) -> Result<(), &'static str> {
        if password.trim().is_empty() {
            return Err("Password must not be empty");
        }

        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err("Password must be at least 8 characters");
        }

        if let Some(c) = password
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !PASSWORD_SYMBOLS.contains(c))
        {
            log::debug!("Password rejected for unsupported character {:?}", c);
            return Err("Password may only contain letters, digits and the symbols @$!%*?&");
        }

        let has_lowercase = password.chars().any(|c| c.is_ascii_lowercase());
        let has_uppercase = password.chars().any(|c| c.is_ascii_uppercase());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        let has_symbol = password.chars().any(|c| PASSWORD_SYMBOLS.contains(&c));

        if !has_lowercase || !has_uppercase || !has_digit || !has_symbol {
            return Err(
                "Password must contain an uppercase letter, a lowercase letter, a number and a symbol",
            );
        }

        let lowered = password.to_lowercase();
        if COMMON_PASSWORDS.contains(&lowered.as_str()) {
            return Err("Password is too common");
        }

        Ok(())
    }

    /// Validate `password`, mapping a failure to [`AuthError::WeakPassword`]
    pub fn enforce(password: &str) -> AuthResult<()> {
        Self::check(password).map_err(|reason| AuthError::WeakPassword(reason.to_string()))
    }
}

/// Argon2id hasher with a server-side pepper
#[derive(Clone)]
pub struct PasswordHasher {
    pepper: String,
}

impl PasswordHasher {
    /// Create a hasher using `pepper`
    pub fn new(pepper: String) -> Self {
        Self { pepper }
    }

    /// Hash password with Argon2id + pepper
    pub fn hash(&self, password: &str) -> AuthResult<String> {
        let peppered = format!("{}{}", password, self.pepper);
        let salt = SaltString::generate(&mut OsRng);

        Ok(Argon2::default()
            .hash_password(peppered.as_bytes(), &salt)
            .map_err(|_| AuthError::HashingFailed)?
            .to_string())
    }

    /// Verify password against hash.
    ///
    /// Returns `Ok(false)` on mismatch; an unparsable stored hash is a fault.
    pub fn verify(&self, password: &str, hash: &str) -> AuthResult<bool> {
        let peppered = format!("{}{}", password, self.pepper);
        let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::HashingFailed)?;

        Ok(Argon2::default()
            .verify_password(peppered.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher").finish_non_exhaustive()
    }
}
