//! Outbound email collaborator.

use async_trait::async_trait;

/// Sends account emails. Delivery is best-effort: `false` means it failed.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send the password reset link carrying `token` to `to`
    async fn send_password_reset_email(&self, to: &str, token: &str) -> bool;
}

/// Mailer that writes the reset link to the log instead of sending it
#[derive(Debug, Clone)]
pub struct LogMailer {
    reset_url_base: String,
}

impl LogMailer {
    /// `reset_url_base` is prefixed to `?token=...`
    pub fn new(reset_url_base: impl Into<String>) -> Self {
        Self {
            reset_url_base: reset_url_base.into(),
        }
    }

    /// Link the recipient would follow
    pub fn reset_link(&self, token: &str) -> String {
        let separator = if self.reset_url_base.contains('?') { '&' } else { '?' };
        format!("{}{}token={}", self.reset_url_base, separator, token)
    }
}

impl Default for LogMailer {
    fn default() -> Self {
        Self::new("http://localhost:3000/reset-password")
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_password_reset_email(&self, to: &str, token: &str) -> bool {
        log::info!("Password reset email for {}: {}", to, self.reset_link(token));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_link() {
        assert_eq!(
            LogMailer::new("https://acervo.example/reset").reset_link("abc"),
            "https://acervo.example/reset?token=abc"
        );
        assert_eq!(
            LogMailer::new("https://acervo.example/r?lang=pt").reset_link("abc"),
            "https://acervo.example/r?lang=pt&token=abc"
        );
    }

    #[tokio::test]
    async fn test_log_mailer_always_succeeds() {
        assert!(LogMailer::default().send_password_reset_email("a@x.com", "t").await);
    }
}
