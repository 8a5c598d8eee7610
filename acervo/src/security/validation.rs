//! Input validation: email format, email domain policy and IP normalization.

use regex::Regex;
use std::{net::IpAddr, sync::LazyLock};

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is a valid regex")
});

/// Disposable mailbox providers refused at registration
pub const DISPOSABLE_EMAIL_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "guerrillamail.com",
    "mailinator.com",
    "tempmail.org",
    "throwaway.email",
    "temp-mail.org",
    "getnada.com",
    "maildrop.cc",
];

/// Check email format (`local@domain.tld`, no whitespace)
///
/// # Examples
///
/// ```
/// use acervo::security::is_valid_email;
///
/// assert!(is_valid_email("alice@x.com"));
/// assert!(!is_valid_email("alice@x"));
/// assert!(!is_valid_email("alice.x.com"));
/// assert!(!is_valid_email(""));
/// ```
pub fn is_valid_email(email: &str) -> bool {
    !email.trim().is_empty() && EMAIL_PATTERN.is_match(email)
}

/// Lowercased domain part of a well-formed email
pub fn email_domain(email: &str) -> Option<String> {
    if !is_valid_email(email) {
        return None;
    }
    email.rsplit_once('@').map(|(_, domain)| domain.to_lowercase())
}

/// Outcome of the email domain policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainVerdict {
    /// Domain may register
    Allowed,
    /// Domain is a known disposable provider
    Disposable(String),
    /// An allow-list is configured and the domain is not on it
    NotAllowed(String),
    /// Email is malformed
    Malformed,
}

/// Email domain allow/deny policy
#[derive(Debug, Clone, Default)]
pub struct EmailDomainPolicy {
    allowed_domains: Option<Vec<String>>,
}

impl EmailDomainPolicy {
    /// Policy that only refuses disposable providers
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict registration to a comma-separated list of domains.
    ///
    /// An empty list leaves the policy open.
    pub fn with_allowed_domains(list: &str) -> Self {
        let domains: Vec<String> = list
            .split(',')
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        Self {
            allowed_domains: (!domains.is_empty()).then_some(domains),
        }
    }

    /// Classify an email address
    pub fn evaluate(&self, email: &str) -> DomainVerdict {
        let Some(domain) = email_domain(email) else {
            return DomainVerdict::Malformed;
        };

        if DISPOSABLE_EMAIL_DOMAINS.contains(&domain.as_str()) {
            return DomainVerdict::Disposable(domain);
        }

        match &self.allowed_domains {
            Some(allowed) if !allowed.contains(&domain) => DomainVerdict::NotAllowed(domain),
            _ => DomainVerdict::Allowed,
        }
    }
}

/// Normalize IP address to handle IPv4-mapped IPv6 addresses
///
/// Converts IPv4-mapped IPv6 addresses (e.g., `::ffff:192.168.1.1`) to their
/// plain IPv4 form. Strings that do not parse are returned unchanged.
///
/// # Examples
///
/// ```
/// use acervo::security::normalize_ip;
///
/// assert_eq!(normalize_ip("192.168.1.1"), "192.168.1.1");
/// assert_eq!(normalize_ip("::ffff:192.168.1.1"), "192.168.1.1");
/// assert_eq!(normalize_ip("2001:db8::1"), "2001:db8::1");
/// assert_eq!(normalize_ip("invalid"), "invalid");
/// ```
pub fn normalize_ip(ip_str: &str) -> String {
    parse_ip(ip_str).unwrap_or_else(|| ip_str.to_string())
}

/// Parse and normalize an IP address, `None` if it is not one
pub fn parse_ip(ip_str: &str) -> Option<String> {
    match ip_str.trim().parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => Some(match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        }),
        Ok(IpAddr::V4(v4)) => Some(v4.to_string()),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_emails() {
        for email in ["", "   ", "alice", "alice@", "@x.com", "alice@x", "al ice@x.com", "a@@x.com"] {
            assert!(!is_valid_email(email), "{email:?} should be rejected");
        }
    }

    #[test]
    fn test_domain_extraction() {
        assert_eq!(email_domain("Bob@Example.COM"), Some("example.com".to_string()));
        assert_eq!(email_domain("bob"), None);
    }

    #[test]
    fn test_disposable_domains_refused() {
        let policy = EmailDomainPolicy::new();
        assert_eq!(
            policy.evaluate("x@Mailinator.com"),
            DomainVerdict::Disposable("mailinator.com".to_string())
        );
        assert_eq!(policy.evaluate("x@school.edu"), DomainVerdict::Allowed);
        assert_eq!(policy.evaluate("nope"), DomainVerdict::Malformed);
    }

    #[test]
    fn test_allow_list() {
        let policy = EmailDomainPolicy::with_allowed_domains(" school.edu, Acervo.org ,");
        assert_eq!(policy.evaluate("a@acervo.org"), DomainVerdict::Allowed);
        assert_eq!(
            policy.evaluate("a@gmail.com"),
            DomainVerdict::NotAllowed("gmail.com".to_string())
        );

        let open = EmailDomainPolicy::with_allowed_domains(" , ");
        assert_eq!(open.evaluate("a@gmail.com"), DomainVerdict::Allowed);
    }

    #[test]
    fn test_parse_ip() {
        assert_eq!(parse_ip(" 10.1.2.3 "), Some("10.1.2.3".to_string()));
        assert_eq!(parse_ip("::ffff:10.1.2.3"), Some("10.1.2.3".to_string()));
        assert_eq!(parse_ip("localhost"), None);
    }
}
