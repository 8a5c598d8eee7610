//! Security module providing rate limiting, IP blocking and activity auditing.
//!
//! - **Rate limiting**: sliding window per `identifier:action`, failing open
//! - **IP blocklist**: temporary blocks that expire on their own
//! - **Security events**: `SecurityAlert` entries in the activity log
//! - **Suspicious activity**: 24h heuristics over a user's activity log
//! - **Validation**: email format, email domain policy, IP normalization
//!
//! ## Example
//!
//! ```
//! use acervo::clock::SystemClock;
//! use acervo::security::{RateLimitConfig, RateLimiter};
//! use std::sync::Arc;
//!
//! let limiter = RateLimiter::new(Arc::new(SystemClock));
//! let result = limiter.check("192.168.1.1", &RateLimitConfig::login());
//! assert!(result.is_allowed());
//! ```

pub mod errors;
pub mod events;
pub mod ip_blocklist;
pub mod models;
pub mod rate_limiter;
pub mod suspicious;
pub mod validation;

pub use errors::{SecurityError, SecurityResult};
pub use events::SecurityEventRecorder;
pub use ip_blocklist::IpBlocklist;
pub use models::{ActivityEntry, ActivityKind, NewActivityEntry};
pub use rate_limiter::{RateLimitConfig, RateLimitResult, RateLimiter};
pub use suspicious::{SuspicionTrigger, SuspiciousActivityDetector};
pub use validation::{
    DomainVerdict, EmailDomainPolicy, email_domain, is_valid_email, normalize_ip, parse_ip,
};
