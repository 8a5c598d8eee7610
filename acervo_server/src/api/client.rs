//! Client address and user agent extraction.

use acervo::security::parse_ip;
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header::USER_AGENT, request::Parts},
};
use std::{convert::Infallible, net::SocketAddr};

/// Who sent the request, as far as the server can tell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Normalized client IP, if one could be parsed
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    /// Prefer proxy headers, fall back to the socket peer.
    ///
    /// Forwarding headers are trusted as-is; deploy behind a proxy that
    /// overwrites them.
    pub fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(parse_ip);

        let ip = forwarded
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|value| value.to_str().ok())
                    .and_then(parse_ip)
            })
            .or_else(|| peer.and_then(|addr| parse_ip(&addr.ip().to_string())));

        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        Self { ip, user_agent }
    }

    /// Identifier used for per-client rate limiting
    pub fn rate_limit_key(&self) -> &str {
        self.ip.as_deref().unwrap_or("unknown")
    }
}

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(Self::from_headers(&parts.headers, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("::ffff:203.0.113.9, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));

        let client = ClientInfo::from_headers(&headers, None);
        assert_eq!(client.ip.as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn test_falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(
            ClientInfo::from_headers(&headers, None).ip.as_deref(),
            Some("10.0.0.2")
        );

        let peer: SocketAddr = "192.168.1.5:40000".parse().unwrap();
        let client = ClientInfo::from_headers(&HeaderMap::new(), Some(peer));
        assert_eq!(client.ip.as_deref(), Some("192.168.1.5"));
    }

    #[test]
    fn test_garbage_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        headers.insert(USER_AGENT, HeaderValue::from_static("   "));

        let client = ClientInfo::from_headers(&headers, None);
        assert_eq!(client, ClientInfo::default());
        assert_eq!(client.rate_limit_key(), "unknown");
    }
}
