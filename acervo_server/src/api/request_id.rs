//! Request correlation: every request runs inside a span that names its ID,
//! route and client address, and the ID is echoed back to the caller.

use super::client::ClientInfo;
use axum::{
    extract::{ConnectInfo, MatchedPath, Request},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::{net::SocketAddr, time::Instant};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest client-supplied ID that is accepted
const MAX_REQUEST_ID_LEN: usize = 128;

/// What the logs know about a request. Stored in the request extensions so
/// handlers can tag their own events with the same ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    /// Route template such as `/api/v1/auth/login`, or the raw path when no
    /// route matched
    pub route: String,
    pub client_ip: Option<String>,
}

impl RequestContext {
    fn from_request(request: &Request) -> Self {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|path| path.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());

        Self {
            request_id: caller_request_id(request.headers())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            route,
            client_ip: ClientInfo::from_headers(request.headers(), peer).ip,
        }
    }
}

/// The caller's `x-request-id`, if it is printable and of sane length
fn caller_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
}

/// Run the request inside a correlation span and echo its ID.
///
/// # Example
///
/// ```no_run
/// use axum::{Router, routing::get, middleware};
/// use acervo_server::api::request_id::request_id_middleware;
///
/// let app: Router = Router::new()
///     .route("/", get(|| async { "Hello" }))
///     .layer(middleware::from_fn(request_id_middleware));
/// # let _ = app;
/// ```
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let context = RequestContext::from_request(&request);

    let span = tracing::info_span!(
        "request",
        request_id = %context.request_id,
        method = %request.method(),
        route = %context.route,
        client_ip = context.client_ip.as_deref().unwrap_or("unknown"),
    );
    let echoed = HeaderValue::from_str(&context.request_id).ok();
    request.extensions_mut().insert(context);

    let mut response = async move {
        let started = Instant::now();
        let response = next.run(request).await;
        tracing::info!(
            status = %response.status(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }
    .instrument(span)
    .await;

    if let Some(value) = echoed {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Extension, Router, body::Body, middleware, routing::get};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn request(uri: &str, headers: &[(&'static str, &str)]) -> Request {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_context_keeps_caller_id_and_forwarded_ip() {
        let context = RequestContext::from_request(&request(
            "/api/v1/auth/login?next=home",
            &[
                (REQUEST_ID_HEADER, " trace-42 "),
                ("x-forwarded-for", "203.0.113.9, 10.0.0.1"),
            ],
        ));

        assert_eq!(context.request_id, "trace-42");
        assert_eq!(context.client_ip.as_deref(), Some("203.0.113.9"));
        // Unrouted requests fall back to the path, never the query string.
        assert_eq!(context.route, "/api/v1/auth/login");
    }

    #[test]
    fn test_unusable_caller_id_replaced() {
        let long = "x".repeat(MAX_REQUEST_ID_LEN + 1);
        for id in ["", "   ", long.as_str()] {
            let context = RequestContext::from_request(&request("/", &[(REQUEST_ID_HEADER, id)]));
            assert!(Uuid::parse_str(&context.request_id).is_ok(), "{id:?}");
        }

        let context = RequestContext::from_request(&request("/", &[]));
        assert!(Uuid::parse_str(&context.request_id).is_ok());
        assert_eq!(context.client_ip, None);
    }

    #[tokio::test]
    async fn test_handlers_see_route_template_and_id_is_echoed() {
        let app = Router::new()
            .route(
                "/users/{id}",
                get(|Extension(context): Extension<RequestContext>| async move {
                    format!("{} {}", context.route, context.request_id)
                }),
            )
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(request("/users/7", &[(REQUEST_ID_HEADER, "abc")]))
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"/users/{id} abc");
    }
}
