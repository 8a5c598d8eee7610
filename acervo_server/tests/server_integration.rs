//! Integration tests for the HTTP API.
//!
//! Drives the router in-process against in-memory storage.

use acervo::{
    AuthConfig,
    clock::ManualClock,
    db::{MemoryStore, Stores},
    mailer::Mailer,
    security::RateLimitConfig,
};
use acervo_server::{
    api::{AppState, Storage, create_router},
    config::RateLimits,
};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceExt; // For `oneshot` method

const PASSWORD: &str = "Str0ng@Pass";

#[derive(Default)]
struct CapturingMailer {
    tokens: Mutex<Vec<String>>,
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send_password_reset_email(&self, _to: &str, token: &str) -> bool {
        self.tokens.lock().await.push(token.to_string());
        true
    }
}

struct TestServer {
    app: Router,
    mailer: Arc<CapturingMailer>,
}

fn rate_limits(login_attempts: u32) -> RateLimits {
    RateLimits {
        login: RateLimitConfig {
            action: "login",
            max_attempts: login_attempts,
            window_mins: 15,
        },
        forgot_password: RateLimitConfig {
            action: "forgot_password",
            max_attempts: 3,
            window_mins: 60,
        },
        reset_password: RateLimitConfig {
            action: "reset_password",
            max_attempts: 5,
            window_mins: 15,
        },
    }
}

fn create_test_server_with_limits(login_attempts: u32) -> TestServer {
    let mailer = Arc::new(CapturingMailer::default());
    let state = AppState::new(
        Stores::in_memory(MemoryStore::shared()),
        Storage::Memory,
        mailer.clone(),
        Arc::new(ManualClock::starting_now()),
        AuthConfig::new("test_secret_key_for_jwt_signing_0123456789", "test_pepper_value"),
    )
    .with_rate_limits(rate_limits(login_attempts));

    TestServer {
        app: create_router(state),
        mailer,
    }
}

fn create_test_server() -> TestServer {
    create_test_server_with_limits(5)
}

fn json_request(method: &str, uri: &str, ip: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", ip);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

async fn register(app: &Router, email: &str) -> Value {
    let (status, _, body) = send(
        app,
        json_request(
            "POST",
            "/api/v1/auth/register",
            "10.0.0.1",
            None,
            json!({ "name": "Alice", "email": email, "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "Registration should succeed: {body}");
    body
}

async fn login(app: &Router, email: &str, password: &str, ip: &str) -> (StatusCode, HeaderMap, Value) {
    send(
        app,
        json_request(
            "POST",
            "/api/v1/auth/login",
            ip,
            None,
            json!({ "email": email, "password": password }),
        ),
    )
    .await
}

// ============================================================================
// Health Check Tests
// ============================================================================

#[tokio::test]
async fn test_health_check_endpoint() {
    let server = create_test_server();

    let (status, headers, body) = send(&server.app, get_request("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"]["backend"], "memory");
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let server = create_test_server();

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "trace-me-42")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = send(&server.app, request).await;

    assert_eq!(headers["x-request-id"], "trace-me-42");
}

// ============================================================================
// Authentication Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_register_endpoint() {
    let server = create_test_server();

    let body = register(&server.app, "alice@x.com").await;
    assert_eq!(body["email"], "alice@x.com");
    assert!(body.get("password_hash").is_none());

    let (status, _, _) = send(
        &server.app,
        json_request(
            "POST",
            "/api/v1/auth/register",
            "10.0.0.1",
            None,
            json!({ "name": "Alice", "email": "alice@x.com", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, body) = send(
        &server.app,
        json_request(
            "POST",
            "/api/v1/auth/register",
            "10.0.0.1",
            None,
            json!({ "name": "Bob", "email": "bob@x.com", "password": "weak" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_session_lifecycle() {
    let server = create_test_server();
    register(&server.app, "alice@x.com").await;

    let (status, _, body) = login(&server.app, "alice@x.com", PASSWORD, "10.0.0.2").await;
    assert_eq!(status, StatusCode::OK);
    let access = body["access_token"].as_str().unwrap().to_string();
    assert_eq!(body["user"]["email"], "alice@x.com");

    let (status, _, me) = send(&server.app, get_request("/api/v1/auth/me", Some(&access))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "alice@x.com");

    let (_, _, valid) = send(&server.app, get_request("/api/v1/auth/validate", Some(&access))).await;
    assert_eq!(valid["valid"], true);

    let (status, _, _) = send(
        &server.app,
        json_request("POST", "/api/v1/auth/logout", "10.0.0.2", Some(&access), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, _, valid) = send(&server.app, get_request("/api/v1/auth/validate", Some(&access))).await;
    assert_eq!(valid["valid"], false);

    let (status, _, _) = send(&server.app, get_request("/api/v1/auth/me", Some(&access))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Logging out twice is fine.
    let (status, _, _) = send(
        &server.app,
        json_request("POST", "/api/v1/auth/logout", "10.0.0.2", Some(&access), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_login_returns_unauthorized() {
    let server = create_test_server();
    register(&server.app, "alice@x.com").await;

    let (unknown, _, unknown_body) =
        login(&server.app, "nobody@x.com", PASSWORD, "10.0.0.3").await;
    let (wrong, _, wrong_body) = login(&server.app, "alice@x.com", "Wr0ng@Pass", "10.0.0.3").await;

    assert_eq!(unknown, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_body, wrong_body, "Failures must be indistinguishable");

    let (status, _, _) = login(&server.app, "not-an-email", PASSWORD, "10.0.0.3").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_account_lockout_returns_locked() {
    let server = create_test_server_with_limits(100);
    register(&server.app, "alice@x.com").await;

    for _ in 0..5 {
        let (status, _, _) = login(&server.app, "alice@x.com", "Wr0ng@Pass", "10.0.0.4").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _, _) = login(&server.app, "alice@x.com", PASSWORD, "10.0.0.4").await;
    assert_eq!(status, StatusCode::LOCKED);
}

#[tokio::test]
async fn test_refresh_rotates_tokens() {
    let server = create_test_server();
    register(&server.app, "alice@x.com").await;
    let (_, _, body) = login(&server.app, "alice@x.com", PASSWORD, "10.0.0.5").await;
    let refresh = body["refresh_token"].as_str().unwrap().to_string();

    let (status, _, pair) = send(
        &server.app,
        json_request(
            "POST",
            "/api/v1/auth/refresh",
            "10.0.0.5",
            None,
            json!({ "refresh_token": refresh }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(pair["refresh_token"], refresh.as_str());

    let (status, _, _) = send(
        &server.app,
        json_request(
            "POST",
            "/api/v1/auth/refresh",
            "10.0.0.5",
            None,
            json!({ "refresh_token": refresh }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let server = create_test_server();
    register(&server.app, "alice@x.com").await;

    let (status, _, unknown) = send(
        &server.app,
        json_request(
            "POST",
            "/api/v1/auth/forgot-password",
            "10.0.0.6",
            None,
            json!({ "email": "nobody@x.com" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, known) = send(
        &server.app,
        json_request(
            "POST",
            "/api/v1/auth/forgot-password",
            "10.0.0.6",
            None,
            json!({ "email": "alice@x.com" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unknown, known, "Responses must not reveal registration");

    let token = server.mailer.tokens.lock().await.last().cloned().unwrap();
    let reset = json!({ "token": token, "new_password": "N3w@Password" });

    let (status, _, _) = send(
        &server.app,
        json_request("POST", "/api/v1/auth/reset-password", "10.0.0.6", None, reset.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(
        &server.app,
        json_request("POST", "/api/v1/auth/reset-password", "10.0.0.6", None, reset),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = login(&server.app, "alice@x.com", "N3w@Password", "10.0.0.6").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_change_password_requires_auth() {
    let server = create_test_server();
    register(&server.app, "alice@x.com").await;

    let change = json!({ "current_password": PASSWORD, "new_password": "N3w@Password" });

    let (status, _, _) = send(
        &server.app,
        json_request("POST", "/api/v1/auth/change-password", "10.0.0.7", None, change.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, _, body) = login(&server.app, "alice@x.com", PASSWORD, "10.0.0.7").await;
    let access = body["access_token"].as_str().unwrap().to_string();

    let (status, _, _) = send(
        &server.app,
        json_request(
            "POST",
            "/api/v1/auth/change-password",
            "10.0.0.7",
            Some(&access),
            json!({ "current_password": "Wr0ng@Pass", "new_password": "N3w@Password" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        &server.app,
        json_request("POST", "/api/v1/auth/change-password", "10.0.0.7", Some(&access), change),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = login(&server.app, "alice@x.com", "N3w@Password", "10.0.0.8").await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Rate Limiting Tests
// ============================================================================

#[tokio::test]
async fn test_login_rate_limit_blocks_ip() {
    let server = create_test_server();
    register(&server.app, "alice@x.com").await;

    for _ in 0..5 {
        let (status, _, _) = login(&server.app, "nobody@x.com", PASSWORD, "203.0.113.1").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, headers, _) = login(&server.app, "nobody@x.com", PASSWORD, "203.0.113.1").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers[header::RETRY_AFTER], "1800");

    // Now blocked, even with correct credentials.
    let (status, _, _) = login(&server.app, "alice@x.com", PASSWORD, "203.0.113.1").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = send(
        &server.app,
        json_request(
            "POST",
            "/api/v1/auth/forgot-password",
            "203.0.113.1",
            None,
            json!({ "email": "alice@x.com" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Other clients are unaffected.
    let (status, _, _) = login(&server.app, "alice@x.com", PASSWORD, "203.0.113.2").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_forgot_password_rate_limit() {
    let server = create_test_server();

    for _ in 0..3 {
        let (status, _, _) = send(
            &server.app,
            json_request(
                "POST",
                "/api/v1/auth/forgot-password",
                "198.51.100.1",
                None,
                json!({ "email": "nobody@x.com" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, headers, _) = send(
        &server.app,
        json_request(
            "POST",
            "/api/v1/auth/forgot-password",
            "198.51.100.1",
            None,
            json!({ "email": "nobody@x.com" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(headers.contains_key(header::RETRY_AFTER));
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[tokio::test]
async fn test_404_for_invalid_endpoint() {
    let server = create_test_server();

    let (status, _, _) = send(&server.app, get_request("/api/invalid/endpoint", None)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_json_request() {
    let server = create_test_server();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{invalid json"))
        .unwrap();
    let (status, _, _) = send(&server.app, request).await;

    assert!(status.is_client_error(), "Malformed JSON should be rejected");
}

#[tokio::test]
async fn test_validate_without_token() {
    let server = create_test_server();

    let (status, _, body) = send(&server.app, get_request("/api/v1/auth/validate", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
}
