//! HTTP API for the authentication core.
//!
//! # Modules
//!
//! - [`auth`]: register, login, refresh, logout, password reset and change,
//!   token validation, current user
//! - [`middleware`]: bearer-token authentication for protected endpoints
//! - [`client`]: client IP and user agent extraction
//! - [`error`]: status codes and JSON error bodies
//! - [`request_id`]: `x-request-id` propagation and per-request log spans
//!
//! # Endpoints
//!
//! ```text
//! GET  /health                          - Liveness and storage check
//! POST /api/v1/auth/register            - Create an account
//! POST /api/v1/auth/login               - Open a session (rate limited per IP)
//! POST /api/v1/auth/refresh             - Rotate tokens
//! POST /api/v1/auth/logout              - Revoke the bearer token's session
//! POST /api/v1/auth/forgot-password     - Request a reset email (rate limited per IP)
//! POST /api/v1/auth/reset-password      - Redeem a reset token (rate limited per IP)
//! GET  /api/v1/auth/validate            - Check the bearer token
//! POST /api/v1/auth/change-password     - Change password (auth required)
//! GET  /api/v1/auth/me                  - Current user (auth required)
//! ```
//!
//! # CORS
//!
//! CORS is configured permissively. In production, configure appropriate
//! origins, methods, and headers.

pub mod auth;
pub mod client;
pub mod error;
pub mod middleware;
pub mod request_id;

use acervo::{
    AuthConfig, AuthManager,
    clock::SharedClock,
    db::{Database, Stores},
    mailer::Mailer,
    security::{IpBlocklist, RateLimiter, SecurityEventRecorder, SuspiciousActivityDetector},
};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::config::RateLimits;

/// Backing store, kept for health checks
#[derive(Clone)]
pub enum Storage {
    Postgres(Database),
    Memory,
}

impl Storage {
    pub fn name(&self) -> &'static str {
        match self {
            Storage::Postgres(_) => "postgres",
            Storage::Memory => "memory",
        }
    }

    pub async fn is_healthy(&self) -> bool {
        match self {
            Storage::Postgres(db) => db.health_check().await.is_ok(),
            Storage::Memory => true,
        }
    }
}

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request (cheap due to Arc wrappers).
#[derive(Clone)]
pub struct AppState {
    pub auth_manager: Arc<AuthManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub ip_blocklist: Arc<IpBlocklist>,
    pub detector: Arc<SuspiciousActivityDetector>,
    pub storage: Storage,
    pub rate_limits: RateLimits,
    pub ip_block_duration: chrono::Duration,
}

impl AppState {
    /// Wire the authentication core and security components over `stores`.
    ///
    /// Uses the default rate limits and a 30 minute IP block.
    pub fn new(
        stores: Stores,
        storage: Storage,
        mailer: Arc<dyn Mailer>,
        clock: SharedClock,
        auth_config: AuthConfig,
    ) -> Self {
        let events = SecurityEventRecorder::new(stores.activity.clone(), clock.clone());

        Self {
            rate_limiter: Arc::new(RateLimiter::new(clock.clone())),
            ip_blocklist: Arc::new(IpBlocklist::new(clock.clone()).with_events(events)),
            detector: Arc::new(SuspiciousActivityDetector::new(
                stores.activity.clone(),
                clock.clone(),
            )),
            auth_manager: Arc::new(AuthManager::new(stores, mailer, clock, auth_config)),
            storage,
            rate_limits: RateLimits::default(),
            ip_block_duration: chrono::Duration::minutes(30),
        }
    }

    pub fn with_rate_limits(mut self, rate_limits: RateLimits) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    pub fn with_ip_block_duration(mut self, duration: chrono::Duration) -> Self {
        self.ip_block_duration = duration;
        self
    }
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Example
///
/// ```rust,no_run
/// # use acervo_server::api::{create_router, AppState};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let state: AppState = unimplemented!();
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1_routes)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(request_id::request_id_middleware))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn create_v1_router(state: AppState) -> Router<AppState> {
    // Public routes (no authentication middleware)
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh_token))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/validate", get(auth::validate));

    // Protected routes (require authentication middleware)
    let protected_routes = Router::new()
        .route("/auth/change-password", post(auth::change_password))
        .route("/auth/me", get(auth::me))
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth_middleware,
        ));

    Router::new().merge(public_routes).merge(protected_routes)
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when storage answers, `503 Service Unavailable` otherwise.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","storage":{"backend":"postgres","healthy":true},...}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage_healthy = state.storage.is_healthy().await;

    let status_code = if storage_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if storage_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": {
            "backend": state.storage.name(),
            "healthy": storage_healthy,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
