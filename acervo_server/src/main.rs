//! Acervo authentication server.
//!
//! Serves the HTTP API over PostgreSQL (or in-memory storage for local runs)
//! and prunes expired credentials in the background.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use acervo::{
    clock::SystemClock,
    db::{Database, MemoryStore, Stores},
    mailer::LogMailer,
};
use acervo_server::{
    api::{self, AppState, Storage},
    cleanup,
    config::{ServerConfig, StorageBackend},
    logging,
};
use anyhow::{Context, Error};
use pico_args::Arguments;
use tracing::info;

const HELP: &str = "\
Run the Acervo authentication server

USAGE:
  acervo_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL or postgres://postgres@localhost/acervo]

FLAGS:
  --memory                 Keep all state in memory (lost on exit)
  -h, --help               Print help information

ENVIRONMENT:
  JWT_SECRET               JWT signing secret (required, 32+ chars)
  PASSWORD_PEPPER          Password hashing pepper (required, 16+ chars)
  STORAGE_BACKEND          postgres | memory
  RESET_URL_BASE           Password reset page URL
  ALLOWED_EMAIL_DOMAINS    Comma-separated registration allow-list
  RUST_LOG                 Log filter [default: info,sqlx=warn,hyper=warn]
  (See .env file for all configuration options)
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        memory: pargs.contains("--memory"),
    };

    logging::init();

    let config = ServerConfig::from_env(args.bind, args.database_url, args.memory)?;
    info!("Starting Acervo authentication server at {}", config.bind);

    let (stores, storage) = match config.storage {
        StorageBackend::Postgres => {
            info!("Connecting to database");
            let db = Database::new(&config.database)
                .await
                .context("Failed to connect to database")?;
            db.migrate().await.context("Failed to apply schema")?;
            info!("Database connected successfully");
            (db.stores(), Storage::Postgres(db))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; all accounts are lost on exit");
            (Stores::in_memory(MemoryStore::shared()), Storage::Memory)
        }
    };

    let state = AppState::new(
        stores,
        storage.clone(),
        Arc::new(LogMailer::new(config.reset_url_base.clone())),
        Arc::new(SystemClock),
        config.auth_config(),
    )
    .with_rate_limits(config.rate_limits.clone())
    .with_ip_block_duration(config.ip_block_duration());

    let cleanup_task = cleanup::spawn(
        state.clone(),
        Duration::from_secs(config.cleanup_interval_secs),
    );

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Shutting down server...");
    cleanup_task.abort();

    if let Storage::Postgres(db) = storage {
        db.close().await;
    }

    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
}
