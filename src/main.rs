//! Access Control Server - Main Application Entry Point
//!
//! An HTTP server whose every request passes through one access control
//! layer before routing. The layer authenticates callers with either a
//! bearer token (JWT in a header or cookie) or a signed service query string
//! (API key + timestamp + HMAC `secret` header), rejects everything else with
//! a JSON error envelope, and writes one audit record per request.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (API keys and their owners)
//! - **Authentication**: JWT via jsonwebtoken, HMAC-SHA256 query signatures
//! - **Format**: JSON requests/responses
//!
//! # Startup Flow
//!
//! 1. Initialize logging
//! 2. Load configuration from environment variables
//! 3. Create database connection pool and run migrations
//! 4. Build the access control layer from the immutable configuration
//! 5. Build HTTP router with routes and middleware
//! 6. Start server on configured port

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    http::HeaderValue,
    middleware as axum_middleware,
    routing::get,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

use crate::{
    middleware::{
        access_control::AccessControl, audit::TracingAuditSink, trusted_hosts::TrustedHosts,
    },
    services::{clock::SystemClock, credentials::PgCredentialStore, token::TokenCodec},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!(debug = config.debug, "Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let gate = AccessControl::new(
        config.access_policy()?,
        TokenCodec::new(&config.jwt_secret, &config.jwt_algorithm)?,
        Arc::new(PgCredentialStore::new(pool.clone())),
        Arc::new(SystemClock),
        Arc::new(TracingAuditSink),
    );

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/users/me", get(handlers::users::me))
        .route("/api/services/whoami", get(handlers::services::whoami))
        // Handler panics become error envelopes the access control layer can audit
        .layer(CatchPanicLayer::custom(error::panic_response))
        // Every request, routed or not, passes through access control
        .layer(axum_middleware::from_fn_with_state(
            gate,
            middleware::access_control::access_control,
        ))
        .layer(cors_layer(&config.allowed_sites)?)
        // Unknown Host headers are refused before anything else runs
        .layer(axum_middleware::from_fn_with_state(
            TrustedHosts::new(config.trusted_hosts.clone()),
            middleware::trusted_hosts::trusted_hosts,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(pool);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Peer addresses feed the caller IP when no X-Forwarded-For is present
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// CORS for the configured sites; any origin when none are configured.
fn cors_layer(allowed_sites: &[String]) -> anyhow::Result<CorsLayer> {
    if allowed_sites.is_empty() {
        return Ok(CorsLayer::permissive());
    }

    let origins = allowed_sites
        .iter()
        .map(|site| site.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}
