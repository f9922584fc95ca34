/*!
 * Clinic Bot Backend - Multi-tenant Appointment Scheduling
 *
 * Main application entry point for the Axum-based REST API server.
 *
 * Serves the clinic staff web UI; patient traffic arrives through the
 * LIFF surface, which authenticates against the same token layer.
 */

// Module declarations
mod config;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod utils;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use handlers::AppState;
use middleware::cors::cors_from_env;
use routes::create_clinic_routes;
use services::{spawn_outbound_worker, spawn_reveal_scheduler, LinePushClient};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    timestamp: String,
    database: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Clinic Bot Backend API Server...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");
    tracing::info!("Environment: {}", config.server.environment);

    // Create database connection pool
    let pool = config.database.connect().await?;
    tracing::info!("Database connection pool created successfully");

    // Run pending migrations
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    // Start the outbound notification worker; handlers enqueue after
    // their transactions commit.
    let outbound = spawn_outbound_worker(LinePushClient::new());

    // Start the auto-assignment reveal scheduler.
    spawn_reveal_scheduler(pool.clone(), outbound.clone());

    // Record server start time
    let start_time = std::time::SystemTime::now();

    // Create application state
    let app_state = AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        outbound,
    };

    // Build application router
    let app = create_app(app_state, start_time);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("Invalid server address");
    tracing::info!("HTTP server listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the Axum application router
fn create_app(state: AppState, start_time: std::time::SystemTime) -> Router {
    let pool_for_health = state.pool.clone();

    Router::new()
        .route(
            "/health",
            get(move || health_handler(pool_for_health.clone(), start_time)),
        )
        .route("/", get(root_handler))
        .nest("/api/clinic", create_clinic_routes(state))
        .layer(cors_from_env())
        .layer(TraceLayer::new_for_http())
}

/// Root handler - API information
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Clinic Bot Backend API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "endpoints": {
            "health": "/health",
            "api": "/api/clinic"
        }
    }))
}

/// Health check handler
async fn health_handler(
    pool: sqlx::PgPool,
    start_time: std::time::SystemTime,
) -> impl IntoResponse {
    let uptime = start_time.elapsed().unwrap_or_default().as_secs();

    let db_status = match sqlx::query("SELECT 1").execute(&pool).await {
        Ok(_) => "connected",
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            "disconnected"
        }
    };

    let response = HealthResponse {
        status: if db_status == "connected" {
            "healthy"
        } else {
            "unhealthy"
        }
        .to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        timestamp: chrono::Utc::now().to_rfc3339(),
        database: db_status.to_string(),
    };

    let status_code = if db_status == "connected" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}
