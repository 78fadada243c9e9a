//! REST API for operators and the HTTP telemetry bridge
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check (storage included)
//! - `GET /api/v1/stats` - Ingestion, drop and notification counters
//! - `GET /api/v1/thresholds` - Effective alert thresholds
//! - `GET /api/v1/machines` - Registered machines with their snapshot
//! - `GET /api/v1/machines/:id` - One machine
//! - `GET /api/v1/machines/:id/alerts` - Alerts of a machine
//! - `GET /api/v1/machines/:id/usage` - Recent brews of a machine
//! - `POST /api/v1/machines/:id/alerts/:type/resolve` - Resolve open alerts of a type
//! - `GET /api/v1/alerts` - Alert history with filters
//! - `GET /api/v1/alerts/summary` - Open alert statistics
//! - `GET /api/v1/alerts/:id` - One alert
//! - `POST /api/v1/alerts/:id/resolve` - Resolve one alert
//! - `POST /api/v1/telemetry` - Submit a `{topic, payload}` message

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, post},
};
#[cfg(feature = "api")]
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tracing::info;

#[cfg(feature = "api")]
use crate::config::ApiSettings;

/// Build the router with all routes
#[cfg(feature = "api")]
pub fn router(state: ApiState) -> Router {
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .route("/api/v1/thresholds", get(routes::stats::get_thresholds))
        .route("/api/v1/machines", get(routes::machines::list_machines))
        .route("/api/v1/machines/:id", get(routes::machines::get_machine))
        .route(
            "/api/v1/machines/:id/alerts",
            get(routes::machines::get_machine_alerts),
        )
        .route(
            "/api/v1/machines/:id/usage",
            get(routes::machines::get_machine_usage),
        )
        .route(
            "/api/v1/machines/:id/alerts/:type/resolve",
            post(routes::machines::resolve_machine_alerts),
        )
        .route("/api/v1/alerts", get(routes::alerts::list_alerts))
        .route("/api/v1/alerts/summary", get(routes::alerts::get_alert_stats))
        .route("/api/v1/alerts/:id", get(routes::alerts::get_alert))
        .route(
            "/api/v1/alerts/:id/resolve",
            post(routes::alerts::resolve_alert),
        )
        .route(
            "/api/v1/telemetry",
            post(routes::telemetry::ingest_telemetry),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(settings: &ApiSettings, state: ApiState) -> anyhow::Result<SocketAddr> {
    use anyhow::Context;
    use tower_http::cors::{Any, CorsLayer};

    let bind_addr = settings.bind_addr();
    info!("starting API server on {bind_addr}");

    let mut app = router(state);

    if settings.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind API server to {bind_addr}"))?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
