//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{delete, get, post},
};
use reelforge_core::config::GatewayConfig;
use reelforge_pipeline::ControlPlane;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub control: ControlPlane,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(control: ControlPlane) -> Self {
        Self {
            control,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any);
    // Restrict origins in production, e.g. REELFORGE_CORS_ORIGINS=https://ops.example.com
    let cors = match std::env::var("REELFORGE_CORS_ORIGINS") {
        Ok(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                .collect();
            cors.allow_origin(origins)
        }
        Err(_) => cors.allow_origin(Any),
    };

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/tasks", get(routes::list_tasks).post(routes::submit_task))
        .route("/api/tasks/{id}", get(routes::get_task))
        .route("/api/schedules", get(routes::list_schedules).post(routes::upsert_schedule))
        .route("/api/schedules/{id}", delete(routes::delete_schedule))
        .route("/api/channels", get(routes::list_channels).post(routes::register_channel))
        .route("/api/metrics", post(routes::record_metric))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server and serve until the process exits.
pub async fn start(config: &GatewayConfig, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
