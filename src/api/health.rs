//! Health check endpoints
//!
//! Provides:
//! - `/health`: liveness and version (for load balancers)
//! - `/api/health/providers`: circuit state and call statistics per provider

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use council_core::{OrchestrationEngine, OverallStatus};
use serde::Serialize;

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Per-provider report; 503 once too few providers are callable to reach consensus
async fn provider_health(Extension(engine): Extension<OrchestrationEngine>) -> impl IntoResponse {
    let report = engine.health().report();
    let status = match report.status {
        OverallStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        OverallStatus::Healthy | OverallStatus::Degraded => StatusCode::OK,
    };
    (status, Json(report))
}

/// Health routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/health/providers", get(provider_health))
}
