//! REST and SSE API
//!
//! Provides:
//! - `/api/consensus/stream`: streamed consensus runs
//! - `/health`, `/api/health/providers`: liveness and provider health

pub mod consensus;
pub mod health;

pub use consensus::consensus_routes;
pub use health::health_routes;

use axum::Router;

/// All API routes; handlers expect the engine as an `Extension`
pub fn api_router() -> Router {
    Router::new()
        .merge(health_routes())
        .merge(consensus_routes())
}
