//! Server initialization
//!
//! Contains the main `run()` function that wires the engine into the HTTP
//! server and drives it until a shutdown signal arrives.

use super::config::AppConfig;
use anyhow::{Context, Result};
use axum::{extract::Extension, routing::get, Router};
use council_core::{EnvCredentials, OrchestrationEngine};
use council_llm::{HttpProviderClient, ProviderRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Build the orchestration engine from configuration
pub fn build_engine(config: &AppConfig) -> Result<OrchestrationEngine> {
    let registry = ProviderRegistry::from_env(config.provider_roster())
        .context("Failed to build provider registry")?;
    info!(
        providers = registry.len(),
        enabled = registry.enabled_count(),
        "Provider registry initialized"
    );
    if registry.enabled_count() < config.consensus.threshold {
        warn!(
            enabled = registry.enabled_count(),
            threshold = config.consensus.threshold,
            "Fewer providers enabled than the consensus threshold; no run can reach consensus"
        );
    }

    let client = HttpProviderClient::new().context("Failed to create HTTP client")?;

    Ok(OrchestrationEngine::builder(
        Arc::new(registry),
        Arc::new(client),
        Arc::new(EnvCredentials::new()),
    )
    .config(config.engine_config())
    .breaker_config(config.breaker_config())
    .health_window(config.health.window_size)
    .build())
}

/// Router with every endpoint and shared layers
pub fn build_router(engine: OrchestrationEngine) -> Router {
    crate::api::api_router()
        .route("/", get(|| async { "Council consensus engine" }))
        .layer(Extension(engine))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Run the server
pub async fn run(config: AppConfig) -> Result<()> {
    info!(
        "Starting Council consensus engine v{}",
        env!("CARGO_PKG_VERSION")
    );

    let engine = build_engine(&config)?;

    let cancel = CancellationToken::new();
    let cleanup = if config.rate_limit.enabled {
        info!(
            "Rate limiting enabled: {} requests per {}s per caller",
            config.rate_limit.limit, config.rate_limit.window_secs
        );
        Some(
            engine
                .limiter()
                .spawn_cleanup(config.rate_limit.cleanup_interval(), cancel.clone()),
        )
    } else {
        info!("Rate limiting DISABLED");
        None
    };

    let app = build_router(engine);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_shutdown_signal())
    .await
    .context("HTTP server error")?;

    cancel.cancel();
    if let Some(handle) = cleanup {
        match tokio::time::timeout(Duration::from_secs(5), handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Rate limiter cleanup task error: {}", e),
            Err(_) => warn!("Rate limiter cleanup shutdown timeout"),
        }
    }

    info!("Council shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
///
/// A handler that cannot be installed is logged and that signal is ignored.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
