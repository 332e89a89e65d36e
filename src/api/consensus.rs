//! Consensus streaming endpoint
//!
//! `GET /api/consensus/stream?query=...` answers with Server-Sent Events:
//! `start`, one `analyst` per provider in completion order, then `complete`.
//! The SSE id carries the event sequence number.

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use council_core::{Error as CoreError, OrchestrationEngine, SequencedEvent};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{error, info};

use crate::middleware::rate_limit::{rate_limited_response, CallerKey};

/// Query string of the stream endpoint
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    code: String,
}

/// Error rendering for the consensus API
#[derive(Debug)]
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::RateLimited {
                retry_after_secs,
                limit,
                reset_at,
            } => return rate_limited_response(*retry_after_secs, *limit, *reset_at),
            CoreError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        };

        let body = ErrorBody {
            success: false,
            error: self.0.user_message(),
            code: self.0.code().to_uppercase(),
        };
        (status, Json(body)).into_response()
    }
}

fn to_sse(event: SequencedEvent) -> Result<Event, Infallible> {
    let sse = Event::default()
        .id(event.seq.to_string())
        .event(event.event.name());
    Ok(match sse.json_data(&event) {
        Ok(sse) => sse,
        Err(e) => {
            error!(seq = event.seq, error = %e, "Failed to encode stream event");
            Event::default()
                .id(event.seq.to_string())
                .event("error")
                .data("event encoding failed")
        }
    })
}

/// Start a consensus run and stream it
async fn stream_consensus(
    Extension(engine): Extension<OrchestrationEngine>,
    CallerKey(caller): CallerKey,
    Query(params): Query<StreamParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.query.unwrap_or_default();
    let stream = engine.begin(&caller, &query).await?;
    info!(caller = %caller, "Consensus stream opened");

    Ok(Sse::new(stream.map(to_sse)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

/// Consensus routes
pub fn consensus_routes() -> Router {
    Router::new().route("/api/consensus/stream", get(stream_consensus))
}
