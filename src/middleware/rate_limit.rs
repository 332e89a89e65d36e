//! Rate limiting glue for Axum
//!
//! The limiter itself lives in council-core and is consulted by the engine
//! when a run begins. This module supplies the caller key it is keyed on and
//! renders a refusal as a 429 response.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use council_core::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::convert::Infallible;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

// ============================================================================
// Config
// ============================================================================

/// Rate limit configuration (deserializable from TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Consensus requests allowed per caller per window
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// How often expired windows are swept
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_limit() -> u32 {
    5
}
fn default_window_secs() -> u64 {
    60
}
fn default_cleanup_interval_secs() -> u64 {
    300
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: default_limit(),
            window_secs: default_window_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl RateLimitSettings {
    /// Limiter settings, or `None` when limiting is disabled
    #[must_use]
    pub fn to_config(&self) -> Option<RateLimitConfig> {
        self.enabled
            .then(|| RateLimitConfig::new(self.limit, Duration::from_secs(self.window_secs)))
    }

    /// Sweep interval, never shorter than one second
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

// ============================================================================
// Caller key
// ============================================================================

/// Identity a request is rate limited under.
///
/// Resolution order: first `X-Forwarded-For` entry, `X-Real-IP`, the peer
/// address, then a fingerprint of `User-Agent` and `Accept-Language`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerKey(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CallerKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(extract_caller_key(&parts.headers, peer)))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn extract_caller_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(ip) = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return format!("ip:{ip}");
    }

    if let Some(ip) = header_str(headers, "x-real-ip") {
        return format!("ip:{ip}");
    }

    if let Some(addr) = peer {
        return format!("ip:{}", addr.ip());
    }

    let mut hasher = DefaultHasher::new();
    header_str(headers, "user-agent").unwrap_or_default().hash(&mut hasher);
    header_str(headers, "accept-language")
        .unwrap_or_default()
        .hash(&mut hasher);
    format!("fp:{:016x}", hasher.finish())
}

// ============================================================================
// Rate Limit Error Response
// ============================================================================

#[derive(Debug, Serialize)]
struct RateLimitResponse {
    success: bool,
    error: String,
    code: String,
    retry_after_secs: u64,
}

/// 429 response with `Retry-After` and `X-RateLimit-*` headers
pub fn rate_limited_response(retry_after_secs: u64, limit: u32, reset_at: DateTime<Utc>) -> Response {
    warn!(retry_after_secs, limit, "Rate limit exceeded");

    let body = RateLimitResponse {
        success: false,
        error: "Rate limit exceeded. Please retry later.".to_string(),
        code: "RATE_LIMITED".to_string(),
        retry_after_secs,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert("retry-after", HeaderValue::from(retry_after_secs));
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset_at.timestamp()));
    response
}
