//! Error types for council-core
//!
//! Request-level failures that reject a consensus run before any provider is
//! called. Per-provider failures never surface here; they become error
//! results inside the run.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Shortest accepted query, in characters
pub const MIN_QUERY_CHARS: usize = 5;

/// Longest accepted query, in characters
pub const MAX_QUERY_CHARS: usize = 500;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Caller exceeded its request budget
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited {
        /// Seconds until a request will be accepted again
        retry_after_secs: u64,
        /// Configured limit per window
        limit: u32,
        /// When the caller's window ends
        reset_at: DateTime<Utc>,
    },

    /// Query failed validation
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::RateLimited { .. } => "rate_limited",
            Error::InvalidQuery(_) => "invalid_query",
        }
    }

    /// Human-readable message for terminals and API bodies
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Error::RateLimited {
                retry_after_secs, ..
            } => format!("⏳ Too many requests. Please wait {retry_after_secs} seconds."),
            Error::InvalidQuery(msg) => format!("📝 {msg}"),
        }
    }
}

/// Validate a user query, returning the trimmed text
pub fn validate_query(query: &str) -> Result<&str> {
    let trimmed = query.trim();
    let chars = trimmed.chars().count();

    if chars < MIN_QUERY_CHARS {
        return Err(Error::InvalidQuery(format!(
            "Query must be at least {MIN_QUERY_CHARS} characters"
        )));
    }
    if chars > MAX_QUERY_CHARS {
        return Err(Error::InvalidQuery(format!(
            "Query must be at most {MAX_QUERY_CHARS} characters"
        )));
    }
    Ok(trimmed)
}
