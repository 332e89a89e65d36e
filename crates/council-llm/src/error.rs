//! Error types for council-llm

use thiserror::Error;

/// Provider call error
#[derive(Debug, Error)]
pub enum Error {
    /// Provider not configured
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// Provider answered with a non-success status
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Sanitized provider message
        message: String,
    },

    /// Transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Call exceeded its deadline
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Response body did not contain generated text
    #[error("empty response from provider")]
    EmptyResponse,

    /// Generated text could not be turned into an opinion
    #[error("parse error: {0}")]
    Parse(#[from] crate::parser::ParseError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
