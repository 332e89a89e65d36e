//! Middleware module for the Council HTTP server
//!
//! Provides:
//! - Caller identification for per-caller rate limiting
//! - The 429 response shape

pub mod rate_limit;
