//! Utility modules for council-core
//!
//! Provides common utilities:
//! - circuit_breaker: Per-provider circuit breaking
//! - rate_limiter: Fixed-window request rate limiting
//! - clock: Time source abstraction

mod circuit_breaker;
mod clock;
mod rate_limiter;

pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    Permit,
};
pub use clock::{Clock, SystemClock};
pub use rate_limiter::{RateLimitConfig, RateLimitDecision, RateLimitUsage, RateLimiter};
