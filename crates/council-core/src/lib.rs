//! Council Core - orchestration and consensus
//!
//! This crate turns one user query into a streamed consensus decision:
//! - Engine: concurrent fan-out to every enabled provider
//! - Consensus: majority vote over the valid results
//! - Stream: ordered, sequence-numbered delivery to one subscriber
//! - Health: circuit state and rolling call statistics per provider
//! - Utils: circuit breaker, rate limiter, clock
//! - Credentials: API key lookup with zeroizing storage

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consensus;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod health;
pub mod stream;
pub mod utils;

pub use consensus::{
    compute, ConsensusResult, ProviderError, ProviderErrorKind, ProviderResult, VoteCounts,
    DEFAULT_THRESHOLD,
};
pub use credentials::{CredentialSource, EnvCredentials, SecureString, StaticCredentials};
pub use engine::{EngineBuilder, EngineConfig, OrchestrationEngine};
pub use error::{validate_query, Error, Result};
pub use health::{HealthMonitor, HealthReport, OverallStatus, ProviderHealth};
pub use stream::{channel, ConsensusStream, SequencedEvent, StreamEvent, StreamPublisher};
pub use utils::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    Clock, Permit, RateLimitConfig, RateLimitDecision, RateLimiter, SystemClock,
};
