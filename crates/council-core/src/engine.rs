//! Orchestration engine
//!
//! Fans one query out to every enabled provider, classifies each outcome,
//! streams results as they settle and finishes with the consensus.
//!
//! Per provider, in order:
//! 1. no credential: `missing_credential`, breaker and client untouched
//! 2. breaker refuses: `circuit_open`
//! 3. call + parse under the provider's timeout (or the global one); the
//!    outcome is reported with the breaker permit and feeds health
//!
//! A panic anywhere after the permit is taken still reports a failure, so a
//! half-open trial always resolves.

use crate::consensus::{compute, ConsensusResult, ProviderErrorKind, ProviderResult, DEFAULT_THRESHOLD};
use crate::credentials::{CredentialSource, SecureString};
use crate::error::{validate_query, Error, Result};
use crate::health::{HealthMonitor, DEFAULT_WINDOW_SIZE};
use crate::stream::{channel, ConsensusStream, ProviderSummary, StreamPublisher};
use crate::utils::{
    CircuitBreakerConfig, CircuitBreakerRegistry, Clock, Permit, RateLimitConfig, RateLimiter,
    SystemClock,
};
use council_llm::{
    build_analyst_prompt, parse_opinion, CallSettings, Opinion, ProviderClient, ProviderConfig,
    ProviderRegistry,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Agreement needed for a reported consensus
    pub threshold: usize,
    /// Per-call deadline and generation parameters
    pub call: CallSettings,
    /// Per-caller budget applied by [`OrchestrationEngine::begin`]; `None` disables it
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            call: CallSettings::default(),
            rate_limit: Some(RateLimitConfig::default()),
        }
    }
}

/// Builder for [`OrchestrationEngine`]
pub struct EngineBuilder {
    registry: Arc<ProviderRegistry>,
    client: Arc<dyn ProviderClient>,
    credentials: Arc<dyn CredentialSource>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    breaker_config: CircuitBreakerConfig,
    health_window: usize,
}

impl EngineBuilder {
    /// Override the clock
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override engine settings
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Override breaker settings
    #[must_use]
    pub fn breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Override the health window size
    #[must_use]
    pub fn health_window(mut self, size: usize) -> Self {
        self.health_window = size;
        self
    }

    /// Build the engine, creating one closed breaker per provider
    #[must_use]
    pub fn build(self) -> OrchestrationEngine {
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            self.registry.all().iter().map(|p| p.id.clone()),
            self.breaker_config,
            Arc::clone(&self.clock),
        ));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&breakers),
            Arc::clone(&self.clock),
            self.config.threshold,
            self.health_window,
        ));
        let limiter = Arc::new(RateLimiter::new(Arc::clone(&self.clock)));

        OrchestrationEngine {
            registry: self.registry,
            client: self.client,
            credentials: self.credentials,
            breakers,
            health,
            limiter,
            clock: self.clock,
            config: Arc::new(self.config),
        }
    }
}

/// Runs consensus requests; cheap to clone
#[derive(Clone)]
pub struct OrchestrationEngine {
    registry: Arc<ProviderRegistry>,
    client: Arc<dyn ProviderClient>,
    credentials: Arc<dyn CredentialSource>,
    breakers: Arc<CircuitBreakerRegistry>,
    health: Arc<HealthMonitor>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
}

impl std::fmt::Debug for OrchestrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationEngine")
            .field("providers", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OrchestrationEngine {
    /// Start building an engine
    pub fn builder(
        registry: Arc<ProviderRegistry>,
        client: Arc<dyn ProviderClient>,
        credentials: Arc<dyn CredentialSource>,
    ) -> EngineBuilder {
        EngineBuilder {
            registry,
            client,
            credentials,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
            breaker_config: CircuitBreakerConfig::default(),
            health_window: DEFAULT_WINDOW_SIZE,
        }
    }

    /// Provider roster
    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Circuit breakers, one per provider
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Health read model
    #[must_use]
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Per-caller rate limiter
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Engine settings
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Credential lookup
    #[must_use]
    pub fn credentials(&self) -> &Arc<dyn CredentialSource> {
        &self.credentials
    }

    /// Validate, rate-limit and launch a run for `caller_key`.
    ///
    /// The run is detached: dropping the returned stream stops delivery but
    /// never cancels provider calls, so breaker and health state are always
    /// updated.
    pub async fn begin(&self, caller_key: &str, query: &str) -> Result<ConsensusStream> {
        let query = validate_query(query)?.to_string();

        if let Some(limit) = &self.config.rate_limit {
            let decision = self.limiter.check(caller_key, limit).await;
            if !decision.allowed {
                let retry_after_secs = decision.retry_after_secs(self.clock.now());
                warn!(caller = %caller_key, retry_after_secs, "Consensus request rate limited");
                return Err(Error::RateLimited {
                    retry_after_secs,
                    limit: decision.limit,
                    reset_at: decision.reset_at,
                });
            }
        }

        let (publisher, stream) = channel();
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run(&query, publisher).await;
        });
        Ok(stream)
    }

    /// Query every enabled provider concurrently and compute the consensus.
    ///
    /// Each result is published as soon as it settles; the terminal event is
    /// published exactly once after all providers have settled.
    pub async fn run(&self, query: &str, mut publisher: StreamPublisher) -> ConsensusResult {
        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();
        let providers: Vec<ProviderConfig> = self.registry.enabled().cloned().collect();

        info!(%run_id, providers = providers.len(), "Consensus run started");
        publisher.start(
            run_id,
            query,
            started_at,
            providers.iter().map(ProviderSummary::from).collect(),
        );

        let mut tasks = JoinSet::new();
        for provider in providers {
            let engine = self.clone();
            let query = query.to_string();
            tasks.spawn(async move { engine.evaluate(&provider, &query).await });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    debug!(
                        %run_id,
                        provider = %result.provider_id,
                        signal = %result.signal,
                        error = ?result.error.as_ref().map(|e| e.kind),
                        "Provider settled"
                    );
                    publisher.emit(&result);
                    results.push(result);
                }
                // Tasks are never aborted and catch their own panics
                Err(e) => error!(%run_id, error = %e, "Provider task failed to join"),
            }
        }

        let consensus = ConsensusResult {
            id: run_id,
            ..compute(query, started_at, results, self.config.threshold)
        };

        info!(
            %run_id,
            consensus = ?consensus.consensus,
            majority = ?consensus.majority,
            agreement = consensus.agreement_count,
            total = consensus.total_responses,
            "Consensus run completed"
        );
        publisher.finish(&consensus);
        consensus
    }

    async fn evaluate(&self, provider: &ProviderConfig, query: &str) -> ProviderResult {
        let (api_key, permit) = match AssertUnwindSafe(self.admit(provider)).catch_unwind().await {
            Ok(Ok(admitted)) => admitted,
            Ok(Err(refused)) => return refused,
            Err(panic) => return self.internal_error(provider, panic.as_ref(), 0),
        };

        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.consult(provider, query, &api_key))
            .catch_unwind()
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(opinion)) => {
                self.record_outcome(&provider.id, permit, true, latency_ms);
                ProviderResult::success(provider, opinion, self.clock.now(), latency_ms)
            }
            Ok(Err(e)) => {
                let kind = ProviderErrorKind::from(&e);
                warn!(provider = %provider.id, ?kind, error = %e, latency_ms, "Provider call failed");
                if matches!(e, council_llm::Error::Api { status: 429, .. }) {
                    self.credentials.rotate(&provider.credential);
                }
                self.record_outcome(&provider.id, permit, false, latency_ms);
                ProviderResult::failure(provider, kind, e.to_string(), self.clock.now(), latency_ms)
            }
            Err(panic) => {
                self.record_outcome(&provider.id, permit, false, latency_ms);
                self.internal_error(provider, panic.as_ref(), latency_ms)
            }
        }
    }

    /// Credential first, then the breaker; a refusal is already the final result
    async fn admit(
        &self,
        provider: &ProviderConfig,
    ) -> std::result::Result<(SecureString, Permit), ProviderResult> {
        let Some(api_key) = self.credentials.get(&provider.credential).await else {
            debug!(provider = %provider.id, credential = %provider.credential, "Missing credential");
            return Err(ProviderResult::failure(
                provider,
                ProviderErrorKind::MissingCredential,
                format!("{} is not set", provider.credential),
                self.clock.now(),
                0,
            ));
        };

        let Some(permit) = self.breakers.allow(&provider.id) else {
            let message = match self.breakers.snapshot(&provider.id).and_then(|s| s.open_until) {
                Some(until) => format!("circuit open until {}", until.to_rfc3339()),
                None => "circuit open".to_string(),
            };
            return Err(ProviderResult::failure(
                provider,
                ProviderErrorKind::CircuitOpen,
                message,
                self.clock.now(),
                0,
            ));
        };

        Ok((api_key, permit))
    }

    /// Call and parse under the provider's own deadline, or the global one
    async fn consult(
        &self,
        provider: &ProviderConfig,
        query: &str,
        api_key: &SecureString,
    ) -> council_llm::Result<Opinion> {
        let timeout = provider.timeout().unwrap_or(self.config.call.timeout);
        let settings = self.config.call.with_timeout(timeout);
        let prompt = build_analyst_prompt(provider, query);

        match tokio::time::timeout(
            timeout,
            self.client
                .call(provider, api_key.expose(), &prompt, &settings),
        )
        .await
        {
            Ok(Ok(text)) => Ok(parse_opinion(&text)?),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(council_llm::Error::Timeout(timeout.as_millis() as u64)),
        }
    }

    fn internal_error(
        &self,
        provider: &ProviderConfig,
        panic: &(dyn std::any::Any + Send),
        latency_ms: u64,
    ) -> ProviderResult {
        let message = panic_message(panic);
        error!(provider = %provider.id, %message, "Provider task panicked");
        ProviderResult::failure(
            provider,
            ProviderErrorKind::InternalError,
            message,
            self.clock.now(),
            latency_ms,
        )
    }

    /// Post-call hook: the only writer of breaker outcomes and health stats
    fn record_outcome(&self, provider_id: &str, permit: Permit, success: bool, latency_ms: u64) {
        if success {
            self.breakers.record_success(provider_id, permit);
        } else {
            self.breakers.record_failure(provider_id, permit);
        }
        self.health.record(provider_id, success, latency_ms);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "provider task panicked".to_string()
    }
}
