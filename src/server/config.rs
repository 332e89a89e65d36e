//! Server configuration types
//!
//! Every section has serde defaults so a partial file (or none at all) still
//! yields a runnable configuration.

use crate::middleware::rate_limit::RateLimitSettings;
use anyhow::{bail, Result};
use council_core::{CircuitBreakerConfig, EngineConfig};
use council_llm::{default_providers, CallSettings, ProviderConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub consensus: ConsensusSettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub health: HealthSettings,
    /// Provider roster; empty means the built-in five-analyst council
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Consensus and provider call settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSettings {
    /// Agreement needed for a reported consensus
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    /// Per-provider call deadline
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_threshold() -> usize {
    council_core::DEFAULT_THRESHOLD
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            call_timeout_secs: default_call_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    600
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Health read model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Outcomes kept per provider
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

fn default_window_size() -> usize {
    100
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
        }
    }
}

impl AppConfig {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.consensus.threshold == 0 {
            bail!("consensus.threshold must be at least 1");
        }
        if self.consensus.call_timeout_secs == 0 {
            bail!("consensus.call_timeout_secs must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.consensus.temperature) {
            bail!("consensus.temperature must be within 0.0..=2.0");
        }
        if self.circuit_breaker.failure_threshold == 0 {
            bail!("circuit_breaker.failure_threshold must be at least 1");
        }
        // A call admitted before the breaker opened must settle before it cools down
        let longest_call_ms = self
            .providers
            .iter()
            .filter_map(|p| p.timeout_ms)
            .fold(self.consensus.call_timeout_secs.saturating_mul(1000), u64::max);
        if self.circuit_breaker.cooldown_secs.saturating_mul(1000) <= longest_call_ms {
            bail!(
                "circuit_breaker.cooldown_secs ({}s) must exceed the longest call timeout ({}ms)",
                self.circuit_breaker.cooldown_secs,
                longest_call_ms
            );
        }
        if self.rate_limit.enabled && self.rate_limit.window_secs == 0 {
            bail!("rate_limit.window_secs must be at least 1");
        }
        if self.health.window_size == 0 {
            bail!("health.window_size must be at least 1");
        }
        Ok(())
    }

    /// Configured providers, or the built-in roster when none are listed
    #[must_use]
    pub fn provider_roster(&self) -> Vec<ProviderConfig> {
        if self.providers.is_empty() {
            default_providers()
        } else {
            self.providers.clone()
        }
    }

    /// Engine settings derived from the consensus and rate limit sections
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            threshold: self.consensus.threshold,
            call: CallSettings::default()
                .with_timeout(Duration::from_secs(self.consensus.call_timeout_secs))
                .with_max_tokens(self.consensus.max_tokens)
                .with_temperature(self.consensus.temperature),
            rate_limit: self.rate_limit.to_config(),
        }
    }

    /// Breaker settings
    #[must_use]
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(self.circuit_breaker.failure_threshold)
            .with_cooldown(Duration::from_secs(self.circuit_breaker.cooldown_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider_roster().len(), 5);

        let engine = config.engine_config();
        assert_eq!(engine.threshold, 4);
        assert_eq!(engine.call.timeout, Duration::from_secs(30));
        assert_eq!(engine.rate_limit.map(|r| r.limit), Some(5));

        let breaker = config.breaker_config();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.cooldown, Duration::from_secs(600));
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.consensus.threshold = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.consensus.temperature = 3.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.circuit_breaker.cooldown_secs = 30;
        assert!(config.validate().is_err());
        config.circuit_breaker.cooldown_secs = 31;
        assert!(config.validate().is_ok());

        let mut config = AppConfig::default();
        config.circuit_breaker.cooldown_secs = 120;
        config.providers = default_providers();
        config.providers[2].timeout_ms = Some(120_000);
        assert!(config.validate().is_err());
        config.providers[2].timeout_ms = Some(90_000);
        assert!(config.validate().is_ok());

        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        config.rate_limit.window_secs = 0;
        assert!(config.validate().is_ok());
        assert!(config.engine_config().rate_limit.is_none());
    }
}
