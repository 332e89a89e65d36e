//! Provider registry - the static analyst roster
//!
//! Loaded once at process start and never mutated afterwards. Overrides from
//! the environment are folded in before the registry is frozen.

use crate::dialect::WireDialect;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::{info, warn};

/// Env var selecting the enabled subset (comma separated ids)
pub const SELECTED_MODELS_VAR: &str = "CONSENSUS_AI_MODELS";

/// Accepted per-provider call timeouts, in milliseconds
pub const TIMEOUT_RANGE_MS: RangeInclusive<u64> = 1_000..=300_000;

/// Static configuration of one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique key
    pub id: String,
    /// Display name
    pub name: String,
    /// Role label shown next to the opinion
    pub role: String,
    /// What the analyst focuses on, rendered into the prompt
    pub role_description: String,
    /// Request/response shape
    pub dialect: WireDialect,
    /// API base URL, without trailing slash
    pub base_url: String,
    /// Model name sent to the provider
    pub model: String,
    /// Name of the credential holding the API key
    pub credential: String,
    /// Whether the provider takes part in orchestration
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Call deadline for this provider; the engine-wide timeout applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    /// Create an enabled provider
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        dialect: WireDialect,
        base_url: impl Into<String>,
        model: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: String::new(),
            role_description: String::new(),
            dialect,
            base_url: base_url.into(),
            model: model.into(),
            credential: credential.into(),
            enabled: true,
            timeout_ms: None,
        }
    }

    /// Set role label and description
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>, description: impl Into<String>) -> Self {
        self.role = role.into();
        self.role_description = description.into();
        self
    }

    /// Set the enabled flag
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the call deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Call deadline, when the provider sets its own
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    fn env_prefix(&self) -> String {
        format!("MODEL_{}_", self.id.to_ascii_uppercase().replace('-', "_"))
    }
}

/// The five-analyst council used when configuration names no providers
#[must_use]
pub fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new(
            "deepseek",
            "DeepSeek",
            WireDialect::OpenAi,
            "https://api.deepseek.com/v1",
            "deepseek-chat",
            "DEEPSEEK_API_KEY",
        )
        .with_role(
            "Momentum Hunter",
            "Technical analysis expert focusing on price momentum, trend signals, and chart patterns",
        ),
        ProviderConfig::new(
            "kimi",
            "Kimi",
            WireDialect::OpenAi,
            "https://api.kimi.com/coding/v1",
            "kimi",
            "KIMI_API_KEY",
        )
        .with_role(
            "Whale Watcher",
            "Tracks large holder movements, accumulation/distribution patterns, and smart money flows",
        ),
        ProviderConfig::new(
            "minimax",
            "MiniMax",
            WireDialect::OpenAi,
            "https://api.minimax.io/v1",
            "MiniMax-M2",
            "MINIMAX_API_KEY",
        )
        .with_role(
            "Sentiment Scout",
            "Analyzes social sentiment, news trends, fear/greed indicators, and market psychology",
        ),
        ProviderConfig::new(
            "glm",
            "GLM",
            WireDialect::Anthropic,
            "https://api.z.ai/api/anthropic/v1",
            "glm-4.6",
            "GLM_API_KEY",
        )
        .with_role(
            "On-Chain Oracle",
            "Monitors on-chain metrics, TVL changes, protocol activity, and network fundamentals",
        ),
        ProviderConfig::new(
            "gemini",
            "Gemini",
            WireDialect::Google,
            "https://generativelanguage.googleapis.com/v1beta",
            "gemini-2.0-flash",
            "GEMINI_API_KEY",
        )
        .with_role(
            "Risk Manager",
            "Assesses portfolio risk, recommends position sizing, sets stop-loss levels, and evaluates risk/reward",
        ),
    ]
}

/// Immutable provider roster
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<ProviderConfig>,
}

impl ProviderRegistry {
    /// Build a registry, rejecting empty rosters and duplicate ids
    pub fn new(providers: Vec<ProviderConfig>) -> Result<Self> {
        if providers.is_empty() {
            return Err(Error::NotConfigured("no providers configured".to_string()));
        }

        let mut seen = HashSet::new();
        for provider in &providers {
            if provider.id.trim().is_empty() {
                return Err(Error::NotConfigured("provider with empty id".to_string()));
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(Error::NotConfigured(format!(
                    "duplicate provider id: {}",
                    provider.id
                )));
            }
            if let Some(ms) = provider.timeout_ms.filter(|ms| !TIMEOUT_RANGE_MS.contains(ms)) {
                return Err(Error::NotConfigured(format!(
                    "provider {} timeout {ms}ms outside {}..={}ms",
                    provider.id,
                    TIMEOUT_RANGE_MS.start(),
                    TIMEOUT_RANGE_MS.end()
                )));
            }
        }

        Ok(Self { providers })
    }

    /// Build a registry after applying overrides read through `lookup`
    ///
    /// Recognized keys:
    /// - `MODEL_<ID>_MODEL`
    /// - `MODEL_<ID>_BASE_URL` (or `MODEL_<ID>_BASEURL`)
    /// - `MODEL_<ID>_TIMEOUT`: milliseconds, ignored outside [`TIMEOUT_RANGE_MS`]
    /// - `CONSENSUS_AI_MODELS`: comma separated ids; every other provider is disabled
    pub fn with_overrides<F>(mut providers: Vec<ProviderConfig>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let setting = |key: String| lookup(&key).filter(|v| !v.trim().is_empty());

        for provider in &mut providers {
            let prefix = provider.env_prefix();
            if let Some(model) = setting(format!("{prefix}MODEL")) {
                provider.model = model.trim().to_string();
            }
            if let Some(url) = setting(format!("{prefix}BASE_URL"))
                .or_else(|| setting(format!("{prefix}BASEURL")))
            {
                provider.base_url = url.trim().trim_end_matches('/').to_string();
            }
            if let Some(raw) = setting(format!("{prefix}TIMEOUT")) {
                match raw.trim().parse::<u64>() {
                    Ok(ms) if TIMEOUT_RANGE_MS.contains(&ms) => provider.timeout_ms = Some(ms),
                    _ => warn!(
                        provider = %provider.id,
                        value = %raw,
                        "Ignoring {}TIMEOUT outside {}..={}ms",
                        prefix,
                        TIMEOUT_RANGE_MS.start(),
                        TIMEOUT_RANGE_MS.end()
                    ),
                }
            }
        }

        if let Some(selection) = lookup(SELECTED_MODELS_VAR) {
            let selected: Vec<String> = selection
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect();

            if !selected.is_empty() {
                for id in &selected {
                    if !providers.iter().any(|p| p.id.eq_ignore_ascii_case(id)) {
                        warn!(provider = %id, "Unknown provider in {}", SELECTED_MODELS_VAR);
                    }
                }
                for provider in &mut providers {
                    provider.enabled = selected.iter().any(|id| provider.id.eq_ignore_ascii_case(id));
                }
            }
        }

        let registry = Self::new(providers)?;
        info!(
            enabled = ?registry.enabled().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            "Provider registry loaded"
        );
        Ok(registry)
    }

    /// Build from the process environment
    pub fn from_env(providers: Vec<ProviderConfig>) -> Result<Self> {
        Self::with_overrides(providers, |key| std::env::var(key).ok())
    }

    /// All providers in registration order
    #[must_use]
    pub fn all(&self) -> &[ProviderConfig] {
        &self.providers
    }

    /// Enabled providers in registration order
    pub fn enabled(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }

    /// Number of enabled providers
    #[must_use]
    pub fn enabled_count(&self) -> usize {
        self.enabled().count()
    }

    /// Look up a provider by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Number of providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty (never true for a constructed registry)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_roster() {
        let providers = default_providers();
        assert_eq!(providers.len(), 5);
        assert!(providers.iter().all(|p| p.enabled));
        assert_eq!(
            providers.iter().filter(|p| p.dialect == WireDialect::OpenAi).count(),
            3
        );
        assert!(providers.iter().all(|p| !p.role_description.is_empty()));
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        assert!(ProviderRegistry::new(vec![]).is_err());

        let mut providers = default_providers();
        providers.push(providers[0].clone());
        assert!(matches!(
            ProviderRegistry::new(providers),
            Err(Error::NotConfigured(msg)) if msg.contains("deepseek")
        ));
    }

    #[test]
    fn test_model_and_url_overrides() {
        let registry = ProviderRegistry::with_overrides(
            default_providers(),
            lookup(&[
                ("MODEL_DEEPSEEK_MODEL", "deepseek-reasoner"),
                ("MODEL_GLM_BASE_URL", "https://proxy.local/anthropic/"),
                ("MODEL_GEMINI_BASEURL", "https://proxy.local/google"),
                ("MODEL_KIMI_MODEL", "   "),
            ]),
        )
        .unwrap();

        assert_eq!(registry.get("deepseek").unwrap().model, "deepseek-reasoner");
        assert_eq!(
            registry.get("glm").unwrap().base_url,
            "https://proxy.local/anthropic"
        );
        assert_eq!(registry.get("gemini").unwrap().base_url, "https://proxy.local/google");
        assert_eq!(registry.get("kimi").unwrap().model, "kimi");
    }

    #[test]
    fn test_timeout_override_within_bounds() {
        let registry = ProviderRegistry::with_overrides(
            default_providers(),
            lookup(&[
                ("MODEL_DEEPSEEK_TIMEOUT", "45000"),
                ("MODEL_KIMI_TIMEOUT", "1000"),
                ("MODEL_MINIMAX_TIMEOUT", "300000"),
            ]),
        )
        .unwrap();

        assert_eq!(
            registry.get("deepseek").unwrap().timeout(),
            Some(Duration::from_secs(45))
        );
        assert_eq!(registry.get("kimi").unwrap().timeout_ms, Some(1_000));
        assert_eq!(registry.get("minimax").unwrap().timeout_ms, Some(300_000));
        assert_eq!(registry.get("glm").unwrap().timeout(), None);
    }

    #[test]
    fn test_timeout_override_out_of_bounds_is_ignored() {
        let registry = ProviderRegistry::with_overrides(
            default_providers(),
            lookup(&[
                ("MODEL_DEEPSEEK_TIMEOUT", "999"),
                ("MODEL_KIMI_TIMEOUT", "300001"),
                ("MODEL_MINIMAX_TIMEOUT", "soon"),
                ("MODEL_GLM_TIMEOUT", "-5"),
            ]),
        )
        .unwrap();

        assert!(registry.all().iter().all(|p| p.timeout_ms.is_none()));
    }

    #[test]
    fn test_configured_timeout_out_of_bounds_is_rejected() {
        let mut providers = default_providers();
        providers[4] = providers[4].clone().with_timeout(Duration::from_millis(500));
        assert!(matches!(
            ProviderRegistry::new(providers),
            Err(Error::NotConfigured(msg)) if msg.contains("gemini") && msg.contains("500ms")
        ));

        let mut providers = default_providers();
        providers[0] = providers[0].clone().with_timeout(Duration::from_secs(60));
        assert!(ProviderRegistry::new(providers).is_ok());
    }

    #[test]
    fn test_enabled_selection() {
        let registry = ProviderRegistry::with_overrides(
            default_providers(),
            lookup(&[(SELECTED_MODELS_VAR, "Gemini, glm,unknown")]),
        )
        .unwrap();

        let enabled: Vec<&str> = registry.enabled().map(|p| p.id.as_str()).collect();
        assert_eq!(enabled, vec!["glm", "gemini"]);
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.enabled_count(), 2);
    }

    #[test]
    fn test_blank_selection_keeps_all() {
        let registry = ProviderRegistry::with_overrides(
            default_providers(),
            lookup(&[(SELECTED_MODELS_VAR, " , ")]),
        )
        .unwrap();
        assert_eq!(registry.enabled_count(), 5);
    }

    #[test]
    fn test_deserialize_from_toml_like_json() {
        let json = r#"{
            "id": "local",
            "name": "Local",
            "role": "Tester",
            "role_description": "Answers quickly",
            "dialect": "openai",
            "base_url": "http://localhost:8080/v1",
            "model": "tiny",
            "credential": "LOCAL_KEY"
        }"#;
        let provider: ProviderConfig = serde_json::from_str(json).unwrap();
        assert!(provider.enabled);
        assert_eq!(provider.timeout_ms, None);
        assert_eq!(provider.dialect, WireDialect::OpenAi);
    }
}
