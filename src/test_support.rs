//! Shared fixtures for handler tests

use async_trait::async_trait;
use council_core::{OrchestrationEngine, StaticCredentials};
use council_llm::{default_providers, CallSettings, ProviderClient, ProviderConfig, ProviderRegistry};
use std::sync::Arc;

/// Every provider answers BUY
struct BullishClient;

#[async_trait]
impl ProviderClient for BullishClient {
    async fn call(
        &self,
        provider: &ProviderConfig,
        _api_key: &str,
        _prompt: &str,
        _settings: &CallSettings,
    ) -> council_llm::Result<String> {
        Ok(format!(
            r#"{{"signal":"BUY","confidence":80,"reasoning":"{} sees momentum"}}"#,
            provider.name
        ))
    }
}

/// Engine over the default roster with every credential present
pub(crate) fn test_engine() -> OrchestrationEngine {
    let providers = default_providers();
    let credentials = providers
        .iter()
        .fold(StaticCredentials::new(), |creds, p| {
            creds.with(p.credential.clone(), format!("key-{}", p.id))
        });
    let registry = ProviderRegistry::new(providers).unwrap();

    OrchestrationEngine::builder(
        Arc::new(registry),
        Arc::new(BullishClient),
        Arc::new(credentials),
    )
    .build()
}
