//! Provider roster listing

use crate::server::config::AppConfig;
use anyhow::{Context, Result};
use council_core::{CredentialSource, EnvCredentials};
use council_llm::{ProviderConfig, ProviderRegistry};

pub async fn run(config: &AppConfig) -> Result<()> {
    let registry = ProviderRegistry::from_env(config.provider_roster())
        .context("Failed to build provider registry")?;

    let credentials = EnvCredentials::new();
    println!("🏛️  Council providers\n");
    for provider in registry.all() {
        let has_key = credentials.get(&provider.credential).await.is_some();
        println!("{}", format_provider(provider, has_key));
    }

    let enabled = registry.enabled_count();
    println!();
    if enabled < config.consensus.threshold {
        println!(
            "⚠️  {} enabled, consensus needs {} in agreement",
            enabled, config.consensus.threshold
        );
    } else {
        println!(
            "✅ {} enabled, consensus needs {} in agreement",
            enabled, config.consensus.threshold
        );
    }
    Ok(())
}

fn format_provider(provider: &ProviderConfig, has_key: bool) -> String {
    let status = if !provider.enabled {
        "⏸️ "
    } else if has_key {
        "✅"
    } else {
        "❌"
    };
    let key = if has_key { "set" } else { "missing" };
    format!(
        "{status} {:<10} {:<10} {:<18} {:<9} {:<24} {} ({key})",
        provider.id, provider.name, provider.role, provider.dialect, provider.model,
        provider.credential
    )
}
