//! Provider client - one HTTP call per provider with a hard deadline

use crate::dialect::api_error;
use crate::error::{Error, Result};
use crate::registry::ProviderConfig;
use crate::util::redact_url_key;
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default per-call deadline
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Generation parameters shared by every dialect
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallSettings {
    /// Deadline for the whole call, connect to last body byte
    pub timeout: Duration,
    /// Output token cap
    pub max_tokens: u32,
    /// Sampling temperature (ignored by the Anthropic dialect)
    pub temperature: f32,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CALL_TIMEOUT,
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

impl CallSettings {
    /// Override the deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the token cap
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Override the temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Sends a prompt to one provider and returns the raw generated text
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Perform a single call.
    ///
    /// Errors: [`Error::Timeout`], [`Error::Network`], [`Error::Api`],
    /// [`Error::EmptyResponse`].
    async fn call(
        &self,
        provider: &ProviderConfig,
        api_key: &str,
        prompt: &str,
        settings: &CallSettings,
    ) -> Result<String>;
}

/// reqwest-backed client speaking all three dialects
#[derive(Debug, Clone, Default)]
pub struct HttpProviderClient {
    client: Client,
}

impl HttpProviderClient {
    /// Create a client with a fresh connection pool
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("council/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        provider: &ProviderConfig,
        api_key: &str,
        prompt: &str,
        settings: &CallSettings,
    ) -> Result<String> {
        let request = provider.dialect.build_request(
            &self.client,
            &provider.base_url,
            &provider.model,
            api_key,
            prompt,
            settings,
        );

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(redact_url_key(&e.without_url().to_string())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        provider.dialect.extract_text(&body)
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn call(
        &self,
        provider: &ProviderConfig,
        api_key: &str,
        prompt: &str,
        settings: &CallSettings,
    ) -> Result<String> {
        let started = Instant::now();
        debug!(
            provider = %provider.id,
            dialect = %provider.dialect,
            url = %redact_url_key(&provider.dialect.endpoint(&provider.base_url, &provider.model, api_key)),
            "Sending provider request"
        );

        // Dropping the send future on expiry aborts the in-flight request
        let result = match tokio::time::timeout(
            settings.timeout,
            self.send(provider, api_key, prompt, settings),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(settings.timeout.as_millis() as u64)),
        };

        debug!(
            provider = %provider.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Provider request finished"
        );
        result
    }
}
