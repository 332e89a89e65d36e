//! Provider credentials
//!
//! API keys are looked up by the credential name stored in each provider's
//! configuration and handed out wrapped in [`SecureString`], which wipes its
//! memory on drop and never prints its contents.
//!
//! A credential may be backed by a pool of keys (`GEMINI_API_KEYS=a,b,c`
//! next to `GEMINI_API_KEY`). The active key moves on when a provider answers
//! with a rate limit.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Suffix of the env var holding a comma separated key pool
pub const POOL_SUFFIX: &str = "S";

/// A string that is wiped from memory when dropped
///
/// # Example
/// ```
/// use council_core::credentials::SecureString;
///
/// let secret = SecureString::new("api-key-12345");
/// assert_eq!(secret.expose(), "api-key-12345");
/// assert!(!format!("{:?}", secret).contains("api-key"));
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureString {
    inner: String,
}

impl SecureString {
    /// Wrap a secret
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self { inner: s.into() }
    }

    /// Temporarily expose the value. Do not store the returned reference.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.inner
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the secret is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureString([REDACTED, {} bytes])", self.inner.len())
    }
}

impl std::fmt::Display for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Looks up API keys by credential name
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Return the secret, or `None` when it is absent or blank
    async fn get(&self, name: &str) -> Option<SecureString>;

    /// Move past the current key of a pooled credential; no-op otherwise
    fn rotate(&self, _name: &str) {}
}

fn split_pool(raw: &str) -> Vec<SecureString> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(SecureString::new)
        .collect()
}

/// Credentials read from process environment variables
///
/// `<NAME>S` takes precedence over `<NAME>` when it holds at least one key.
#[derive(Debug, Default)]
pub struct EnvCredentials {
    cursors: Mutex<HashMap<String, usize>>,
}

impl EnvCredentials {
    /// Create a source with every pool at its first key
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn cursor(&self, name: &str) -> usize {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl CredentialSource for EnvCredentials {
    async fn get(&self, name: &str) -> Option<SecureString> {
        let pool = std::env::var(format!("{name}{POOL_SUFFIX}"))
            .map(|raw| split_pool(&raw))
            .unwrap_or_default();
        if !pool.is_empty() {
            return pool.get(self.cursor(name) % pool.len()).cloned();
        }

        std::env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(SecureString::new)
    }

    fn rotate(&self, name: &str) {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let cursor = cursors.entry(name.to_string()).or_default();
        *cursor = cursor.wrapping_add(1);
        info!(credential = %name, position = *cursor, "Rotated credential pool");
    }
}

/// Fixed set of keys cycled on rotation
#[derive(Debug, Default)]
struct KeyPool {
    keys: Vec<SecureString>,
    cursor: AtomicUsize,
}

impl KeyPool {
    fn current(&self) -> Option<&SecureString> {
        if self.keys.is_empty() {
            return None;
        }
        self.keys.get(self.cursor.load(Ordering::Relaxed) % self.keys.len())
    }
}

/// Fixed in-memory credentials
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    secrets: HashMap<String, Arc<KeyPool>>,
}

impl StaticCredentials {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret
    #[must_use]
    pub fn with(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_pool(name, [value])
    }

    /// Add a pool of secrets, handed out in order as the credential rotates
    #[must_use]
    pub fn with_pool<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let keys = values
            .into_iter()
            .map(SecureString::new)
            .filter(|s| !s.is_empty())
            .collect();
        self.secrets.insert(
            name.into(),
            Arc::new(KeyPool {
                keys,
                cursor: AtomicUsize::new(0),
            }),
        );
        self
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn get(&self, name: &str) -> Option<SecureString> {
        self.secrets.get(name).and_then(|pool| pool.current()).cloned()
    }

    fn rotate(&self, name: &str) {
        if let Some(pool) = self.secrets.get(name) {
            pool.cursor.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_string_redacted() {
        let secret = SecureString::new("sk-live-abcdef");
        assert_eq!(secret.expose(), "sk-live-abcdef");
        assert_eq!(secret.len(), 14);
        assert_eq!(format!("{secret}"), "[REDACTED]");
        assert!(!format!("{secret:?}").contains("abcdef"));
    }

    #[tokio::test]
    async fn test_static_credentials() {
        let creds = StaticCredentials::new()
            .with("DEEPSEEK_API_KEY", "sk-1")
            .with("EMPTY_KEY", "");

        assert_eq!(
            creds.get("DEEPSEEK_API_KEY").await.map(|s| s.expose().to_string()),
            Some("sk-1".to_string())
        );
        assert!(creds.get("EMPTY_KEY").await.is_none());
        assert!(creds.get("MISSING").await.is_none());
    }

    #[tokio::test]
    async fn test_env_credentials_blank_is_missing() {
        std::env::set_var("COUNCIL_TEST_BLANK_KEY", "   ");
        std::env::set_var("COUNCIL_TEST_SET_KEY", " value ");

        let creds = EnvCredentials::new();
        assert!(creds.get("COUNCIL_TEST_BLANK_KEY").await.is_none());
        assert_eq!(
            creds
                .get("COUNCIL_TEST_SET_KEY")
                .await
                .map(|s| s.expose().to_string()),
            Some("value".to_string())
        );
        assert!(creds.get("COUNCIL_TEST_UNSET_KEY").await.is_none());
    }

    #[tokio::test]
    async fn test_env_pool_rotates_and_wraps() {
        std::env::set_var("COUNCIL_TEST_POOL_KEY", "single");
        std::env::set_var("COUNCIL_TEST_POOL_KEYS", " first, ,second ");
        std::env::set_var("COUNCIL_TEST_FALLBACK_KEY", "only");
        std::env::set_var("COUNCIL_TEST_FALLBACK_KEYS", " , ");

        async fn current(creds: &EnvCredentials, name: &str) -> Option<String> {
            creds.get(name).await.map(|s| s.expose().to_string())
        }

        let creds = EnvCredentials::new();
        let pooled = "COUNCIL_TEST_POOL_KEY";
        assert_eq!(current(&creds, pooled).await.as_deref(), Some("first"));
        creds.rotate(pooled);
        assert_eq!(current(&creds, pooled).await.as_deref(), Some("second"));
        creds.rotate(pooled);
        assert_eq!(current(&creds, pooled).await.as_deref(), Some("first"));

        // An empty pool falls back to the single key
        creds.rotate("COUNCIL_TEST_FALLBACK_KEY");
        assert_eq!(
            current(&creds, "COUNCIL_TEST_FALLBACK_KEY").await.as_deref(),
            Some("only")
        );
    }

    #[tokio::test]
    async fn test_static_pool_rotation_is_shared_by_clones() {
        let creds = StaticCredentials::new()
            .with_pool("GEMINI_API_KEY", ["key-a", "", "key-b"])
            .with("GLM_API_KEY", "key-glm");
        let clone = creds.clone();

        assert_eq!(creds.get("GEMINI_API_KEY").await.unwrap().expose(), "key-a");
        clone.rotate("GEMINI_API_KEY");
        assert_eq!(creds.get("GEMINI_API_KEY").await.unwrap().expose(), "key-b");

        creds.rotate("GLM_API_KEY");
        assert_eq!(creds.get("GLM_API_KEY").await.unwrap().expose(), "key-glm");
        creds.rotate("MISSING");
    }
}
