//! Wire dialects
//!
//! Every provider speaks one of three request/response shapes. A dialect only
//! decides the endpoint, the auth header, the request envelope and where the
//! generated text lives in the response; transport and timeouts are shared.

use crate::client::CallSettings;
use crate::error::{Error, Result};
use crate::util::sanitize_api_error;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Anthropic API version header value
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Request/response shape spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireDialect {
    /// `POST {base}/chat/completions` with a bearer token
    #[serde(rename = "openai")]
    OpenAi,
    /// `POST {base}/messages` with `x-api-key`
    #[serde(rename = "anthropic")]
    Anthropic,
    /// `POST {base}/models/{model}:generateContent?key=...`
    #[serde(rename = "google")]
    Google,
}

impl fmt::Display for WireDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        })
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleRequest<'a> {
    contents: Vec<GoogleContent<'a>>,
    generation_config: GoogleGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GoogleContent<'a> {
    parts: Vec<GooglePart<'a>>,
}

#[derive(Debug, Serialize)]
struct GooglePart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
}

#[derive(Debug, Deserialize)]
struct GoogleCandidate {
    #[serde(default)]
    content: Option<GoogleResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GoogleResponseContent {
    #[serde(default)]
    parts: Vec<GoogleResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GoogleResponsePart {
    #[serde(default)]
    text: Option<String>,
}

/// Error envelope; OpenAI, Anthropic and Google all nest a `message` under `error`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Structured { message: String },
    Plain(String),
}

// ============================================================================
// Dialect behavior
// ============================================================================

impl WireDialect {
    /// Full endpoint URL for one call
    ///
    /// For [`WireDialect::Google`] the key travels in the query string; never
    /// log the returned value without [`crate::util::redact_url_key`].
    #[must_use]
    pub fn endpoint(&self, base_url: &str, model: &str, api_key: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            Self::OpenAi => format!("{base}/chat/completions"),
            Self::Anthropic => format!("{base}/messages"),
            Self::Google => format!("{base}/models/{model}:generateContent?key={api_key}"),
        }
    }

    /// Build the outgoing request: endpoint, auth headers and JSON body
    pub fn build_request(
        &self,
        client: &Client,
        base_url: &str,
        model: &str,
        api_key: &str,
        prompt: &str,
        settings: &CallSettings,
    ) -> RequestBuilder {
        let url = self.endpoint(base_url, model, api_key);
        let messages = vec![ChatMessage {
            role: "user",
            content: prompt,
        }];

        match self {
            Self::OpenAi => client.post(url).bearer_auth(api_key).json(&OpenAiRequest {
                model,
                messages,
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
            }),
            Self::Anthropic => client
                .post(url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&AnthropicRequest {
                    model,
                    max_tokens: settings.max_tokens,
                    messages,
                }),
            Self::Google => client.post(url).json(&GoogleRequest {
                contents: vec![GoogleContent {
                    parts: vec![GooglePart { text: prompt }],
                }],
                generation_config: GoogleGenerationConfig {
                    temperature: settings.temperature,
                    max_output_tokens: settings.max_tokens,
                },
            }),
        }
    }

    /// Pull the generated text out of a successful response body
    ///
    /// A body that does not decode, or decodes without any text, is
    /// [`Error::EmptyResponse`].
    pub fn extract_text(&self, body: &str) -> Result<String> {
        let text = match self {
            Self::OpenAi => serde_json::from_str::<OpenAiResponse>(body)
                .ok()
                .and_then(|r| r.choices.into_iter().next())
                .and_then(|c| c.message.content),
            Self::Anthropic => serde_json::from_str::<AnthropicResponse>(body)
                .ok()
                .and_then(|r| {
                    // Some gateways put a thinking block first
                    r.content
                        .into_iter()
                        .find(|b| b.kind == "text" || (b.kind.is_empty() && b.text.is_some()))
                })
                .and_then(|b| b.text),
            Self::Google => serde_json::from_str::<GoogleResponse>(body)
                .ok()
                .and_then(|r| r.candidates.into_iter().next())
                .and_then(|c| c.content)
                .and_then(|c| c.parts.into_iter().next())
                .and_then(|p| p.text),
        };

        match text {
            Some(t) if !t.trim().is_empty() => Ok(t),
            _ => Err(Error::EmptyResponse),
        }
    }
}

/// Turn a non-success response into a sanitized [`Error::Api`]
pub(crate) fn api_error(status: u16, body: &str) -> Error {
    let message = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope {
            error: ErrorDetail::Structured { message } | ErrorDetail::Plain(message),
        }) => message,
        Err(_) => format!("HTTP {status}"),
    };

    Error::Api {
        status,
        message: sanitize_api_error(&message),
    }
}
