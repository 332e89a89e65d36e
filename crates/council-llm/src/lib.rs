//! Council LLM - provider access for the consensus engine
//!
//! This crate covers everything between a provider's configuration and a
//! validated trading opinion:
//! - Registry: static provider roster, env overrides and selection
//! - Dialect: the three wire shapes (OpenAI, Anthropic, Google)
//! - Client: one HTTP call per provider with a hard timeout
//! - Parser: extraction of `{signal, confidence, reasoning}` from model text
//! - Prompt: the analyst prompt sent to every provider

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dialect;
pub mod error;
pub mod parser;
pub mod prompt;
pub mod registry;
pub mod util;

pub use client::{CallSettings, HttpProviderClient, ProviderClient};
pub use dialect::WireDialect;
pub use error::{Error, Result};
pub use parser::{parse_opinion, Opinion, ParseError, Signal};
pub use prompt::build_analyst_prompt;
pub use registry::{default_providers, ProviderConfig, ProviderRegistry};
