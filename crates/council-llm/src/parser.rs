//! Response parser - turns free-form model output into an [`Opinion`]
//!
//! Models are asked for a bare JSON object but routinely wrap it in prose or
//! markdown fences. The parser scans for the first embedded JSON object and
//! validates it; malformed input is a typed [`ParseError`], never a panic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Confidence assumed when the model omits it or sends something non-numeric
pub const DEFAULT_CONFIDENCE: u8 = 50;

/// Reasoning used when the model omits it
pub const DEFAULT_REASONING: &str = "No reasoning provided";

/// Trading signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    /// Open or add to the position
    Buy,
    /// Exit or short
    Sell,
    /// Wait
    Hold,
}

impl Signal {
    /// All signals in tie-break precedence order
    pub const ALL: [Signal; 3] = [Signal::Buy, Signal::Sell, Signal::Hold];

    /// Returns the wire representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            "HOLD" => Ok(Self::Hold),
            _ => Err(ParseError::UnknownSignal(s.to_string())),
        }
    }
}

/// A validated opinion extracted from one provider's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opinion {
    /// Recommended action
    pub signal: Signal,
    /// Confidence in `[0, 100]`
    pub confidence: u8,
    /// Free-text rationale
    pub reasoning: String,
}

/// Why a response could not be turned into an [`Opinion`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// No JSON object anywhere in the text
    #[error("no JSON object found in response")]
    NoJsonObject,

    /// JSON object without a `signal` field
    #[error("missing required field: signal")]
    MissingSignal,

    /// `signal` present but not BUY/SELL/HOLD
    #[error("invalid signal value: {0:?}")]
    UnknownSignal(String),
}

/// Parse raw model text into an [`Opinion`]
pub fn parse_opinion(raw: &str) -> Result<Opinion, ParseError> {
    let object = first_json_object(raw).ok_or(ParseError::NoJsonObject)?;

    let signal = match object.get("signal") {
        None | Some(Value::Null) => return Err(ParseError::MissingSignal),
        Some(Value::String(s)) => s.parse::<Signal>()?,
        Some(other) => return Err(ParseError::UnknownSignal(other.to_string())),
    };

    Ok(Opinion {
        signal,
        confidence: confidence_from(object.get("confidence")),
        reasoning: reasoning_from(object.get("reasoning")),
    })
}

/// Find the first `{...}` in `raw` that deserializes as a JSON object.
///
/// Each candidate start is fed to a streaming deserializer, which stops at
/// the end of the first complete value and ignores whatever follows.
fn first_json_object(raw: &str) -> Option<Map<String, Value>> {
    raw.match_indices('{').find_map(|(idx, _)| {
        let mut values = serde_json::Deserializer::from_str(&raw[idx..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(Value::Object(map))) => Some(map),
            _ => None,
        }
    })
}

fn confidence_from(value: Option<&Value>) -> u8 {
    let number = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n.is_finite() => n.clamp(0.0, 100.0).round() as u8,
        _ => DEFAULT_CONFIDENCE,
    }
}

fn reasoning_from(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Null) | Some(Value::String(_)) | None => DEFAULT_REASONING.to_string(),
        Some(other) => other.to_string(),
    }
}
