//! Consensus calculation
//!
//! Reduces the per-provider results of one run into a single decision by
//! majority vote over the error-free results.

use chrono::{DateTime, Utc};
use council_llm::{Opinion, ProviderConfig, Signal};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Agreement needed for a reported consensus when none is configured
pub const DEFAULT_THRESHOLD: usize = 4;

/// Classified provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// No API key configured; the provider was never called
    MissingCredential,
    /// Breaker refused the call
    CircuitOpen,
    /// Call exceeded its deadline
    Timeout,
    /// Transport failure
    NetworkError,
    /// Provider answered with a non-success status
    ApiError,
    /// Answer could not be turned into an opinion
    ParseError,
    /// Provider task panicked
    InternalError,
}

impl ProviderErrorKind {
    /// Short human-readable description, used as the result's reasoning
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing credential",
            Self::CircuitOpen => "circuit open",
            Self::Timeout => "timeout",
            Self::NetworkError => "network error",
            Self::ApiError => "api error",
            Self::ParseError => "parse error",
            Self::InternalError => "internal error",
        }
    }
}

impl From<&council_llm::Error> for ProviderErrorKind {
    fn from(error: &council_llm::Error) -> Self {
        use council_llm::Error;
        match error {
            Error::Timeout(_) => Self::Timeout,
            Error::Network(_) => Self::NetworkError,
            Error::Api { .. } => Self::ApiError,
            Error::EmptyResponse | Error::Parse(_) => Self::ParseError,
            Error::NotConfigured(_) => Self::MissingCredential,
        }
    }
}

/// Error attached to a failed provider result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    /// Failure class
    pub kind: ProviderErrorKind,
    /// Detail, safe to show to clients
    pub message: String,
}

/// One provider's contribution to a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResult {
    /// Provider id
    pub provider_id: String,
    /// Display name
    pub name: String,
    /// Role label
    pub role: String,
    /// Recommended action (HOLD for errors)
    pub signal: Signal,
    /// Confidence in `[0, 100]` (0 for errors)
    pub confidence: u8,
    /// Rationale, or the error description
    pub reasoning: String,
    /// When the result was produced
    pub completed_at: DateTime<Utc>,
    /// Time spent on this provider
    pub latency_ms: u64,
    /// Present when the provider failed
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ProviderError>,
}

impl ProviderResult {
    /// Result carrying a parsed opinion
    #[must_use]
    pub fn success(
        provider: &ProviderConfig,
        opinion: Opinion,
        completed_at: DateTime<Utc>,
        latency_ms: u64,
    ) -> Self {
        Self {
            provider_id: provider.id.clone(),
            name: provider.name.clone(),
            role: provider.role.clone(),
            signal: opinion.signal,
            confidence: opinion.confidence.min(100),
            reasoning: opinion.reasoning,
            completed_at,
            latency_ms,
            error: None,
        }
    }

    /// Well-formed HOLD/0 result describing a failure
    #[must_use]
    pub fn failure(
        provider: &ProviderConfig,
        kind: ProviderErrorKind,
        message: impl Into<String>,
        completed_at: DateTime<Utc>,
        latency_ms: u64,
    ) -> Self {
        Self {
            provider_id: provider.id.clone(),
            name: provider.name.clone(),
            role: provider.role.clone(),
            signal: Signal::Hold,
            confidence: 0,
            reasoning: kind.description().to_string(),
            completed_at,
            latency_ms,
            error: Some(ProviderError {
                kind,
                message: message.into(),
            }),
        }
    }

    /// Whether this result takes part in the vote
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Votes per signal over valid results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCounts {
    /// BUY votes
    #[serde(rename = "BUY")]
    pub buy: usize,
    /// SELL votes
    #[serde(rename = "SELL")]
    pub sell: usize,
    /// HOLD votes
    #[serde(rename = "HOLD")]
    pub hold: usize,
}

impl VoteCounts {
    /// Votes for one signal
    #[must_use]
    pub fn get(&self, signal: Signal) -> usize {
        match signal {
            Signal::Buy => self.buy,
            Signal::Sell => self.sell,
            Signal::Hold => self.hold,
        }
    }

    fn add(&mut self, signal: Signal) {
        match signal {
            Signal::Buy => self.buy += 1,
            Signal::Sell => self.sell += 1,
            Signal::Hold => self.hold += 1,
        }
    }

    /// Highest tally
    #[must_use]
    pub fn max(&self) -> usize {
        self.buy.max(self.sell).max(self.hold)
    }

    /// Most voted signal, ties resolved BUY over SELL over HOLD
    #[must_use]
    pub fn leader(&self) -> Option<Signal> {
        let max = self.max();
        if max == 0 {
            return None;
        }
        Signal::ALL.into_iter().find(|s| self.get(*s) == max)
    }
}

/// Outcome of one consensus run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Run id
    pub id: Uuid,
    /// The user query
    pub query: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the last provider settled
    pub completed_at: DateTime<Utc>,
    /// Results in arrival order
    pub results: Vec<ProviderResult>,
    /// Reported decision, only when the threshold is met
    pub consensus: Option<Signal>,
    /// Leading signal regardless of threshold
    pub majority: Option<Signal>,
    /// Votes for the leading signal
    pub agreement_count: usize,
    /// All results, errors included
    pub total_responses: usize,
    /// Rounded mean confidence of valid results, 0 when none
    pub confidence_average: u8,
    /// Whether `agreement_count >= threshold`
    pub threshold_met: bool,
    /// Tally over valid results
    pub vote_counts: VoteCounts,
}

/// Reduce a run's results to a consensus.
///
/// Deterministic in everything except the generated run id.
#[must_use]
pub fn compute(
    query: &str,
    started_at: DateTime<Utc>,
    results: Vec<ProviderResult>,
    threshold: usize,
) -> ConsensusResult {
    let mut votes = VoteCounts::default();
    let mut confidence_sum: u64 = 0;
    let mut valid: u64 = 0;

    for result in results.iter().filter(|r| r.is_valid()) {
        votes.add(result.signal);
        confidence_sum += u64::from(result.confidence);
        valid += 1;
    }

    let confidence_average = if valid == 0 {
        0
    } else {
        (confidence_sum as f64 / valid as f64).round() as u8
    };

    let majority = votes.leader();
    let agreement_count = votes.max();
    let threshold_met = agreement_count >= threshold;

    let completed_at = results
        .iter()
        .map(|r| r.completed_at)
        .max()
        .unwrap_or(started_at)
        .max(started_at);

    ConsensusResult {
        id: Uuid::new_v4(),
        query: query.to_string(),
        started_at,
        completed_at,
        total_responses: results.len(),
        results,
        consensus: if threshold_met { majority } else { None },
        majority,
        agreement_count,
        confidence_average,
        threshold_met,
        vote_counts: votes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_llm::WireDialect;

    fn provider(id: &str) -> ProviderConfig {
        ProviderConfig::new(id, id.to_uppercase(), WireDialect::OpenAi, "http://x", "m", "K")
            .with_role("Analyst", "Analyzes")
    }

    fn vote(id: &str, signal: Signal, confidence: u8) -> ProviderResult {
        ProviderResult::success(
            &provider(id),
            Opinion {
                signal,
                confidence,
                reasoning: "because".into(),
            },
            Utc::now(),
            120,
        )
    }

    fn failed(id: &str) -> ProviderResult {
        ProviderResult::failure(&provider(id), ProviderErrorKind::Timeout, "timeout after 30000ms", Utc::now(), 30_000)
    }

    #[test]
    fn test_strong_buy_consensus() {
        let results = vec![
            vote("a", Signal::Buy, 80),
            vote("b", Signal::Buy, 70),
            vote("c", Signal::Buy, 90),
            vote("d", Signal::Buy, 60),
            failed("e"),
        ];
        let result = compute("Buy BTC?", Utc::now(), results, DEFAULT_THRESHOLD);

        assert_eq!(result.consensus, Some(Signal::Buy));
        assert_eq!(result.majority, Some(Signal::Buy));
        assert_eq!(result.agreement_count, 4);
        assert_eq!(result.total_responses, 5);
        assert_eq!(result.confidence_average, 75);
        assert!(result.threshold_met);
        assert_eq!(result.vote_counts, VoteCounts { buy: 4, sell: 0, hold: 0 });
    }

    #[test]
    fn test_split_vote_leans_buy_without_consensus() {
        let results = vec![
            vote("a", Signal::Sell, 60),
            vote("b", Signal::Buy, 60),
            vote("c", Signal::Hold, 60),
            vote("d", Signal::Sell, 60),
            vote("e", Signal::Buy, 60),
        ];
        let result = compute("q", Utc::now(), results, DEFAULT_THRESHOLD);

        assert_eq!(result.majority, Some(Signal::Buy));
        assert_eq!(result.agreement_count, 2);
        assert!(!result.threshold_met);
        assert_eq!(result.consensus, None);
    }

    #[test]
    fn test_tie_break_precedence() {
        let sell_hold = compute(
            "q",
            Utc::now(),
            vec![vote("a", Signal::Hold, 50), vote("b", Signal::Sell, 50)],
            4,
        );
        assert_eq!(sell_hold.majority, Some(Signal::Sell));

        let lone_hold = compute("q", Utc::now(), vec![vote("a", Signal::Hold, 50)], 1);
        assert_eq!(lone_hold.majority, Some(Signal::Hold));
        assert_eq!(lone_hold.consensus, Some(Signal::Hold));
    }

    #[test]
    fn test_three_way_tie_leans_buy_without_consensus() {
        let one_each = compute(
            "q",
            Utc::now(),
            vec![
                vote("a", Signal::Hold, 50),
                vote("b", Signal::Sell, 50),
                vote("c", Signal::Buy, 50),
            ],
            4,
        );
        assert_eq!(one_each.majority, Some(Signal::Buy));
        assert_eq!(one_each.agreement_count, 1);
        assert!(!one_each.threshold_met);
        assert_eq!(one_each.consensus, None);

        let two_each = compute(
            "q",
            Utc::now(),
            vec![
                vote("a", Signal::Sell, 60),
                vote("b", Signal::Hold, 60),
                vote("c", Signal::Buy, 60),
                vote("d", Signal::Hold, 60),
                vote("e", Signal::Sell, 60),
                vote("f", Signal::Buy, 60),
            ],
            4,
        );
        assert_eq!(two_each.majority, Some(Signal::Buy));
        assert_eq!(two_each.agreement_count, 2);
        assert_eq!(two_each.vote_counts, VoteCounts { buy: 2, sell: 2, hold: 2 });
        assert_eq!(two_each.consensus, None);
    }

    #[test]
    fn test_sell_hold_tie_beats_fewer_buys() {
        let result = compute(
            "q",
            Utc::now(),
            vec![
                vote("a", Signal::Buy, 90),
                vote("b", Signal::Hold, 40),
                vote("c", Signal::Sell, 40),
                vote("d", Signal::Hold, 40),
                vote("e", Signal::Sell, 40),
            ],
            4,
        );
        assert_eq!(result.majority, Some(Signal::Sell));
        assert_eq!(result.agreement_count, 2);
        assert_eq!(result.consensus, None);

        let lowered = compute(
            "q",
            Utc::now(),
            vec![
                vote("a", Signal::Hold, 40),
                vote("b", Signal::Sell, 40),
                vote("c", Signal::Hold, 40),
                vote("d", Signal::Sell, 40),
                vote("e", Signal::Buy, 90),
            ],
            2,
        );
        assert_eq!(lowered.consensus, Some(Signal::Sell));
    }

    #[test]
    fn test_all_errors() {
        let started = Utc::now();
        let result = compute("q", started, vec![failed("a"), failed("b")], 4);

        assert_eq!(result.majority, None);
        assert_eq!(result.consensus, None);
        assert_eq!(result.agreement_count, 0);
        assert_eq!(result.confidence_average, 0);
        assert_eq!(result.total_responses, 2);
        assert!(!result.threshold_met);
    }

    #[test]
    fn test_empty_results() {
        let started = Utc::now();
        let result = compute("q", started, vec![], 4);
        assert_eq!(result.total_responses, 0);
        assert_eq!(result.completed_at, started);
        assert_eq!(result.majority, None);
    }

    #[test]
    fn test_average_ignores_errors_and_rounds() {
        let results = vec![vote("a", Signal::Buy, 70), vote("b", Signal::Sell, 71), failed("c")];
        let result = compute("q", Utc::now(), results, 4);
        // (70 + 71) / 2 = 70.5 rounds half away from zero
        assert_eq!(result.confidence_average, 71);
    }

    #[test]
    fn test_zero_threshold_met_by_empty_run() {
        let result = compute("q", Utc::now(), vec![], 0);
        assert!(result.threshold_met);
        assert_eq!(result.consensus, None);
    }

    #[test]
    fn test_failure_result_shape() {
        let result = ProviderResult::failure(
            &provider("kimi"),
            ProviderErrorKind::MissingCredential,
            "KIMI_API_KEY is not set",
            Utc::now(),
            0,
        );
        assert_eq!(result.signal, Signal::Hold);
        assert_eq!(result.confidence, 0);
        assert_eq!(result.reasoning, "missing credential");
        assert!(!result.is_valid());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error"]["kind"], "missing_credential");
        assert_eq!(json["signal"], "HOLD");
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            ProviderErrorKind::from(&council_llm::Error::Timeout(30_000)),
            ProviderErrorKind::Timeout
        );
        assert_eq!(
            ProviderErrorKind::from(&council_llm::Error::Api {
                status: 429,
                message: "slow down".into()
            }),
            ProviderErrorKind::ApiError
        );
        assert_eq!(
            ProviderErrorKind::from(&council_llm::Error::EmptyResponse),
            ProviderErrorKind::ParseError
        );
    }

    #[test]
    fn test_vote_counts_serialize_uppercase() {
        let json = serde_json::to_value(VoteCounts { buy: 1, sell: 2, hold: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"BUY": 1, "SELL": 2, "HOLD": 3}));
    }
}
