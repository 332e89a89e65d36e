//! Incremental delivery of a run to one subscriber
//!
//! A run produces exactly: one `start`, one `analyst` per provider in arrival
//! order, one `complete`. Events are sequence-numbered so a reconnecting
//! client can drop duplicates.

use crate::consensus::{ConsensusResult, ProviderResult};
use chrono::{DateTime, Utc};
use council_llm::ProviderConfig;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Provider announced in the start event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSummary {
    /// Provider id
    pub id: String,
    /// Display name
    pub name: String,
    /// Role label
    pub role: String,
}

impl From<&ProviderConfig> for ProviderSummary {
    fn from(provider: &ProviderConfig) -> Self {
        Self {
            id: provider.id.clone(),
            name: provider.name.clone(),
            role: provider.role.clone(),
        }
    }
}

/// Payload of one stream event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Run accepted, providers about to be called
    Start {
        /// Run id
        run_id: Uuid,
        /// The user query
        query: String,
        /// When the run started
        started_at: DateTime<Utc>,
        /// Providers taking part
        providers: Vec<ProviderSummary>,
    },
    /// One provider settled
    Analyst {
        /// The provider's result
        result: ProviderResult,
    },
    /// Every provider settled; terminal
    Complete {
        /// Final tally
        consensus: ConsensusResult,
    },
}

impl StreamEvent {
    /// Event name used on the wire
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Analyst { .. } => "analyst",
            Self::Complete { .. } => "complete",
        }
    }
}

/// An event with its sequence id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedEvent {
    /// Monotonically increasing within a run, starting at 0
    pub seq: u64,
    /// Payload
    #[serde(flatten)]
    pub event: StreamEvent,
}

/// Producer half, owned by the run
#[derive(Debug)]
pub struct StreamPublisher {
    tx: mpsc::UnboundedSender<SequencedEvent>,
    next_seq: u64,
    disconnected: bool,
}

/// Create a connected publisher/subscriber pair
///
/// The channel is unbounded so a slow subscriber never holds up the run.
#[must_use]
pub fn channel() -> (StreamPublisher, ConsensusStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        StreamPublisher {
            tx,
            next_seq: 0,
            disconnected: false,
        },
        ConsensusStream { rx },
    )
}

impl StreamPublisher {
    /// Publisher with no subscriber; every emit is a no-op
    #[must_use]
    pub fn detached() -> Self {
        let (publisher, _stream) = channel();
        publisher
    }

    /// Announce the run
    pub fn start(
        &mut self,
        run_id: Uuid,
        query: &str,
        started_at: DateTime<Utc>,
        providers: Vec<ProviderSummary>,
    ) {
        self.send(StreamEvent::Start {
            run_id,
            query: query.to_string(),
            started_at,
            providers,
        });
    }

    /// Publish one provider result
    pub fn emit(&mut self, result: &ProviderResult) {
        self.send(StreamEvent::Analyst {
            result: result.clone(),
        });
    }

    /// Publish the terminal event and close the stream
    pub fn finish(mut self, consensus: &ConsensusResult) {
        self.send(StreamEvent::Complete {
            consensus: consensus.clone(),
        });
    }

    /// Whether the subscriber is gone
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected || self.tx.is_closed()
    }

    fn send(&mut self, event: StreamEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.disconnected {
            return;
        }
        if self.tx.send(SequencedEvent { seq, event }).is_err() {
            debug!(seq, "Subscriber disconnected, dropping further events");
            self.disconnected = true;
        }
    }
}

/// Subscriber half
#[derive(Debug)]
pub struct ConsensusStream {
    rx: mpsc::UnboundedReceiver<SequencedEvent>,
}

impl ConsensusStream {
    /// Next event, or `None` once the run has finished
    pub async fn recv(&mut self) -> Option<SequencedEvent> {
        self.rx.recv().await
    }
}

impl Stream for ConsensusStream {
    type Item = SequencedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{compute, ProviderErrorKind};
    use council_llm::{default_providers, Opinion, Signal};
    use futures::StreamExt;

    fn result(provider: &ProviderConfig) -> ProviderResult {
        ProviderResult::success(
            provider,
            Opinion {
                signal: Signal::Buy,
                confidence: 70,
                reasoning: "trend".into(),
            },
            Utc::now(),
            10,
        )
    }

    #[tokio::test]
    async fn test_event_order_and_sequence() {
        let providers = default_providers();
        let (mut publisher, stream) = channel();
        let run_id = Uuid::new_v4();
        let started = Utc::now();

        publisher.start(
            run_id,
            "Buy BTC?",
            started,
            providers.iter().map(ProviderSummary::from).collect(),
        );
        let results: Vec<_> = providers.iter().take(2).map(result).collect();
        for r in &results {
            publisher.emit(r);
        }
        let consensus = compute("Buy BTC?", started, results, 4);
        publisher.finish(&consensus);

        let events: Vec<SequencedEvent> = stream.collect().await;
        let names: Vec<&str> = events.iter().map(|e| e.event.name()).collect();
        assert_eq!(names, vec!["start", "analyst", "analyst", "complete"]);
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_emit_after_disconnect_is_noop() {
        let providers = default_providers();
        let (mut publisher, stream) = channel();
        drop(stream);

        publisher.emit(&result(&providers[0]));
        assert!(publisher.is_disconnected());
        publisher.emit(&result(&providers[1]));
        publisher.finish(&compute("q", Utc::now(), vec![], 4));
    }

    #[test]
    fn test_detached_publisher() {
        let mut publisher = StreamPublisher::detached();
        assert!(publisher.is_disconnected());
        publisher.start(Uuid::new_v4(), "q", Utc::now(), vec![]);
    }

    #[test]
    fn test_event_json_shape() {
        let providers = default_providers();
        let failed = ProviderResult::failure(
            &providers[0],
            ProviderErrorKind::CircuitOpen,
            "circuit open until later",
            Utc::now(),
            0,
        );
        let event = SequencedEvent {
            seq: 3,
            event: StreamEvent::Analyst { result: failed },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["type"], "analyst");
        assert_eq!(json["result"]["provider_id"], "deepseek");
        assert_eq!(json["result"]["error"]["kind"], "circuit_open");
    }
}
