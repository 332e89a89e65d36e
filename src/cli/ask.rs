//! One-shot consensus run streamed to the terminal

use crate::server::{build_engine, config::AppConfig};
use anyhow::{Context, Result};
use council_core::{channel, validate_query, ConsensusResult, ProviderResult, StreamEvent};

pub async fn run(config: &AppConfig, query: &str, json: bool) -> Result<()> {
    let query = validate_query(query)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?
        .to_string();
    let engine = build_engine(config)?;

    let (publisher, mut stream) = channel();
    let run = tokio::spawn(async move { engine.run(&query, publisher).await });

    while let Some(event) = stream.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
            continue;
        }
        match &event.event {
            StreamEvent::Start { query, providers, .. } => {
                println!("🏛️  Asking {} analysts: \"{}\"\n", providers.len(), query);
            }
            StreamEvent::Analyst { result } => println!("{}", format_result(result)),
            StreamEvent::Complete { consensus } => println!("\n{}", format_consensus(consensus)),
        }
    }

    run.await.context("Consensus run failed")?;
    Ok(())
}

fn format_result(result: &ProviderResult) -> String {
    match &result.error {
        None => format!(
            "  ✅ {} ({}): {} {}% [{}ms]\n     {}",
            result.name, result.role, result.signal, result.confidence, result.latency_ms,
            result.reasoning
        ),
        Some(error) => format!(
            "  ❌ {} ({}): {} ({})",
            result.name,
            result.role,
            error.kind.description(),
            error.message
        ),
    }
}

fn format_consensus(consensus: &ConsensusResult) -> String {
    let votes = &consensus.vote_counts;
    let tally = format!(
        "BUY {} / SELL {} / HOLD {}",
        votes.buy, votes.sell, votes.hold
    );
    match consensus.consensus {
        Some(signal) => format!(
            "🎯 Consensus: {} ({}/{} agree, avg confidence {}%) [{}]",
            signal,
            consensus.agreement_count,
            consensus.total_responses,
            consensus.confidence_average,
            tally
        ),
        None => format!(
            "⚖️  No consensus: best was {}/{} [{}]",
            consensus.agreement_count, consensus.total_responses, tally
        ),
    }
}
