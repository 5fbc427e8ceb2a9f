//! `crag search` and `crag expand`: the retrieval engine from the command
//! line.

use anyhow::{bail, Result};
use std::time::Duration;

use corpus_rag_core::models::NodeKind;

use crate::config::Config;
use crate::engine::{RetrievalEngine, RetrievalResponse, RetrieveOptions};

pub async fn run_search(
    config: &Config,
    query: &str,
    options: RetrieveOptions,
    json: bool,
) -> Result<()> {
    let engine = RetrievalEngine::open(config).await?;
    let response =
        retrieve_with_deadline(&engine, query, &options, config.timeouts.request()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

/// Run one retrieval bounded by the whole-request deadline (`request_ms`).
pub async fn retrieve_with_deadline(
    engine: &RetrievalEngine,
    query: &str,
    options: &RetrieveOptions,
    deadline: Duration,
) -> Result<RetrievalResponse> {
    match tokio::time::timeout(deadline, engine.retrieve(query, options)).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            tracing::warn!(timeout_ms = deadline.as_millis() as u64, "retrieve timed out");
            bail!("retrieve timed out after {}ms", deadline.as_millis())
        }
    }
}

fn print_response(response: &RetrievalResponse) {
    let meta = &response.metadata;
    if meta.expanded_query != meta.query {
        println!("expanded query: {}", meta.expanded_query);
    }
    if !meta.entities_recognized.is_empty() {
        println!("entities: {}", meta.entities_recognized.join(", "));
    }
    if !meta.expanded_entities.is_empty() {
        println!("related: {}", meta.expanded_entities.join(", "));
    }
    for warning in &meta.warnings {
        println!("warning: {}", warning);
    }
    println!();

    if response.results.is_empty() {
        println!("No results.");
    }

    for result in &response.results {
        println!(
            "{}. [{}] [{:.4}] {} ({})",
            result.rank, result.citation, result.scores.final_score, result.title, result.kind
        );
        let tiers: Vec<String> = [
            ("lexical", result.scores.lexical),
            ("vector", result.scores.vector),
            ("graph", result.scores.graph),
        ]
        .iter()
        .filter_map(|(name, score)| score.map(|s| format!("{}={:.3}", name, s)))
        .collect();
        println!("    scores: fused={:.4} {}", result.scores.fused, tiers.join(" "));
        if let Some(ref url) = result.source_url {
            println!("    url: {}", url);
        }
        if let Some(page) = result.page {
            println!("    page: {}", page);
        }
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        for rel in &result.relationship_context {
            println!(
                "    related: {} —{} ({:.2})→ {}",
                rel.matched_entity, rel.relation, rel.weight, rel.related_entity
            );
        }
        println!("    chunk: {} #{}", result.chunk_id, result.chunk_index);
        println!();
    }

    let stats: Vec<String> = meta
        .tier_stats
        .iter()
        .map(|s| format!("{}:{}({}, {}ms)", s.tier, s.status.as_str(), s.count, s.elapsed_ms))
        .collect();
    println!("tiers: {}", stats.join(" "));
    println!("elapsed: {}ms", meta.elapsed_ms);
}

/// Resolve `name` to entities and print their relationship neighbourhood.
pub async fn run_expand(config: &Config, name: &str, max_hops: Option<usize>) -> Result<()> {
    let engine = RetrievalEngine::open(config).await?;
    let hops = max_hops.unwrap_or(engine.params().max_hops);
    let (seeds, expansion) = engine.resolve_and_expand(name, hops).await?;

    if seeds.is_empty() {
        println!("No entities matched.");
        return Ok(());
    }

    println!("seeds:");
    for seed in &seeds {
        println!("  {} [{}] ({})", seed.name, seed.id, seed.kind.as_str());
    }

    println!("expanded ({} hops):", hops.min(engine.params().max_hops_limit));
    if expansion.entities.is_empty() {
        println!("  (none)");
    }
    for entity in &expansion.entities {
        let reach = expansion.reach.get(&entity.id).copied().unwrap_or(0.0);
        println!(
            "  {} [{}] ({}) reach={:.3}",
            entity.name,
            entity.id,
            entity.kind.as_str(),
            reach
        );
    }

    println!("edges:");
    for edge in &expansion.edges {
        let marker = |kind: NodeKind| if kind == NodeKind::Document { "doc:" } else { "" };
        println!(
            "  {}{} —{} ({:.2})→ {}{}",
            marker(edge.src_type),
            edge.src_id,
            edge.relation,
            edge.weight,
            marker(edge.dst_type),
            edge.dst_id
        );
    }
    if expansion.truncated {
        println!("(expansion stopped at {} entities)", engine.params().max_expanded_entities);
    }
    Ok(())
}
