//! Graph tier: rank chunks by the entities that mention them.
//!
//! Each chunk scores the sum of the connection strengths of the distinct
//! recognized or expanded entities mentioning it. Seeds count 1.0;
//! expanded entities count their [`Expansion::reach`].

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::expand::Expansion;
use crate::models::{Entity, Mention};
use crate::store::{ChunkCandidate, GraphStore};

/// Strength per entity id for seeds and their expansion.
pub fn entity_strengths(seeds: &[Entity], expansion: &Expansion) -> HashMap<String, f64> {
    let mut out: HashMap<String, f64> = expansion.reach.clone();
    for seed in seeds {
        out.insert(seed.id.clone(), 1.0);
    }
    out
}

/// Score chunks from mention rows.
///
/// Duplicate `(entity, chunk)` rows count once. Output is sorted by score
/// descending, then document id, then chunk id, and truncated to `limit`.
pub fn rank_by_mentions(
    mentions: &[Mention],
    strengths: &HashMap<String, f64>,
    limit: usize,
) -> Vec<ChunkCandidate> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut scores: HashMap<&str, (&str, f64)> = HashMap::new();

    for m in mentions {
        let Some(s) = strengths.get(&m.entity_id) else {
            continue;
        };
        if !seen.insert((m.entity_id.as_str(), m.chunk_id.as_str())) {
            continue;
        }
        let slot = scores
            .entry(m.chunk_id.as_str())
            .or_insert((m.document_id.as_str(), 0.0));
        slot.1 += s;
    }

    let mut ranked: Vec<ChunkCandidate> = scores
        .into_iter()
        .filter(|(_, (_, score))| *score > 0.0)
        .map(|(chunk_id, (document_id, score))| ChunkCandidate {
            chunk_id: chunk_id.to_string(),
            document_id: document_id.to_string(),
            raw_score: score,
            updated_at: 0,
            snippet: String::new(),
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    ranked.truncate(limit);
    ranked
}

/// Run the graph tier against a store.
pub async fn graph_search<G: GraphStore + ?Sized>(
    store: &G,
    seeds: &[Entity],
    expansion: &Expansion,
    limit: usize,
) -> Result<Vec<ChunkCandidate>> {
    let strengths = entity_strengths(seeds, expansion);
    if strengths.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }
    let mut ids: Vec<String> = strengths.keys().cloned().collect();
    ids.sort();
    let mentions = store.mentions_for_entities(&ids).await?;
    Ok(rank_by_mentions(&mentions, &strengths, limit))
}
