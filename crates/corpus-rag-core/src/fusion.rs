//! Weighted reciprocal-rank fusion.
//!
//! Each tier contributes `weight / (k + rank)` for every chunk it ranked
//! (1-based rank), and a chunk's fused score is the sum over tiers. RRF
//! only looks at ranks, so BM25 scores, cosine similarities and graph
//! strengths never need a common scale.
//!
//! Ties resolve deterministically:
//!
//! 1. more tiers present first;
//! 2. higher lexical score first (present beats absent);
//! 3. first-seen order, visiting tiers lexical, vector, graph and each
//!    tier's list by rank.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::models::Tier;
use crate::params::TierWeights;
use crate::store::ChunkCandidate;

/// A chunk after fusion, carrying its per-tier ranks and raw scores.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub chunk_id: String,
    pub document_id: String,
    pub snippet: String,
    /// 1-based rank per tier that returned this chunk.
    pub ranks: BTreeMap<Tier, usize>,
    /// Tier-native score per tier that returned this chunk.
    pub tier_scores: BTreeMap<Tier, f64>,
    pub fused: f64,
}

impl FusedCandidate {
    pub fn tier_score(&self, tier: Tier) -> Option<f64> {
        self.tier_scores.get(&tier).copied()
    }

    pub fn tier_count(&self) -> usize {
        self.ranks.len()
    }
}

/// Fuse any subset of tier lists into one ordering.
///
/// A chunk listed twice by the same tier keeps its best rank.
pub fn fuse(
    lists: &BTreeMap<Tier, Vec<ChunkCandidate>>,
    weights: &TierWeights,
    k: f64,
) -> Vec<FusedCandidate> {
    let mut order: Vec<FusedCandidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for tier in Tier::ALL {
        let Some(list) = lists.get(&tier) else {
            continue;
        };
        let weight = weights.get(tier);
        for (i, cand) in list.iter().enumerate() {
            let rank = i + 1;
            let pos = *index.entry(cand.chunk_id.clone()).or_insert_with(|| {
                order.push(FusedCandidate {
                    chunk_id: cand.chunk_id.clone(),
                    document_id: cand.document_id.clone(),
                    snippet: String::new(),
                    ranks: BTreeMap::new(),
                    tier_scores: BTreeMap::new(),
                    fused: 0.0,
                });
                order.len() - 1
            });
            let entry = &mut order[pos];
            if entry.ranks.contains_key(&tier) {
                continue;
            }
            entry.ranks.insert(tier, rank);
            entry.tier_scores.insert(tier, cand.raw_score);
            entry.fused += weight / (k + rank as f64);
            if entry.snippet.is_empty() {
                entry.snippet = cand.snippet.clone();
            }
        }
    }

    let mut indexed: Vec<(usize, FusedCandidate)> = order.into_iter().enumerate().collect();
    indexed.sort_by(|(ia, a), (ib, b)| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.tier_count().cmp(&a.tier_count()))
            .then_with(|| cmp_lexical(a, b))
            .then_with(|| ia.cmp(ib))
    });
    indexed.into_iter().map(|(_, c)| c).collect()
}

/// Higher lexical score first; a present score beats an absent one.
fn cmp_lexical(a: &FusedCandidate, b: &FusedCandidate) -> Ordering {
    match (a.tier_score(Tier::Lexical), b.tier_score(Tier::Lexical)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
