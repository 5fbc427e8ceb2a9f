//! Brute-force nearest-neighbour ranking.
//!
//! Both store backends load `(candidate, vector)` rows and hand them here,
//! so the similarity cutoff and tie-breaking live in one place.

use crate::embedding::cosine_similarity;
use crate::store::{rank_candidates, ChunkCandidate};

/// Score each row by cosine similarity to `query`, drop rows at or below
/// `min_similarity`, and return the top `limit`.
///
/// The incoming `raw_score` of each candidate is overwritten.
pub fn rank_by_similarity<I, V>(
    query: &[f32],
    rows: I,
    min_similarity: f64,
    limit: usize,
) -> Vec<ChunkCandidate>
where
    I: IntoIterator<Item = (ChunkCandidate, V)>,
    V: AsRef<[f32]>,
{
    if query.is_empty() || limit == 0 {
        return Vec::new();
    }
    let scored = rows
        .into_iter()
        .filter_map(|(mut candidate, vector)| {
            let sim = cosine_similarity(query, vector.as_ref()) as f64;
            if sim > min_similarity {
                candidate.raw_score = sim;
                Some(candidate)
            } else {
                None
            }
        })
        .collect();
    rank_candidates(scored, limit)
}
