//! Bounded authority and persona-tag boosting.
//!
//! The boost can reorder results that fusion left close together, but can
//! never lift a result by more than `cap` times the fused-score spread.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::fusion::FusedCandidate;
use crate::store::ChunkContext;

/// A fused candidate after boosting.
#[derive(Debug, Clone, PartialEq)]
pub struct BoostedCandidate {
    pub candidate: FusedCandidate,
    /// Boost signal in `[0, 1]`.
    pub signal: f64,
    pub final_score: f64,
}

/// Per-request inputs to [`boost`].
#[derive(Debug, Clone, Copy)]
pub struct BoostContext<'a> {
    /// Chunk id to loaded chunk and document.
    pub contexts: &'a HashMap<String, ChunkContext>,
    /// Chunk id to ids of entities mentioned in it.
    pub chunk_entities: &'a HashMap<String, Vec<String>>,
    /// Entity id to raw authority score.
    pub authority: &'a HashMap<String, f64>,
    pub persona_tags: &'a [String],
    pub cap: f64,
}

/// Mean of the normalized authority component and the tag-overlap
/// component for one chunk.
pub fn boost_signal(chunk_id: &str, ctx: &BoostContext<'_>, max_authority: f64) -> f64 {
    let authority = ctx
        .chunk_entities
        .get(chunk_id)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| ctx.authority.get(id))
                .fold(0.0f64, |acc, a| acc.max(*a))
        })
        .unwrap_or(0.0);
    let authority = if max_authority > 0.0 {
        (authority / max_authority).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let tags = match ctx.contexts.get(chunk_id) {
        Some(c) if !ctx.persona_tags.is_empty() => {
            let carried = ctx
                .persona_tags
                .iter()
                .filter(|t| c.document.tags.iter().any(|d| d.eq_ignore_ascii_case(t)))
                .count();
            carried as f64 / ctx.persona_tags.len() as f64
        }
        _ => 0.0,
    };

    (authority + tags) / 2.0
}

/// Apply `final = fused + cap × spread × signal` and stable-sort by final
/// score.
///
/// `spread` is max minus min fused score, or 1% of the max when every
/// fused score is equal (including a single result).
pub fn boost(fused: Vec<FusedCandidate>, ctx: &BoostContext<'_>) -> Vec<BoostedCandidate> {
    if fused.is_empty() {
        return Vec::new();
    }
    let max_fused = fused.iter().map(|c| c.fused).fold(f64::MIN, f64::max);
    let min_fused = fused.iter().map(|c| c.fused).fold(f64::MAX, f64::min);
    let spread = if max_fused > min_fused {
        max_fused - min_fused
    } else {
        max_fused.abs() * 0.01
    };
    let max_authority = ctx.authority.values().fold(0.0f64, |acc, a| acc.max(*a));

    let mut boosted: Vec<BoostedCandidate> = fused
        .into_iter()
        .map(|candidate| {
            let signal = boost_signal(&candidate.chunk_id, ctx, max_authority);
            let final_score = candidate.fused + ctx.cap * spread * signal;
            BoostedCandidate {
                candidate,
                signal,
                final_score,
            }
        })
        .collect();
    boosted.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(Ordering::Equal)
    });
    boosted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Document, DocumentKind, DocumentMetadata, ProcessingStatus};
    use std::collections::BTreeMap;

    fn fused(id: &str, score: f64) -> FusedCandidate {
        FusedCandidate {
            chunk_id: id.to_string(),
            document_id: format!("doc-{}", id),
            snippet: String::new(),
            ranks: BTreeMap::new(),
            tier_scores: BTreeMap::new(),
            fused: score,
        }
    }

    fn context(id: &str, tags: &[&str]) -> ChunkContext {
        ChunkContext {
            chunk: Chunk {
                id: id.to_string(),
                document_id: format!("doc-{}", id),
                chunk_index: 0,
                text: String::new(),
                token_count: 0,
                hash: String::new(),
                page: None,
                section: None,
            },
            document: Document {
                id: format!("doc-{}", id),
                title: String::new(),
                kind: DocumentKind::Article,
                source_url: None,
                metadata: DocumentMetadata::default(),
                status: ProcessingStatus::Completed,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                created_at: 0,
                updated_at: 0,
            },
        }
    }

    struct Fixture {
        contexts: HashMap<String, ChunkContext>,
        chunk_entities: HashMap<String, Vec<String>>,
        authority: HashMap<String, f64>,
        tags: Vec<String>,
    }

    impl Fixture {
        fn ctx(&self, cap: f64) -> BoostContext<'_> {
            BoostContext {
                contexts: &self.contexts,
                chunk_entities: &self.chunk_entities,
                authority: &self.authority,
                persona_tags: &self.tags,
                cap,
            }
        }
    }

    fn fixture() -> Fixture {
        let mut contexts = HashMap::new();
        contexts.insert("a".to_string(), context("a", &[]));
        contexts.insert("b".to_string(), context("b", &["lightfield", "3d-display"]));
        let mut chunk_entities = HashMap::new();
        chunk_entities.insert("b".to_string(), vec!["leia".to_string()]);
        let mut authority = HashMap::new();
        authority.insert("leia".to_string(), 4.0);
        authority.insert("other".to_string(), 8.0);
        Fixture {
            contexts,
            chunk_entities,
            authority,
            tags: vec!["lightfield".to_string(), "holography".to_string()],
        }
    }

    #[test]
    fn test_signal_averages_authority_and_tags() {
        let f = fixture();
        let ctx = f.ctx(0.25);
        // authority 4/8 = 0.5, tags 1/2 = 0.5.
        assert!((boost_signal("b", &ctx, 8.0) - 0.5).abs() < 1e-12);
        assert_eq!(boost_signal("a", &ctx, 8.0), 0.0);
        assert_eq!(boost_signal("missing", &ctx, 8.0), 0.0);
    }

    #[test]
    fn test_boost_can_reorder_close_results() {
        let f = fixture();
        let out = boost(vec![fused("a", 1.0), fused("b", 0.99), fused("c", 0.0)], &f.ctx(0.25));
        // spread 1.0, b gains 0.25 * 0.5 = 0.125.
        assert_eq!(out[0].candidate.chunk_id, "b");
        assert!((out[0].final_score - 1.115).abs() < 1e-9);
    }

    #[test]
    fn test_boost_is_bounded_by_cap_times_spread() {
        let f = fixture();
        let input = vec![fused("a", 0.5), fused("b", 0.1)];
        let out = boost(input, &f.ctx(0.25));
        for r in &out {
            let gain = r.final_score - r.candidate.fused;
            assert!(gain >= 0.0 && gain <= 0.25 * 0.4 + 1e-12);
        }
        assert_eq!(out[0].candidate.chunk_id, "a");
    }

    #[test]
    fn test_equal_scores_use_one_percent_spread() {
        let f = fixture();
        let out = boost(vec![fused("a", 0.2), fused("b", 0.2)], &f.ctx(0.25));
        assert_eq!(out[0].candidate.chunk_id, "b");
        assert!((out[0].final_score - (0.2 + 0.25 * 0.002 * 0.5)).abs() < 1e-12);
        assert_eq!(out[1].final_score, 0.2);
    }

    #[test]
    fn test_zero_cap_keeps_fused_order() {
        let f = fixture();
        let out = boost(vec![fused("a", 1.0), fused("b", 0.99)], &f.ctx(0.0));
        let ids: Vec<_> = out.iter().map(|r| r.candidate.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_empty_input() {
        let f = fixture();
        assert!(boost(Vec::new(), &f.ctx(0.25)).is_empty());
    }
}
