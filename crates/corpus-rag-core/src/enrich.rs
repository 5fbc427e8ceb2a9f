//! Result enrichment: relationship context and citation markers.
//!
//! Pure; never re-ranks. An edge is attached to a result when, checked in
//! this order:
//!
//! 1. one of its entity endpoints is in the chunk's mention set;
//! 2. its evidence document (or a document endpoint) is the result's
//!    document;
//! 3. an endpoint entity's name appears, case-insensitively on word
//!    boundaries, in the document title or chunk text.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::boost::BoostedCandidate;
use crate::models::{Edge, NodeKind, RelationshipContext, SearchResult, Tier, TierScores};
use crate::store::{make_snippet, ChunkContext};
use crate::text::contains_term;

const SNIPPET_CHARS: usize = 240;

/// Per-request inputs to [`enrich`].
#[derive(Debug, Clone, Copy)]
pub struct EnrichContext<'a> {
    pub contexts: &'a HashMap<String, ChunkContext>,
    pub chunk_entities: &'a HashMap<String, Vec<String>>,
    /// Candidate edges, normally the traversed edges of the expansion.
    pub edges: &'a [Edge],
    /// Entity id to display name.
    pub entity_names: &'a HashMap<String, String>,
    pub max_context: usize,
}

/// Citation letter for the `n`-th distinct document (0-based):
/// `A`..`Z`, then `AA`, `AB`, ...
pub fn citation_letter(mut n: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push((b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    out.iter().rev().collect()
}

/// Build final [`SearchResult`]s in the given order.
///
/// Candidates with no loaded context are dropped; ranks and citations are
/// assigned to what remains.
pub fn enrich(results: Vec<BoostedCandidate>, ctx: &EnrichContext<'_>) -> Vec<SearchResult> {
    let mut letters: HashMap<String, (String, usize)> = HashMap::new();
    let mut out = Vec::with_capacity(results.len());

    for boosted in results {
        let Some(chunk_ctx) = ctx.contexts.get(&boosted.candidate.chunk_id) else {
            continue;
        };
        let next_letter = letters.len();
        let (letter, count) = letters
            .entry(chunk_ctx.document.id.clone())
            .or_insert_with(|| (citation_letter(next_letter), 0));
        *count += 1;
        let citation = format!("{}{}", letter, count);

        let candidate = boosted.candidate;
        let snippet = if candidate.snippet.is_empty() {
            make_snippet(&chunk_ctx.chunk.text, SNIPPET_CHARS)
        } else {
            candidate.snippet.clone()
        };
        let relationship_context = relationships_for(&candidate.chunk_id, chunk_ctx, ctx);

        out.push(SearchResult {
            rank: out.len() + 1,
            citation,
            chunk_id: candidate.chunk_id.clone(),
            chunk_index: chunk_ctx.chunk.chunk_index,
            document_id: chunk_ctx.document.id.clone(),
            title: chunk_ctx.document.title.clone(),
            kind: chunk_ctx.document.kind,
            source_url: chunk_ctx.document.source_url.clone(),
            metadata: chunk_ctx.document.metadata.clone(),
            page: chunk_ctx.chunk.page,
            section: chunk_ctx.chunk.section.clone(),
            snippet,
            scores: TierScores {
                lexical: candidate.tier_score(Tier::Lexical),
                vector: candidate.tier_score(Tier::Vector),
                graph: candidate.tier_score(Tier::Graph),
                fused: candidate.fused,
                final_score: boosted.final_score,
            },
            relationship_context,
        });
    }
    out
}

fn node_name(id: &str, kind: NodeKind, chunk_ctx: &ChunkContext, ctx: &EnrichContext<'_>) -> String {
    match kind {
        NodeKind::Entity => ctx.entity_names.get(id).cloned(),
        NodeKind::Document if id == chunk_ctx.document.id => Some(chunk_ctx.document.title.clone()),
        NodeKind::Document => None,
    }
    .unwrap_or_else(|| id.to_string())
}

/// The endpoint (id, kind) that ties `edge` to this result, if any.
fn matched_endpoint<'e>(
    edge: &'e Edge,
    chunk_id: &str,
    chunk_ctx: &ChunkContext,
    ctx: &EnrichContext<'_>,
) -> Option<(&'e str, NodeKind)> {
    let endpoints = [
        (edge.src_id.as_str(), edge.src_type),
        (edge.dst_id.as_str(), edge.dst_type),
    ];

    if let Some(mentioned) = ctx.chunk_entities.get(chunk_id) {
        if let Some(hit) = endpoints
            .iter()
            .find(|(id, kind)| *kind == NodeKind::Entity && mentioned.iter().any(|m| m.as_str() == *id))
        {
            return Some(*hit);
        }
    }

    let doc_id = chunk_ctx.document.id.as_str();
    if let Some(hit) = endpoints
        .iter()
        .find(|(id, kind)| *kind == NodeKind::Document && *id == doc_id)
    {
        return Some(*hit);
    }
    if edge.evidence_doc_id.as_deref() == Some(doc_id) {
        return Some(endpoints[0]);
    }

    endpoints.iter().copied().find(|(id, kind)| {
        *kind == NodeKind::Entity
            && ctx.entity_names.get(*id).map_or(false, |name| {
                contains_term(&chunk_ctx.document.title, name)
                    || contains_term(&chunk_ctx.chunk.text, name)
            })
    })
}

fn relationships_for(
    chunk_id: &str,
    chunk_ctx: &ChunkContext,
    ctx: &EnrichContext<'_>,
) -> Vec<RelationshipContext> {
    if ctx.max_context == 0 {
        return Vec::new();
    }
    let mut related: Vec<RelationshipContext> = ctx
        .edges
        .iter()
        .filter_map(|edge| {
            let (matched_id, matched_kind) = matched_endpoint(edge, chunk_id, chunk_ctx, ctx)?;
            let (other_id, other_kind) = edge.other_end(matched_id)?;
            Some(RelationshipContext {
                edge_id: edge.id.clone(),
                relation: edge.relation,
                matched_entity: node_name(matched_id, matched_kind, chunk_ctx, ctx),
                related_entity: node_name(other_id, other_kind, chunk_ctx, ctx),
                evidence: edge.evidence.clone(),
                weight: edge.weight,
            })
        })
        .collect();
    related.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.edge_id.cmp(&b.edge_id))
    });
    related.truncate(ctx.max_context);
    related
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::FusedCandidate;
    use crate::models::{
        Chunk, Document, DocumentKind, DocumentMetadata, ProcessingStatus, RelationType,
    };
    use std::collections::BTreeMap;

    fn boosted(chunk: &str, doc: &str) -> BoostedCandidate {
        let mut tier_scores = BTreeMap::new();
        tier_scores.insert(Tier::Lexical, 2.5);
        BoostedCandidate {
            candidate: FusedCandidate {
                chunk_id: chunk.to_string(),
                document_id: doc.to_string(),
                snippet: String::new(),
                ranks: BTreeMap::new(),
                tier_scores,
                fused: 0.02,
            },
            signal: 0.0,
            final_score: 0.02,
        }
    }

    fn context(chunk: &str, doc: &str, title: &str, text: &str) -> ChunkContext {
        ChunkContext {
            chunk: Chunk {
                id: chunk.to_string(),
                document_id: doc.to_string(),
                chunk_index: 0,
                text: text.to_string(),
                token_count: 0,
                hash: String::new(),
                page: Some(3),
                section: None,
            },
            document: Document {
                id: doc.to_string(),
                title: title.to_string(),
                kind: DocumentKind::Patent,
                source_url: None,
                metadata: DocumentMetadata::default(),
                status: ProcessingStatus::Completed,
                tags: vec![],
                created_at: 0,
                updated_at: 0,
            },
        }
    }

    fn edge(id: &str, src: &str, dst: &str, weight: f64) -> Edge {
        Edge {
            id: id.to_string(),
            src_id: src.to_string(),
            src_type: NodeKind::Entity,
            dst_id: dst.to_string(),
            dst_type: NodeKind::Entity,
            relation: RelationType::Implements,
            weight,
            evidence: Some("evidence".to_string()),
            evidence_doc_id: None,
        }
    }

    struct Fixture {
        contexts: HashMap<String, ChunkContext>,
        chunk_entities: HashMap<String, Vec<String>>,
        edges: Vec<Edge>,
        names: HashMap<String, String>,
    }

    impl Fixture {
        fn ctx(&self, max_context: usize) -> EnrichContext<'_> {
            EnrichContext {
                contexts: &self.contexts,
                chunk_entities: &self.chunk_entities,
                edges: &self.edges,
                entity_names: &self.names,
                max_context,
            }
        }
    }

    fn fixture() -> Fixture {
        let mut contexts = HashMap::new();
        contexts.insert("c1".into(), context("c1", "d1", "Evolution of Leia Inc", "body one"));
        contexts.insert("c2".into(), context("c2", "d2", "Other", "a lightfield panel"));
        contexts.insert("c3".into(), context("c3", "d1", "Evolution of Leia Inc", "body two"));
        contexts.insert("c4".into(), context("c4", "d3", "Unrelated", "nothing here"));
        let mut chunk_entities = HashMap::new();
        chunk_entities.insert("c3".into(), vec!["lightfield".to_string()]);
        let mut names = HashMap::new();
        names.insert("leia".to_string(), "Leia Inc".to_string());
        names.insert("lightfield".to_string(), "lightfield".to_string());
        names.insert("nvidia".to_string(), "NVIDIA".to_string());
        Fixture {
            contexts,
            chunk_entities,
            edges: vec![
                edge("e1", "leia", "lightfield", 0.9),
                edge("e2", "nvidia", "leia", 0.4),
            ],
            names,
        }
    }

    #[test]
    fn test_citation_letters() {
        assert_eq!(citation_letter(0), "A");
        assert_eq!(citation_letter(25), "Z");
        assert_eq!(citation_letter(26), "AA");
        assert_eq!(citation_letter(27), "AB");
        assert_eq!(citation_letter(26 + 26 * 26), "AAA");
    }

    #[test]
    fn test_citations_group_by_document_in_rank_order() {
        let f = fixture();
        let out = enrich(
            vec![
                boosted("c1", "d1"),
                boosted("c2", "d2"),
                boosted("c3", "d1"),
                boosted("gone", "d9"),
                boosted("c4", "d3"),
            ],
            &f.ctx(3),
        );
        let cites: Vec<_> = out.iter().map(|r| r.citation.as_str()).collect();
        assert_eq!(cites, vec!["A1", "B1", "A2", "C1"]);
        let ranks: Vec<_> = out.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
        assert_eq!(out[0].page, Some(3));
        assert_eq!(out[0].scores.lexical, Some(2.5));
        assert_eq!(out[0].snippet, "body one");
    }

    #[test]
    fn test_mention_match_beats_text_fallback() {
        let f = fixture();
        let out = enrich(vec![boosted("c3", "d1")], &f.ctx(3));
        let rel = &out[0].relationship_context;
        assert_eq!(rel.len(), 2);
        assert_eq!(rel[0].edge_id, "e1");
        // c3 mentions lightfield, so the mention endpoint is the match.
        assert_eq!(rel[0].matched_entity, "lightfield");
        assert_eq!(rel[0].related_entity, "Leia Inc");
        assert_eq!(rel[1].edge_id, "e2");
        assert_eq!(rel[1].matched_entity, "Leia Inc");
        assert_eq!(rel[1].related_entity, "NVIDIA");
    }

    #[test]
    fn test_text_and_evidence_doc_matching() {
        let mut f = fixture();
        f.edges[1].evidence_doc_id = Some("d3".to_string());
        let out = enrich(vec![boosted("c2", "d2"), boosted("c4", "d3")], &f.ctx(3));
        let c2: Vec<_> = out[0].relationship_context.iter().map(|r| r.edge_id.as_str()).collect();
        assert_eq!(c2, vec!["e1"]);
        let c4: Vec<_> = out[1].relationship_context.iter().map(|r| r.edge_id.as_str()).collect();
        assert_eq!(c4, vec!["e2"]);
        assert_eq!(out[1].relationship_context[0].matched_entity, "NVIDIA");
    }

    #[test]
    fn test_context_capped_and_sorted_by_weight() {
        let f = fixture();
        let out = enrich(vec![boosted("c1", "d1")], &f.ctx(1));
        assert_eq!(out[0].relationship_context.len(), 1);
        assert_eq!(out[0].relationship_context[0].edge_id, "e1");
        let out = enrich(vec![boosted("c1", "d1")], &f.ctx(0));
        assert!(out[0].relationship_context.is_empty());
    }

    #[test]
    fn test_document_endpoint_uses_title() {
        let mut f = fixture();
        f.edges = vec![Edge {
            dst_id: "d1".into(),
            dst_type: NodeKind::Document,
            relation: RelationType::AuthorOf,
            ..edge("e9", "nvidia", "d1", 0.7)
        }];
        let out = enrich(vec![boosted("c1", "d1")], &f.ctx(3));
        let rel = &out[0].relationship_context[0];
        assert_eq!(rel.matched_entity, "Evolution of Leia Inc");
        assert_eq!(rel.related_entity, "NVIDIA");
    }
}
