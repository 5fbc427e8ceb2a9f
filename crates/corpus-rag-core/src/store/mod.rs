//! Storage abstraction for corpus-rag.
//!
//! Retrieval talks to two stores:
//!
//! - [`ChunkStore`]: documents, chunks, the lexical index and chunk vectors.
//! - [`GraphStore`]: entities, aliases, typed edges and the mention index.
//!
//! Both are object-safe so the engine can hold them as `Arc<dyn ...>`, and
//! both must be `Send + Sync` to be shared across concurrent tier futures.
//! A single backend (SQLite, in-memory) usually implements both.

pub mod memory;

use std::cmp::Ordering;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Alias, Chunk, Document, Edge, Entity, Mention};

/// A candidate chunk returned by keyword, vector, or graph ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub document_id: String,
    /// Tier-native score: BM25, cosine similarity, or graph strength.
    /// Always non-negative for lexical and graph candidates.
    pub raw_score: f64,
    /// Parent document's `updated_at`, the first tie-breaker.
    pub updated_at: i64,
    /// Text excerpt for display.
    pub snippet: String,
}

/// A chunk together with its owning document, as needed by the boost
/// and enrichment stages.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkContext {
    pub chunk: Chunk,
    pub document: Document,
}

/// Row counts reported by `crag stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub documents: i64,
    pub chunks: i64,
    pub embedded_chunks: i64,
    pub entities: i64,
    pub aliases: i64,
    pub edges: i64,
    pub mentions: i64,
}

/// Document and chunk storage plus the two candidate-producing indexes.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](ChunkStore::upsert_document) | Insert or replace a document row |
/// | [`replace_chunks`](ChunkStore::replace_chunks) | Atomically swap a document's chunks (and vectors) |
/// | [`keyword_search`](ChunkStore::keyword_search) | BM25 ranking over chunk text and title |
/// | [`vector_search`](ChunkStore::vector_search) | Cosine ranking over chunk vectors |
/// | [`load_contexts`](ChunkStore::load_contexts) | Fetch chunks with their documents |
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn upsert_document(&self, doc: &Document) -> Result<()>;

    /// Replace every chunk of `doc_id`. When `vectors` is given it must be
    /// parallel to `chunks`; otherwise prior vectors of the document are
    /// dropped along with its old chunks.
    async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<()>;

    /// `query` is an enhanced query (`original OR name ...`); backends
    /// derive their terms with [`crate::lexical::query_terms`].
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkCandidate>>;

    /// Candidates with similarity `<= min_similarity` are excluded.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        min_similarity: f64,
    ) -> Result<Vec<ChunkCandidate>>;

    /// Unknown ids are skipped; output order is unspecified.
    async fn load_contexts(&self, chunk_ids: &[String]) -> Result<Vec<ChunkContext>>;
}

/// Knowledge-graph storage. Read-only from the retrieval path; the write
/// methods exist for corpus import.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn all_entities(&self) -> Result<Vec<Entity>>;

    async fn all_aliases(&self) -> Result<Vec<Alias>>;

    /// Entities for the given ids. Unknown ids are skipped.
    async fn get_entities(&self, ids: &[String]) -> Result<Vec<Entity>>;

    /// Case-insensitive exact name lookup.
    async fn find_entity_by_name(&self, name: &str) -> Result<Option<Entity>>;

    /// Edges with any of `node_ids` as source or destination.
    async fn edges_touching(&self, node_ids: &[String]) -> Result<Vec<Edge>>;

    async fn mentions_for_entities(&self, entity_ids: &[String]) -> Result<Vec<Mention>>;

    async fn mentions_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Mention>>;

    async fn upsert_entity(&self, entity: &Entity) -> Result<()>;

    async fn upsert_alias(&self, alias: &Alias) -> Result<()>;

    async fn upsert_edge(&self, edge: &Edge) -> Result<()>;

    /// Replace all mention rows belonging to `doc_id`.
    async fn replace_mentions(&self, doc_id: &str, mentions: &[Mention]) -> Result<()>;
}

/// Order candidates by score descending, then newer document first, then
/// chunk id, and keep at most `limit`.
///
/// Every backend funnels its raw hits through here so that ties resolve
/// the same way regardless of storage.
pub fn rank_candidates(mut candidates: Vec<ChunkCandidate>, limit: usize) -> Vec<ChunkCandidate> {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(limit);
    candidates
}

/// First `max_chars` characters of `text`, with an ellipsis when cut.
pub fn make_snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", text[..idx].trim_end()),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, score: f64, updated_at: i64) -> ChunkCandidate {
        ChunkCandidate {
            chunk_id: id.to_string(),
            document_id: format!("doc-{}", id),
            raw_score: score,
            updated_at,
            snippet: String::new(),
        }
    }

    #[test]
    fn test_rank_candidates_orders_and_truncates() {
        let ranked = rank_candidates(
            vec![cand("c", 1.0, 0), cand("a", 3.0, 0), cand("b", 2.0, 0)],
            2,
        );
        let ids: Vec<_> = ranked.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_rank_candidates_tie_breaks_on_recency_then_id() {
        let ranked = rank_candidates(
            vec![cand("z", 1.0, 100), cand("b", 1.0, 50), cand("a", 1.0, 50)],
            10,
        );
        let ids: Vec<_> = ranked.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "b"]);
    }

    #[test]
    fn test_make_snippet() {
        assert_eq!(make_snippet("short", 10), "short");
        assert_eq!(make_snippet("hello world again", 5), "hello...");
        assert_eq!(make_snippet("héllo wörld", 3), "hél...");
    }
}
