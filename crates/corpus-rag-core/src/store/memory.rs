//! In-memory [`ChunkStore`] + [`GraphStore`] for tests and embedding.
//!
//! Everything lives behind one `std::sync::RwLock`. Keyword search builds
//! a [`Bm25Index`] over the current chunks on each call and vector search
//! is brute-force cosine similarity, so this is only suitable for small
//! corpora.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::lexical::{query_terms, Bm25Index};
use crate::models::{Alias, Chunk, Document, Edge, Entity, Mention};
use crate::vector::rank_by_similarity;

use super::{
    make_snippet, rank_candidates, ChunkCandidate, ChunkContext, ChunkStore, GraphStore,
    StoreCounts,
};

const SNIPPET_CHARS: usize = 240;

#[derive(Default)]
struct Inner {
    docs: HashMap<String, Document>,
    /// Keyed by chunk id for deterministic iteration.
    chunks: BTreeMap<String, Chunk>,
    vectors: HashMap<String, Vec<f32>>,
    entities: BTreeMap<String, Entity>,
    /// Keyed by lowercased alias: one surface form, one entity.
    aliases: BTreeMap<String, Alias>,
    edges: BTreeMap<String, Edge>,
    mentions: Vec<Mention>,
}

/// In-memory store for tests and small embedded corpora.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        let inner = self.read()?;
        Ok(StoreCounts {
            documents: inner.docs.len() as i64,
            chunks: inner.chunks.len() as i64,
            embedded_chunks: inner.vectors.len() as i64,
            entities: inner.entities.len() as i64,
            aliases: inner.aliases.len() as i64,
            edges: inner.edges.len() as i64,
            mentions: inner.mentions.len() as i64,
        })
    }
}

fn candidate(chunk: &Chunk, doc: Option<&Document>, score: f64) -> ChunkCandidate {
    ChunkCandidate {
        chunk_id: chunk.id.clone(),
        document_id: chunk.document_id.clone(),
        raw_score: score,
        updated_at: doc.map(|d| d.updated_at).unwrap_or(0),
        snippet: make_snippet(&chunk.text, SNIPPET_CHARS),
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        self.write()?.docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<()> {
        if let Some(vecs) = vectors {
            if vecs.len() != chunks.len() {
                bail!(
                    "vector count ({}) does not match chunk count ({})",
                    vecs.len(),
                    chunks.len()
                );
            }
        }
        let mut inner = self.write()?;
        let stale: Vec<String> = inner
            .chunks
            .values()
            .filter(|c| c.document_id == doc_id)
            .map(|c| c.id.clone())
            .collect();
        for id in &stale {
            inner.chunks.remove(id);
            inner.vectors.remove(id);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            inner.chunks.insert(chunk.id.clone(), chunk.clone());
            if let Some(vecs) = vectors {
                inner.vectors.insert(chunk.id.clone(), vecs[i].clone());
            }
        }
        Ok(())
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkCandidate>> {
        let terms = query_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        let mut index = Bm25Index::new();
        for chunk in inner.chunks.values() {
            let title = inner
                .docs
                .get(&chunk.document_id)
                .map(|d| d.title.as_str())
                .unwrap_or("");
            index.add(chunk.id.clone(), &format!("{}\n{}", title, chunk.text));
        }
        let candidates = index
            .score(&terms)
            .into_iter()
            .filter_map(|(chunk_id, score)| {
                let chunk = inner.chunks.get(&chunk_id)?;
                Some(candidate(chunk, inner.docs.get(&chunk.document_id), score))
            })
            .collect();
        Ok(rank_candidates(candidates, limit))
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        min_similarity: f64,
    ) -> Result<Vec<ChunkCandidate>> {
        let inner = self.read()?;
        let rows = inner.vectors.iter().filter_map(|(chunk_id, vector)| {
            let chunk = inner.chunks.get(chunk_id)?;
            Some((
                candidate(chunk, inner.docs.get(&chunk.document_id), 0.0),
                vector.as_slice(),
            ))
        });
        Ok(rank_by_similarity(query_vec, rows, min_similarity, limit))
    }

    async fn load_contexts(&self, chunk_ids: &[String]) -> Result<Vec<ChunkContext>> {
        let inner = self.read()?;
        Ok(chunk_ids
            .iter()
            .filter_map(|id| {
                let chunk = inner.chunks.get(id)?;
                let document = inner.docs.get(&chunk.document_id)?;
                Some(ChunkContext {
                    chunk: chunk.clone(),
                    document: document.clone(),
                })
            })
            .collect())
    }
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn all_entities(&self) -> Result<Vec<Entity>> {
        Ok(self.read()?.entities.values().cloned().collect())
    }

    async fn all_aliases(&self) -> Result<Vec<Alias>> {
        Ok(self.read()?.aliases.values().cloned().collect())
    }

    async fn get_entities(&self, ids: &[String]) -> Result<Vec<Entity>> {
        let inner = self.read()?;
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        Ok(inner
            .entities
            .values()
            .filter(|e| wanted.contains(e.id.as_str()))
            .cloned()
            .collect())
    }

    async fn find_entity_by_name(&self, name: &str) -> Result<Option<Entity>> {
        let needle = name.to_lowercase();
        Ok(self
            .read()?
            .entities
            .values()
            .find(|e| e.name.to_lowercase() == needle)
            .cloned())
    }

    async fn edges_touching(&self, node_ids: &[String]) -> Result<Vec<Edge>> {
        let inner = self.read()?;
        let wanted: HashSet<&str> = node_ids.iter().map(String::as_str).collect();
        Ok(inner
            .edges
            .values()
            .filter(|e| wanted.contains(e.src_id.as_str()) || wanted.contains(e.dst_id.as_str()))
            .cloned()
            .collect())
    }

    async fn mentions_for_entities(&self, entity_ids: &[String]) -> Result<Vec<Mention>> {
        let inner = self.read()?;
        let wanted: HashSet<&str> = entity_ids.iter().map(String::as_str).collect();
        Ok(inner
            .mentions
            .iter()
            .filter(|m| wanted.contains(m.entity_id.as_str()))
            .cloned()
            .collect())
    }

    async fn mentions_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Mention>> {
        let inner = self.read()?;
        let wanted: HashSet<&str> = chunk_ids.iter().map(String::as_str).collect();
        Ok(inner
            .mentions
            .iter()
            .filter(|m| wanted.contains(m.chunk_id.as_str()))
            .cloned()
            .collect())
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        self.write()?
            .entities
            .insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn upsert_alias(&self, alias: &Alias) -> Result<()> {
        self.write()?
            .aliases
            .insert(alias.alias.to_lowercase(), alias.clone());
        Ok(())
    }

    async fn upsert_edge(&self, edge: &Edge) -> Result<()> {
        self.write()?.edges.insert(edge.id.clone(), edge.clone());
        Ok(())
    }

    async fn replace_mentions(&self, doc_id: &str, mentions: &[Mention]) -> Result<()> {
        let mut inner = self.write()?;
        inner.mentions.retain(|m| m.document_id != doc_id);
        inner.mentions.extend(mentions.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentKind, DocumentMetadata, EntityKind, NodeKind, ProcessingStatus, RelationType};

    fn doc(id: &str, title: &str, updated_at: i64) -> Document {
        Document {
            id: id.to_string(),
            title: title.to_string(),
            kind: DocumentKind::Article,
            source_url: None,
            metadata: DocumentMetadata::default(),
            status: ProcessingStatus::Completed,
            tags: vec![],
            created_at: 0,
            updated_at,
        }
    }

    fn chunk(id: &str, doc_id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc_id.to_string(),
            chunk_index: 0,
            text: text.to_string(),
            token_count: 1,
            hash: String::new(),
            page: None,
            section: None,
        }
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.upsert_document(&doc("d1", "Diffractive backlighting", 10)).await.unwrap();
        store.upsert_document(&doc("d2", "Unrelated", 20)).await.unwrap();
        store
            .replace_chunks(
                "d1",
                &[chunk("c1", "d1", "multiview display panel")],
                Some(&[vec![1.0, 0.0]]),
            )
            .await
            .unwrap();
        store
            .replace_chunks(
                "d2",
                &[chunk("c2", "d2", "the display of cathode ray tubes")],
                Some(&[vec![0.0, 1.0]]),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_keyword_search_indexes_title_and_text() {
        let store = seeded().await;
        let hits = store.keyword_search("diffractive", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
        assert_eq!(hits[0].updated_at, 10);

        let hits = store.keyword_search("display", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.raw_score > 0.0));
    }

    #[tokio::test]
    async fn test_keyword_search_operator_only_query() {
        let store = seeded().await;
        assert!(store.keyword_search("OR AND", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vector_search_filters_by_similarity() {
        let store = seeded().await;
        let hits = store.vector_search(&[1.0, 0.1], 10, 0.2).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn test_replace_chunks_drops_old_chunks_and_vectors() {
        let store = seeded().await;
        store
            .replace_chunks("d1", &[chunk("c1b", "d1", "replacement text")], None)
            .await
            .unwrap();
        let counts = store.counts().unwrap();
        assert_eq!(counts.chunks, 2);
        assert_eq!(counts.embedded_chunks, 1);
        assert!(store.load_contexts(&["c1".to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_chunks_rejects_mismatched_vectors() {
        let store = InMemoryStore::new();
        let err = store
            .replace_chunks("d1", &[chunk("c1", "d1", "x")], Some(&[]))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_graph_queries() {
        let store = InMemoryStore::new();
        for (id, name) in [("leia", "Leia Inc"), ("lf", "lightfield")] {
            store
                .upsert_entity(&Entity {
                    id: id.to_string(),
                    name: name.to_string(),
                    kind: EntityKind::Organization,
                    authority: 1.0,
                    mention_count: 0,
                })
                .await
                .unwrap();
        }
        store
            .upsert_edge(&Edge {
                id: "e1".into(),
                src_id: "leia".into(),
                src_type: NodeKind::Entity,
                dst_id: "lf".into(),
                dst_type: NodeKind::Entity,
                relation: RelationType::Implements,
                weight: 0.9,
                evidence: None,
                evidence_doc_id: None,
            })
            .await
            .unwrap();
        store
            .replace_mentions(
                "d1",
                &[Mention {
                    entity_id: "lf".into(),
                    document_id: "d1".into(),
                    chunk_id: "c1".into(),
                }],
            )
            .await
            .unwrap();

        assert_eq!(
            store.find_entity_by_name("LEIA INC").await.unwrap().unwrap().id,
            "leia"
        );
        assert_eq!(store.edges_touching(&["lf".to_string()]).await.unwrap().len(), 1);
        assert_eq!(store.get_entities(&["lf".into(), "nope".into()]).await.unwrap().len(), 1);
        assert_eq!(store.mentions_for_chunks(&["c1".into()]).await.unwrap().len(), 1);

        store.replace_mentions("d1", &[]).await.unwrap();
        assert!(store.mentions_for_entities(&["lf".into()]).await.unwrap().is_empty());
    }
}
