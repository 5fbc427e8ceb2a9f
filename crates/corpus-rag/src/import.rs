//! Local corpus loader.
//!
//! Reads a JSON corpus file and writes documents, chunks, the knowledge
//! graph and the mention index into a store:
//!
//! ```json
//! {
//!   "entities":  [{ "name": "Leia Inc", "kind": "organization", "authority": 0.8 }],
//!   "aliases":   [{ "alias": "Leia", "entity": "Leia Inc" }],
//!   "edges":     [{ "src": "Leia Inc", "dst": "lightfield", "relation": "implements", "weight": 0.9 }],
//!   "documents": [{ "id": "leia-history", "title": "Evolution of Leia Inc", "kind": "article",
//!                   "entities": ["lightfield"], "text": "..." }]
//! }
//! ```
//!
//! Entity, alias and edge references may use an entity id or its name
//! (case-insensitive). Document `entities` tags naming an unknown entity
//! create it as a `technology`.
//!
//! Each document's chunks, vectors and mentions are replaced as a unit, so
//! importing the same file twice leaves the store unchanged. Embedding
//! failures are non-fatal: the affected document stays lexical-only and is
//! counted as pending.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use corpus_rag_core::chunk::chunk_text;
use corpus_rag_core::embedding::EmbeddingProvider;
use corpus_rag_core::models::{
    Alias, Chunk, Document, DocumentKind, DocumentMetadata, Edge, Entity, EntityKind, Mention,
    NodeKind, ProcessingStatus, RelationType,
};
use corpus_rag_core::resolver::{match_entities, slug};
use corpus_rag_core::store::{ChunkStore, GraphStore};

use crate::config::{ChunkingConfig, Config};
use crate::db;
use crate::embedding::create_provider;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Default, Deserialize)]
pub struct CorpusFile {
    #[serde(default)]
    pub documents: Vec<CorpusDocument>,
    #[serde(default)]
    pub entities: Vec<CorpusEntity>,
    #[serde(default)]
    pub aliases: Vec<CorpusAlias>,
    #[serde(default)]
    pub edges: Vec<CorpusEdge>,
}

#[derive(Debug, Deserialize)]
pub struct CorpusDocument {
    pub id: String,
    pub title: String,
    pub kind: DocumentKind,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Entities this document is about; mapped to its first chunk.
    #[serde(default)]
    pub entities: Vec<String>,
    /// Unix seconds; defaults to import time.
    #[serde(default)]
    pub updated_at: Option<i64>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct CorpusEntity {
    /// Defaults to the slug of `name`.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub authority: f64,
}

#[derive(Debug, Deserialize)]
pub struct CorpusAlias {
    pub alias: String,
    /// Entity id or name.
    pub entity: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
pub struct CorpusEdge {
    #[serde(default)]
    pub id: Option<String>,
    pub src: String,
    #[serde(default)]
    pub src_type: NodeKind,
    pub dst: String,
    #[serde(default)]
    pub dst_type: NodeKind,
    pub relation: RelationType,
    pub weight: f64,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub evidence_doc: Option<String>,
}

/// Counts reported by [`import_corpus`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub documents: usize,
    pub chunks: usize,
    pub mentions: usize,
    pub entities: usize,
    pub aliases: usize,
    pub edges: usize,
    pub embeddings_written: usize,
    pub embeddings_pending: usize,
}

pub fn parse_corpus(content: &str) -> Result<CorpusFile> {
    let corpus: CorpusFile =
        serde_json::from_str(content).context("Failed to parse corpus file")?;
    corpus.validate()?;
    Ok(corpus)
}

fn in_unit_range(v: f64) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}

impl CorpusFile {
    /// Check numeric fields against the data model: edge weights and alias
    /// confidences lie in [0, 1], authority scores are finite and >= 0.
    pub fn validate(&self) -> Result<()> {
        for ce in &self.entities {
            if !ce.authority.is_finite() || ce.authority < 0.0 {
                bail!(
                    "entity '{}': authority must be a finite number >= 0 (got {})",
                    ce.name,
                    ce.authority
                );
            }
        }
        for ca in &self.aliases {
            if !in_unit_range(ca.confidence) {
                bail!(
                    "alias '{}' -> '{}': confidence must be in [0, 1] (got {})",
                    ca.alias,
                    ca.entity,
                    ca.confidence
                );
            }
        }
        for ce in &self.edges {
            if !in_unit_range(ce.weight) {
                bail!(
                    "edge {} -{}-> {}: weight must be in [0, 1] (got {})",
                    ce.src,
                    ce.relation,
                    ce.dst,
                    ce.weight
                );
            }
        }
        Ok(())
    }
}

/// Entity lookup by id, lowercase name, or lowercase alias.
#[derive(Default)]
struct EntityIndex {
    entities: BTreeMap<String, Entity>,
    by_name: HashMap<String, String>,
    aliases: Vec<Alias>,
}

impl EntityIndex {
    fn insert(&mut self, entity: Entity) {
        self.by_name
            .entry(entity.name.to_lowercase())
            .or_insert_with(|| entity.id.clone());
        self.entities.insert(entity.id.clone(), entity);
    }

    fn lookup(&self, reference: &str) -> Option<&str> {
        if let Some(e) = self.entities.get(reference) {
            return Some(&e.id);
        }
        let lower = reference.to_lowercase();
        if let Some(id) = self.by_name.get(&lower) {
            return Some(id);
        }
        self.aliases
            .iter()
            .find(|a| a.alias.to_lowercase() == lower)
            .map(|a| a.entity_id.as_str())
    }
}

/// Import `corpus` into `store`.
pub async fn import_corpus<S>(
    store: &S,
    embedder: &dyn EmbeddingProvider,
    corpus: &CorpusFile,
    chunking: &ChunkingConfig,
    batch_size: usize,
) -> Result<ImportSummary>
where
    S: ChunkStore + GraphStore + ?Sized,
{
    corpus.validate()?;
    let mut summary = ImportSummary::default();
    let now = chrono::Utc::now().timestamp();
    // Entities whose stored mention_count must be recomputed at the end.
    let mut touched: BTreeSet<String> = BTreeSet::new();

    let mut index = EntityIndex::default();
    for e in store.all_entities().await? {
        index.insert(e);
    }
    index.aliases = store.all_aliases().await?;

    for ce in &corpus.entities {
        let id = ce.id.clone().unwrap_or_else(|| slug(&ce.name));
        if id.is_empty() {
            bail!("entity '{}' has an empty id", ce.name);
        }
        let entity = Entity {
            id,
            name: ce.name.clone(),
            kind: ce.kind,
            authority: ce.authority,
            mention_count: 0,
        };
        store.upsert_entity(&entity).await?;
        touched.insert(entity.id.clone());
        index.insert(entity);
        summary.entities += 1;
    }

    for doc in &corpus.documents {
        for tag in &doc.entities {
            if index.lookup(tag).is_some() {
                continue;
            }
            let entity = Entity {
                id: slug(tag),
                name: tag.clone(),
                kind: EntityKind::Technology,
                authority: 0.0,
                mention_count: 0,
            };
            tracing::debug!(entity = %entity.name, document = %doc.id, "creating entity from document tag");
            store.upsert_entity(&entity).await?;
            touched.insert(entity.id.clone());
            index.insert(entity);
            summary.entities += 1;
        }
    }

    for ca in &corpus.aliases {
        let entity_id = index
            .lookup(&ca.entity)
            .with_context(|| format!("alias '{}' refers to unknown entity '{}'", ca.alias, ca.entity))?
            .to_string();
        let alias = Alias {
            alias: ca.alias.clone(),
            entity_id,
            confidence: ca.confidence,
        };
        store.upsert_alias(&alias).await?;
        index.aliases.retain(|a| !a.alias.eq_ignore_ascii_case(&alias.alias));
        index.aliases.push(alias);
        summary.aliases += 1;
    }

    let entities: Vec<Entity> = index.entities.values().cloned().collect();

    for cd in &corpus.documents {
        let updated_at = cd.updated_at.unwrap_or(now);
        let mut document = Document {
            id: cd.id.clone(),
            title: cd.title.clone(),
            kind: cd.kind,
            source_url: cd.source_url.clone(),
            metadata: cd.metadata.clone(),
            status: ProcessingStatus::Processing,
            tags: cd.tags.clone(),
            created_at: updated_at,
            updated_at,
        };
        store.upsert_document(&document).await?;

        let chunks: Vec<Chunk> = if cd.text.trim().is_empty() {
            Vec::new()
        } else {
            chunk_text(&cd.id, &cd.text, chunking.max_tokens, chunking.overlap_tokens)
        };

        let vectors = if embedder.is_enabled() && !chunks.is_empty() {
            match embed_chunks(embedder, &chunks, batch_size).await {
                Ok(v) => {
                    summary.embeddings_written += v.len();
                    Some(v)
                }
                Err(e) => {
                    tracing::warn!(document = %cd.id, error = %format!("{:#}", e), "embedding failed; document stays lexical-only");
                    summary.embeddings_pending += chunks.len();
                    None
                }
            }
        } else {
            None
        };
        store
            .replace_chunks(&cd.id, &chunks, vectors.as_deref())
            .await
            .with_context(|| format!("writing chunks for document {}", cd.id))?;

        let mentions = build_mentions(cd, &chunks, &entities, &index);
        touched.extend(mentions.iter().map(|m| m.entity_id.clone()));
        store.replace_mentions(&cd.id, &mentions).await?;

        document.status = ProcessingStatus::Completed;
        store.upsert_document(&document).await?;

        summary.documents += 1;
        summary.chunks += chunks.len();
        summary.mentions += mentions.len();
    }

    for ce in &corpus.edges {
        let src_id = resolve_endpoint(&index, &ce.src, ce.src_type)?;
        let dst_id = resolve_endpoint(&index, &ce.dst, ce.dst_type)?;
        let edge = Edge {
            id: ce
                .id
                .clone()
                .unwrap_or_else(|| format!("{}:{}:{}", src_id, ce.relation, dst_id)),
            src_id,
            src_type: ce.src_type,
            dst_id,
            dst_type: ce.dst_type,
            relation: ce.relation,
            weight: ce.weight,
            evidence: ce.evidence.clone(),
            evidence_doc_id: ce.evidence_doc.clone(),
        };
        store.upsert_edge(&edge).await?;
        summary.edges += 1;
    }

    // Upserts above reset mention_count; recount from the stored mention
    // rows, which also cover documents outside this file.
    let touched: Vec<String> = touched.into_iter().collect();
    if !touched.is_empty() {
        let mentions = store.mentions_for_entities(&touched).await?;
        let mut counts: HashMap<&str, i64> = HashMap::new();
        for m in &mentions {
            *counts.entry(m.entity_id.as_str()).or_default() += 1;
        }
        for id in &touched {
            if let Some(entity) = index.entities.get(id) {
                let mut entity = entity.clone();
                entity.mention_count = counts.get(id.as_str()).copied().unwrap_or(0);
                store.upsert_entity(&entity).await?;
            }
        }
    }

    Ok(summary)
}

async fn embed_chunks(
    embedder: &dyn EmbeddingProvider,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            bail!(
                "provider returned {} vectors for {} chunks",
                vectors.len(),
                texts.len()
            );
        }
        out.extend(vectors);
    }
    Ok(out)
}

/// Document tags map to the first chunk; name and alias hits map to the
/// chunk that contains them.
fn build_mentions(
    doc: &CorpusDocument,
    chunks: &[Chunk],
    entities: &[Entity],
    index: &EntityIndex,
) -> Vec<Mention> {
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    let mut mentions = Vec::new();
    let mut push = |entity_id: &str, chunk: &Chunk| {
        if seen.insert((entity_id.to_string(), chunk.id.clone())) {
            mentions.push(Mention {
                entity_id: entity_id.to_string(),
                document_id: doc.id.clone(),
                chunk_id: chunk.id.clone(),
            });
        }
    };

    if let Some(first) = chunks.first() {
        for tag in &doc.entities {
            if let Some(id) = index.lookup(tag) {
                push(id, first);
            }
        }
    }
    for chunk in chunks {
        for entity in match_entities(&chunk.text, entities, &index.aliases) {
            push(&entity.id, chunk);
        }
    }
    mentions
}

fn resolve_endpoint(index: &EntityIndex, reference: &str, kind: NodeKind) -> Result<String> {
    match kind {
        NodeKind::Document => Ok(reference.to_string()),
        NodeKind::Entity => index
            .lookup(reference)
            .map(str::to_string)
            .with_context(|| format!("edge endpoint '{}' is not a known entity", reference)),
    }
}

/// `crag import`: load a corpus file into the configured database.
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
    let corpus = parse_corpus(&content)?;

    let embedder: Arc<dyn EmbeddingProvider> = create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone()).with_embedding_model(embedder.model_name());

    let summary = import_corpus(
        &store,
        embedder.as_ref(),
        &corpus,
        &config.chunking,
        config.embedding.batch_size,
    )
    .await?;

    println!("import {}", path.display());
    println!("  documents: {}", summary.documents);
    println!("  chunks written: {}", summary.chunks);
    println!("  mentions: {}", summary.mentions);
    println!("  entities: {}", summary.entities);
    println!("  aliases: {}", summary.aliases);
    println!("  edges: {}", summary.edges);
    if embedder.is_enabled() {
        println!("  embeddings written: {}", summary.embeddings_written);
        println!("  embeddings pending: {}", summary.embeddings_pending);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_rag_core::store::memory::InMemoryStore;
    use crate::embedding::{DisabledProvider, HashProvider};

    const CORPUS: &str = r#"{
        "entities": [
            {"name": "Leia Inc", "kind": "organization", "authority": 0.8},
            {"name": "lightfield", "kind": "technology", "authority": 0.5}
        ],
        "aliases": [{"alias": "Leia", "entity": "Leia Inc"}],
        "edges": [
            {"src": "Leia Inc", "dst": "lightfield", "relation": "implements", "weight": 0.9,
             "evidence": "Leia ships lightfield displays"}
        ],
        "documents": [
            {"id": "leia-history", "title": "Evolution of Leia Inc", "kind": "article",
             "tags": ["3d-display"], "entities": ["lightfield", "holography"],
             "text": "Leia started in a lab.\n\nThe company later shipped tablets."}
        ]
    }"#;

    #[tokio::test]
    async fn test_import_builds_graph_and_mentions() {
        let store = InMemoryStore::new();
        let corpus = parse_corpus(CORPUS).unwrap();
        let summary = import_corpus(&store, &DisabledProvider, &corpus, &ChunkingConfig::default(), 8)
            .await
            .unwrap();

        assert_eq!(summary.documents, 1);
        assert_eq!(summary.chunks, 1);
        // Two declared entities plus "holography" created from a tag.
        assert_eq!(summary.entities, 3);
        assert_eq!(summary.edges, 1);
        assert_eq!(summary.embeddings_written, 0);

        let edges = store.edges_touching(&["leia-inc".to_string()]).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].dst_id, "lightfield");

        // Tags: lightfield + holography; alias hit in text: Leia Inc.
        let mentions = store
            .mentions_for_entities(&["lightfield".into(), "holography".into(), "leia-inc".into()])
            .await
            .unwrap();
        assert_eq!(mentions.len(), 3);

        let lightfield = store.get_entities(&["lightfield".into()]).await.unwrap();
        assert_eq!(lightfield[0].mention_count, 1);
    }

    #[tokio::test]
    async fn test_import_twice_is_idempotent() {
        let store = InMemoryStore::new();
        let corpus = parse_corpus(CORPUS).unwrap();
        let chunking = ChunkingConfig::default();
        import_corpus(&store, &DisabledProvider, &corpus, &chunking, 8).await.unwrap();
        let first = store.counts().unwrap();
        import_corpus(&store, &DisabledProvider, &corpus, &chunking, 8).await.unwrap();
        assert_eq!(store.counts().unwrap(), first);
    }

    #[tokio::test]
    async fn test_import_with_hash_embeddings() {
        let store = InMemoryStore::new();
        let corpus = parse_corpus(CORPUS).unwrap();
        let summary = import_corpus(
            &store,
            &HashProvider::new(32),
            &corpus,
            &ChunkingConfig::default(),
            8,
        )
        .await
        .unwrap();
        assert_eq!(summary.embeddings_written, 1);
        assert_eq!(store.counts().unwrap().embedded_chunks, 1);
    }

    #[tokio::test]
    async fn test_alias_to_unknown_entity_fails() {
        let store = InMemoryStore::new();
        let corpus = parse_corpus(r#"{"aliases": [{"alias": "X", "entity": "nobody"}]}"#).unwrap();
        let err = import_corpus(&store, &DisabledProvider, &corpus, &ChunkingConfig::default(), 8)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown entity"));
    }

    #[test]
    fn test_parse_rejects_out_of_range_numbers() {
        let edge = |w: &str| {
            format!(
                r#"{{"entities": [{{"name": "a", "kind": "technology"}}, {{"name": "b", "kind": "technology"}}],
                    "edges": [{{"src": "a", "dst": "b", "relation": "cites", "weight": {}}}]}}"#,
                w
            )
        };
        let err = parse_corpus(&edge("7.5")).unwrap_err();
        assert!(err.to_string().contains("edge a -cites-> b"), "{}", err);
        assert!(parse_corpus(&edge("-3.0")).is_err());
        assert!(parse_corpus(&edge("1.0")).is_ok());
        assert!(parse_corpus(&edge("0")).is_ok());

        let err = parse_corpus(r#"{"entities": [{"name": "a", "kind": "technology", "authority": -0.5}]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("entity 'a'"), "{}", err);

        let err = parse_corpus(
            r#"{"entities": [{"name": "a", "kind": "technology"}],
                "aliases": [{"alias": "A1", "entity": "a", "confidence": 1.5}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("alias 'A1'"), "{}", err);
    }

    #[tokio::test]
    async fn test_import_rejects_bad_weight_before_writing() {
        let store = InMemoryStore::new();
        let mut corpus = parse_corpus(CORPUS).unwrap();
        corpus.edges[0].weight = 7.5;
        let err = import_corpus(&store, &DisabledProvider, &corpus, &ChunkingConfig::default(), 8)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("weight must be in [0, 1]"));
        assert_eq!(store.counts().unwrap().entities, 0);
    }

    #[tokio::test]
    async fn test_reimporting_entities_keeps_mention_counts() {
        let store = InMemoryStore::new();
        let chunking = ChunkingConfig::default();
        let corpus = parse_corpus(CORPUS).unwrap();
        import_corpus(&store, &DisabledProvider, &corpus, &chunking, 8).await.unwrap();

        let entities_only = parse_corpus(
            r#"{"entities": [{"name": "lightfield", "kind": "technology", "authority": 0.7}]}"#,
        )
        .unwrap();
        import_corpus(&store, &DisabledProvider, &entities_only, &chunking, 8)
            .await
            .unwrap();

        let rows = store
            .mentions_for_entities(&["lightfield".into()])
            .await
            .unwrap();
        let lightfield = store.get_entities(&["lightfield".into()]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(lightfield[0].mention_count, 1);
        assert_eq!(lightfield[0].authority, 0.7);
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let bad = r#"{"documents": [{"id": "d", "title": "t", "kind": "tweet", "text": ""}]}"#;
        assert!(parse_corpus(bad).is_err());
    }
}
