//! SQLite-backed [`ChunkStore`] and [`GraphStore`].
//!
//! Lexical search is FTS5 `bm25()` over chunk title + text; vector search
//! is brute-force cosine over the `chunk_vectors` BLOBs. Every row is
//! parsed into a typed core record here, so an unknown enum string or
//! malformed JSON column surfaces as an error instead of a silent default.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

use corpus_rag_core::embedding::{blob_to_vec, vec_to_blob};
use corpus_rag_core::lexical::query_terms;
use corpus_rag_core::models::{Alias, Chunk, Document, Edge, Entity, Mention};
use corpus_rag_core::store::{
    rank_candidates, ChunkCandidate, ChunkContext, ChunkStore, GraphStore, StoreCounts,
};
use corpus_rag_core::vector::rank_by_similarity;

/// Bind parameters per `IN (...)` batch, under SQLite's variable limit.
const MAX_BIND: usize = 500;

/// SQLite implementation of both store traits.
pub struct SqliteStore {
    pool: SqlitePool,
    embedding_model: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            embedding_model: String::new(),
        }
    }

    /// Model name recorded alongside vectors written by
    /// [`ChunkStore::replace_chunks`].
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        let count = |table: &'static str| {
            let pool = self.pool.clone();
            async move {
                let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                    .fetch_one(&pool)
                    .await
                    .with_context(|| format!("counting {}", table))?;
                anyhow::Ok(n)
            }
        };
        Ok(StoreCounts {
            documents: count("documents").await?,
            chunks: count("chunks").await?,
            embedded_chunks: count("chunk_vectors").await?,
            entities: count("entities").await?,
            aliases: count("aliases").await?,
            edges: count("edges").await?,
            mentions: count("mentions").await?,
        })
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Render query terms as an FTS5 disjunction of quoted phrases.
pub fn fts_match_expression(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn parse_document(row: &SqliteRow) -> Result<Document> {
    let id: String = row.try_get("doc_id")?;
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let metadata_json: String = row.try_get("metadata_json")?;
    let tags_json: String = row.try_get("tags_json")?;
    Ok(Document {
        kind: kind.parse().with_context(|| format!("document {}", id))?,
        status: status.parse().with_context(|| format!("document {}", id))?,
        metadata: serde_json::from_str(&metadata_json)
            .with_context(|| format!("document {}: malformed metadata_json", id))?,
        tags: serde_json::from_str(&tags_json)
            .with_context(|| format!("document {}: malformed tags_json", id))?,
        title: row.try_get("title")?,
        source_url: row.try_get("source_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        id,
    })
}

fn parse_chunk(row: &SqliteRow) -> Result<Chunk> {
    Ok(Chunk {
        id: row.try_get("chunk_id")?,
        document_id: row.try_get("doc_id")?,
        chunk_index: row.try_get("chunk_index")?,
        text: row.try_get("text")?,
        token_count: row.try_get("token_count")?,
        hash: row.try_get("hash")?,
        page: row.try_get("page")?,
        section: row.try_get("section")?,
    })
}

fn parse_entity(row: &SqliteRow) -> Result<Entity> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    Ok(Entity {
        kind: kind.parse().with_context(|| format!("entity {}", id))?,
        name: row.try_get("name")?,
        authority: row.try_get("authority")?,
        mention_count: row.try_get("mention_count")?,
        id,
    })
}

fn parse_edge(row: &SqliteRow) -> Result<Edge> {
    let id: String = row.try_get("id")?;
    let src_type: String = row.try_get("src_type")?;
    let dst_type: String = row.try_get("dst_type")?;
    let relation: String = row.try_get("relation")?;
    Ok(Edge {
        src_type: src_type.parse().with_context(|| format!("edge {}", id))?,
        dst_type: dst_type.parse().with_context(|| format!("edge {}", id))?,
        relation: relation.parse().with_context(|| format!("edge {}", id))?,
        src_id: row.try_get("src_id")?,
        dst_id: row.try_get("dst_id")?,
        weight: row.try_get("weight")?,
        evidence: row.try_get("evidence")?,
        evidence_doc_id: row.try_get("evidence_doc_id")?,
        id,
    })
}

fn parse_mention(row: &SqliteRow) -> Result<Mention> {
    Ok(Mention {
        entity_id: row.try_get("entity_id")?,
        document_id: row.try_get("document_id")?,
        chunk_id: row.try_get("chunk_id")?,
    })
}

const CONTEXT_COLUMNS: &str = r#"
    c.id AS chunk_id, c.chunk_index, c.text, c.token_count, c.hash, c.page, c.section,
    d.id AS doc_id, d.title, d.kind, d.source_url, d.metadata_json, d.status,
    d.tags_json, d.created_at, d.updated_at
"#;

impl SqliteStore {
    async fn fetch_in<T>(
        &self,
        sql_prefix: &str,
        ids: &[String],
        parse: fn(&SqliteRow) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for batch in ids.chunks(MAX_BIND) {
            let sql = format!("{} ({})", sql_prefix, placeholders(batch.len()));
            let mut query = sqlx::query(&sql);
            for id in batch {
                query = query.bind(id);
            }
            for row in query.fetch_all(&self.pool).await? {
                out.push(parse(&row)?);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    /// Upserts the row and refreshes the title copied into `chunks_fts`,
    /// so a retitled document is searchable without re-chunking.
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        let metadata_json = serde_json::to_string(&doc.metadata)?;
        let tags_json = serde_json::to_string(&doc.tags)?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, title, kind, source_url, metadata_json, status,
                                   tags_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                kind = excluded.kind,
                source_url = excluded.source_url,
                metadata_json = excluded.metadata_json,
                status = excluded.status,
                tags_json = excluded.tags_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(doc.kind.as_str())
        .bind(&doc.source_url)
        .bind(&metadata_json)
        .bind(doc.status.as_str())
        .bind(&tags_json)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE chunks_fts SET title = ? WHERE document_id = ? AND title != ?")
            .bind(&doc.title)
            .bind(&doc.id)
            .bind(&doc.title)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<()> {
        if let Some(vecs) = vectors {
            anyhow::ensure!(
                vecs.len() == chunks.len(),
                "vector count ({}) does not match chunk count ({})",
                vecs.len(),
                chunks.len()
            );
        }

        let mut tx = self.pool.begin().await?;

        let title: Option<String> = sqlx::query_scalar("SELECT title FROM documents WHERE id = ?")
            .bind(doc_id)
            .fetch_optional(&mut *tx)
            .await?;
        let title = title.with_context(|| format!("document {} must exist before its chunks", doc_id))?;

        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for (i, chunk) in chunks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, text, token_count, hash, page, section)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(doc_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.token_count)
            .bind(&chunk.hash)
            .bind(chunk.page)
            .bind(&chunk.section)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunks_fts (chunk_id, document_id, title, text) VALUES (?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(doc_id)
            .bind(&title)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;

            if let Some(vec) = vectors.and_then(|v| v.get(i)) {
                sqlx::query(
                    r#"
                    INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, hash, embedding)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(chunk_id) DO UPDATE SET
                        document_id = excluded.document_id,
                        model = excluded.model,
                        dims = excluded.dims,
                        hash = excluded.hash,
                        embedding = excluded.embedding
                    "#,
                )
                .bind(&chunk.id)
                .bind(doc_id)
                .bind(&self.embedding_model)
                .bind(vec.len() as i64)
                .bind(&chunk.hash)
                .bind(vec_to_blob(vec))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkCandidate>> {
        let Some(expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT chunks_fts.chunk_id AS chunk_id,
                   chunks_fts.document_id AS document_id,
                   bm25(chunks_fts) AS rank,
                   snippet(chunks_fts, 3, '', '', '...', 48) AS snippet,
                   d.updated_at AS updated_at
            FROM chunks_fts
            JOIN documents d ON d.id = chunks_fts.document_id
            WHERE chunks_fts MATCH ?
            ORDER BY rank, d.updated_at DESC, chunks_fts.chunk_id
            LIMIT ?
            "#,
        )
        .bind(&expr)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("FTS query failed: {}", expr))?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let rank: f64 = row.try_get("rank")?;
            candidates.push(ChunkCandidate {
                chunk_id: row.try_get("chunk_id")?,
                document_id: row.try_get("document_id")?,
                // bm25() is lower-is-better and non-positive.
                raw_score: (-rank).max(0.0),
                updated_at: row.try_get("updated_at")?,
                snippet: row.try_get("snippet")?,
            });
        }
        Ok(rank_candidates(candidates, limit))
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        min_similarity: f64,
    ) -> Result<Vec<ChunkCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.document_id, cv.embedding, d.updated_at,
                   COALESCE(substr(c.text, 1, 240), '') AS snippet
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN documents d ON d.id = cv.document_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            scored.push((
                ChunkCandidate {
                    chunk_id: row.try_get("chunk_id")?,
                    document_id: row.try_get("document_id")?,
                    raw_score: 0.0,
                    updated_at: row.try_get("updated_at")?,
                    snippet: row.try_get("snippet")?,
                },
                blob_to_vec(&blob),
            ));
        }
        Ok(rank_by_similarity(query_vec, scored, min_similarity, limit))
    }

    async fn load_contexts(&self, chunk_ids: &[String]) -> Result<Vec<ChunkContext>> {
        let prefix = format!(
            "SELECT {} FROM chunks c JOIN documents d ON d.id = c.document_id WHERE c.id IN",
            CONTEXT_COLUMNS
        );
        self.fetch_in(&prefix, chunk_ids, |row| {
            Ok(ChunkContext {
                chunk: parse_chunk(row)?,
                document: parse_document(row)?,
            })
        })
        .await
    }
}

#[async_trait]
impl GraphStore for SqliteStore {
    async fn all_entities(&self) -> Result<Vec<Entity>> {
        let rows = sqlx::query(
            "SELECT id, name, kind, authority, mention_count FROM entities ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_entity).collect()
    }

    async fn all_aliases(&self) -> Result<Vec<Alias>> {
        let rows = sqlx::query("SELECT alias, entity_id, confidence FROM aliases ORDER BY alias")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Alias {
                    alias: row.try_get("alias")?,
                    entity_id: row.try_get("entity_id")?,
                    confidence: row.try_get("confidence")?,
                })
            })
            .collect()
    }

    async fn get_entities(&self, ids: &[String]) -> Result<Vec<Entity>> {
        self.fetch_in(
            "SELECT id, name, kind, authority, mention_count FROM entities WHERE id IN",
            ids,
            parse_entity,
        )
        .await
    }

    async fn find_entity_by_name(&self, name: &str) -> Result<Option<Entity>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, kind, authority, mention_count FROM entities
            WHERE name = ? COLLATE NOCASE
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_entity).transpose()
    }

    async fn edges_touching(&self, node_ids: &[String]) -> Result<Vec<Edge>> {
        let mut out: Vec<Edge> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for batch in node_ids.chunks(MAX_BIND) {
            let marks = placeholders(batch.len());
            let sql = format!(
                r#"
                SELECT id, src_id, src_type, dst_id, dst_type, relation, weight,
                       evidence, evidence_doc_id
                FROM edges
                WHERE src_id IN ({marks}) OR dst_id IN ({marks})
                ORDER BY id
                "#
            );
            let mut query = sqlx::query(&sql);
            for id in batch.iter().chain(batch.iter()) {
                query = query.bind(id);
            }
            for row in query.fetch_all(&self.pool).await? {
                let edge = parse_edge(&row)?;
                if seen.insert(edge.id.clone()) {
                    out.push(edge);
                }
            }
        }
        Ok(out)
    }

    async fn mentions_for_entities(&self, entity_ids: &[String]) -> Result<Vec<Mention>> {
        self.fetch_in(
            "SELECT entity_id, document_id, chunk_id FROM mentions WHERE entity_id IN",
            entity_ids,
            parse_mention,
        )
        .await
    }

    async fn mentions_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Mention>> {
        self.fetch_in(
            "SELECT entity_id, document_id, chunk_id FROM mentions WHERE chunk_id IN",
            chunk_ids,
            parse_mention,
        )
        .await
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entities (id, name, kind, authority, mention_count)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                authority = excluded.authority,
                mention_count = excluded.mention_count
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.name)
        .bind(entity.kind.as_str())
        .bind(entity.authority)
        .bind(entity.mention_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_alias(&self, alias: &Alias) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO aliases (alias, entity_id, confidence)
            VALUES (?, ?, ?)
            ON CONFLICT(alias) DO UPDATE SET
                entity_id = excluded.entity_id,
                confidence = excluded.confidence
            "#,
        )
        .bind(&alias.alias)
        .bind(&alias.entity_id)
        .bind(alias.confidence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_edge(&self, edge: &Edge) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO edges (id, src_id, src_type, dst_id, dst_type, relation, weight,
                               evidence, evidence_doc_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                src_id = excluded.src_id,
                src_type = excluded.src_type,
                dst_id = excluded.dst_id,
                dst_type = excluded.dst_type,
                relation = excluded.relation,
                weight = excluded.weight,
                evidence = excluded.evidence,
                evidence_doc_id = excluded.evidence_doc_id
            "#,
        )
        .bind(&edge.id)
        .bind(&edge.src_id)
        .bind(edge.src_type.as_str())
        .bind(&edge.dst_id)
        .bind(edge.dst_type.as_str())
        .bind(edge.relation.as_str())
        .bind(edge.weight)
        .bind(&edge.evidence)
        .bind(&edge.evidence_doc_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_mentions(&self, doc_id: &str, mentions: &[Mention]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM mentions WHERE document_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        for m in mentions {
            sqlx::query(
                "INSERT OR IGNORE INTO mentions (entity_id, document_id, chunk_id) VALUES (?, ?, ?)",
            )
            .bind(&m.entity_id)
            .bind(&m.document_id)
            .bind(&m.chunk_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
