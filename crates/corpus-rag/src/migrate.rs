//! Idempotent schema creation.
//!
//! `crag init` runs this; every statement is `IF NOT EXISTS` (FTS5 virtual
//! tables get an explicit existence check), so running it twice is a
//! no-op.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `documents` | Document rows; metadata and tags as JSON text |
//! | `chunks` | Chunk text, token count, hash, page/section locators |
//! | `chunks_fts` | FTS5 index over chunk title + text |
//! | `chunk_vectors` | Little-endian f32 embedding BLOBs |
//! | `entities` / `aliases` / `edges` | The knowledge graph |
//! | `mentions` | Ingestion-time entity → chunk index |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        kind TEXT NOT NULL,
        source_url TEXT,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'pending',
        tags_json TEXT NOT NULL DEFAULT '[]',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        token_count INTEGER NOT NULL,
        hash TEXT NOT NULL,
        page INTEGER,
        section TEXT,
        UNIQUE(document_id, chunk_index),
        FOREIGN KEY (document_id) REFERENCES documents(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_vectors (
        chunk_id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        model TEXT NOT NULL,
        dims INTEGER NOT NULL,
        hash TEXT NOT NULL,
        embedding BLOB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        authority REAL NOT NULL DEFAULT 0,
        mention_count INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS aliases (
        alias TEXT PRIMARY KEY COLLATE NOCASE,
        entity_id TEXT NOT NULL,
        confidence REAL NOT NULL DEFAULT 1.0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS edges (
        id TEXT PRIMARY KEY,
        src_id TEXT NOT NULL,
        src_type TEXT NOT NULL,
        dst_id TEXT NOT NULL,
        dst_type TEXT NOT NULL,
        relation TEXT NOT NULL,
        weight REAL NOT NULL,
        evidence TEXT,
        evidence_doc_id TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mentions (
        entity_id TEXT NOT NULL,
        document_id TEXT NOT NULL,
        chunk_id TEXT NOT NULL,
        PRIMARY KEY (entity_id, chunk_id)
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_document_id ON chunk_vectors(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_documents_updated_at ON documents(updated_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name COLLATE NOCASE)",
    "CREATE INDEX IF NOT EXISTS idx_aliases_entity_id ON aliases(entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_src_id ON edges(src_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_dst_id ON edges(dst_id)",
    "CREATE INDEX IF NOT EXISTS idx_mentions_chunk_id ON mentions(chunk_id)",
    "CREATE INDEX IF NOT EXISTS idx_mentions_document_id ON mentions(document_id)",
];

/// Create all tables and indexes on an open pool.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    for ddl in TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                title,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

/// Connect to the configured database and create the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}
