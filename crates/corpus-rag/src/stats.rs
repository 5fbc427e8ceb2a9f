//! Database statistics.
//!
//! `crag stats` prints row counts for the corpus and the knowledge graph,
//! plus embedding coverage and a per-kind document breakdown.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let counts = store.counts().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("corpus-rag — Database Stats");
    println!("===========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", counts.documents);
    println!("  Chunks:      {}", counts.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        counts.embedded_chunks,
        counts.chunks,
        if counts.chunks > 0 {
            (counts.embedded_chunks * 100) / counts.chunks
        } else {
            0
        }
    );
    println!("  Entities:    {}", counts.entities);
    println!("  Aliases:     {}", counts.aliases);
    println!("  Edges:       {}", counts.edges);
    println!("  Mentions:    {}", counts.mentions);

    let kind_rows = sqlx::query(
        r#"
        SELECT
            d.kind,
            COUNT(DISTINCT d.id) AS doc_count,
            COUNT(DISTINCT c.id) AS chunk_count
        FROM documents d
        LEFT JOIN chunks c ON c.document_id = d.id
        GROUP BY d.kind
        ORDER BY doc_count DESC, d.kind
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !kind_rows.is_empty() {
        println!();
        println!("  By kind:");
        println!("  {:<12} {:>6} {:>8}", "KIND", "DOCS", "CHUNKS");
        println!("  {}", "-".repeat(28));
        for row in &kind_rows {
            let kind: String = row.try_get("kind")?;
            let docs: i64 = row.try_get("doc_count")?;
            let chunks: i64 = row.try_get("chunk_count")?;
            println!("  {:<12} {:>6} {:>8}", kind, docs, chunks);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
