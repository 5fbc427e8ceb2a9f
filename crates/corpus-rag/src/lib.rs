//! # corpus-rag
//!
//! Relationship-aware hybrid retrieval over a document corpus and a
//! knowledge graph.
//!
//! A query is resolved to known entities, expanded along weighted graph
//! relationships, and rewritten into an enhanced lexical query. Lexical
//! (FTS5 BM25), vector (cosine) and graph (entity mentions) tiers then run
//! concurrently under independent deadlines; their rankings are merged
//! with weighted reciprocal-rank fusion, nudged by a bounded authority/tag
//! boost, and annotated with relationship provenance and citation markers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌───────────┐
//! │ crag import  │──▶│ Chunk + Embed +  │──▶│  SQLite   │
//! │ (JSON corpus)│   │ mention index    │   │ FTS5+Vec  │
//! └──────────────┘   └──────────────────┘   │ + graph   │
//!                                           └─────┬─────┘
//!                                                 │
//!                                        ┌────────┴────────┐
//!                                        │ RetrievalEngine │
//!                                        └────────┬────────┘
//!                                    ┌────────────┴────────────┐
//!                                    ▼                         ▼
//!                              ┌──────────┐             ┌────────────┐
//!                              │   CLI    │             │    HTTP    │
//!                              │  (crag)  │             │ /retrieve  │
//!                              └──────────┘             └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite `ChunkStore` + `GraphStore` |
//! | [`embedding`] | Embedding providers (disabled, OpenAI, hash) |
//! | [`import`] | JSON corpus loader |
//! | [`engine`] | Concurrent `retrieve` orchestration |
//! | [`search`] | `crag search` / `crag expand` output |
//! | [`stats`] | `crag stats` |
//! | [`server`] | HTTP server |
//!
//! The retrieval algorithms themselves live in `corpus-rag-core`.

pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod import;
pub mod migrate;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
