//! # corpus-rag core
//!
//! Runtime-agnostic retrieval logic for corpus-rag: data model, store
//! traits, entity resolution, graph expansion, lexical and vector ranking,
//! rank fusion, boosting and result enrichment.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. The `corpus-rag`
//! application crate supplies the SQLite store, embedding providers and the
//! concurrent engine that strings these stages together:
//!
//! ```text
//! resolver -> expand -> query -> { lexical, vector, graph } -> fusion -> boost -> enrich
//! ```

pub mod boost;
pub mod chunk;
pub mod embedding;
pub mod enrich;
pub mod error;
pub mod expand;
pub mod fusion;
pub mod graph;
pub mod lexical;
pub mod models;
pub mod params;
pub mod query;
pub mod resolver;
pub mod store;
pub mod text;
pub mod vector;
