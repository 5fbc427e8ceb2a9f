//! Configuration parsing and validation.
//!
//! corpus-rag is configured via a TOML file (default `config/crag.toml`).
//! The file is parsed once by [`load_config`], validated, and then mapped
//! onto the typed core structures ([`RetrievalParams`], [`Persona`],
//! [`Gazetteer`]) that the engine consumes.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/crag.sqlite"
//!
//! [retrieval]
//! max_hops = 2
//!
//! [embedding]
//! provider = "hash"
//! dims = 256
//!
//! [personas.david]
//! tags = ["lightfield", "3d-display"]
//! document_kinds = ["patent", "paper"]
//! ```
//!
//! Every section except `[db]` is optional.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use corpus_rag_core::models::DocumentKind;
use corpus_rag_core::params::{Persona, RetrievalParams, TierWeights};
use corpus_rag_core::resolver::{Gazetteer, GazetteerEntry};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub personas: BTreeMap<String, PersonaConfig>,
    /// Empty means "use the built-in vocabulary".
    #[serde(default)]
    pub gazetteer: Vec<GazetteerEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

fn default_max_tokens() -> usize {
    400
}
fn default_overlap() -> usize {
    40
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_min_entity_name_length")]
    pub min_entity_name_length: usize,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    #[serde(default = "default_max_hops_limit")]
    pub max_hops_limit: usize,
    #[serde(default = "default_max_expanded_entities")]
    pub max_expanded_entities: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_lexical: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_graph: usize,
    #[serde(default = "default_vector_min_similarity")]
    pub vector_min_similarity: f64,
    #[serde(default = "default_boost_cap")]
    pub boost_cap: f64,
    #[serde(default = "default_max_relationship_context")]
    pub max_relationship_context: usize,
    #[serde(default)]
    pub tier_weights: TierWeights,
}

fn default_rrf_k() -> f64 {
    60.0
}
fn default_min_entity_name_length() -> usize {
    3
}
fn default_max_hops() -> usize {
    1
}
fn default_max_hops_limit() -> usize {
    3
}
fn default_max_expanded_entities() -> usize {
    50
}
fn default_final_limit() -> usize {
    10
}
fn default_candidate_k() -> usize {
    50
}
fn default_vector_min_similarity() -> f64 {
    0.2
}
fn default_boost_cap() -> f64 {
    0.25
}
fn default_max_relationship_context() -> usize {
    3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            min_entity_name_length: default_min_entity_name_length(),
            max_hops: default_max_hops(),
            max_hops_limit: default_max_hops_limit(),
            max_expanded_entities: default_max_expanded_entities(),
            final_limit: default_final_limit(),
            candidate_k_lexical: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            candidate_k_graph: default_candidate_k(),
            vector_min_similarity: default_vector_min_similarity(),
            boost_cap: default_boost_cap(),
            max_relationship_context: default_max_relationship_context(),
            tier_weights: TierWeights::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn to_params(&self) -> RetrievalParams {
        RetrievalParams {
            rrf_k: self.rrf_k,
            min_entity_name_length: self.min_entity_name_length,
            max_hops: self.max_hops,
            max_hops_limit: self.max_hops_limit,
            max_expanded_entities: self.max_expanded_entities,
            final_limit: self.final_limit,
            candidate_k_lexical: self.candidate_k_lexical,
            candidate_k_vector: self.candidate_k_vector,
            candidate_k_graph: self.candidate_k_graph,
            vector_min_similarity: self.vector_min_similarity,
            boost_cap: self.boost_cap,
            max_relationship_context: self.max_relationship_context,
            tier_weights: self.tier_weights,
        }
    }
}

/// Per-stage deadlines, in milliseconds.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TimeoutsConfig {
    /// Resolution, expansion and the graph tier.
    #[serde(default = "default_graph_ms")]
    pub graph_ms: u64,
    #[serde(default = "default_tier_ms")]
    pub lexical_ms: u64,
    /// Vector search, excluding query embedding.
    #[serde(default = "default_tier_ms")]
    pub vector_ms: u64,
    #[serde(default = "default_embedding_ms")]
    pub embedding_ms: u64,
    /// Whole-request deadline for `crag search` and the HTTP server.
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,
}

fn default_graph_ms() -> u64 {
    2000
}
fn default_tier_ms() -> u64 {
    3000
}
fn default_embedding_ms() -> u64 {
    5000
}
fn default_request_ms() -> u64 {
    10000
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            graph_ms: default_graph_ms(),
            lexical_ms: default_tier_ms(),
            vector_ms: default_tier_ms(),
            embedding_ms: default_embedding_ms(),
            request_ms: default_request_ms(),
        }
    }
}

impl TimeoutsConfig {
    pub fn graph(&self) -> Duration {
        Duration::from_millis(self.graph_ms)
    }
    pub fn lexical(&self) -> Duration {
        Duration::from_millis(self.lexical_ms)
    }
    pub fn vector(&self) -> Duration {
        Duration::from_millis(self.vector_ms)
    }
    pub fn embedding(&self) -> Duration {
        Duration::from_millis(self.embedding_ms)
    }
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PersonaConfig {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub document_kinds: Vec<DocumentKind>,
}

impl Config {
    /// Personas keyed by id.
    pub fn personas(&self) -> BTreeMap<String, Persona> {
        self.personas
            .iter()
            .map(|(id, p)| {
                (
                    id.clone(),
                    Persona {
                        id: id.clone(),
                        tags: p.tags.clone(),
                        document_kinds: p.document_kinds.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn gazetteer(&self) -> Gazetteer {
        if self.gazetteer.is_empty() {
            Gazetteer::builtin()
        } else {
            Gazetteer::new(self.gazetteer.clone())
        }
    }

    /// Validate every section, naming the offending key on failure.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }
        if self.chunking.overlap_tokens >= self.chunking.max_tokens {
            bail!(
                "chunking.overlap_tokens ({}) must be < chunking.max_tokens ({})",
                self.chunking.overlap_tokens,
                self.chunking.max_tokens
            );
        }

        self.retrieval.to_params().validate()?;

        let t = &self.timeouts;
        for (key, value) in [
            ("graph_ms", t.graph_ms),
            ("lexical_ms", t.lexical_ms),
            ("vector_ms", t.vector_ms),
            ("embedding_ms", t.embedding_ms),
            ("request_ms", t.request_ms),
        ] {
            if value == 0 {
                bail!("timeouts.{} must be > 0", key);
            }
        }

        match self.embedding.provider.as_str() {
            "disabled" => {}
            "openai" => {
                if self.embedding.model.is_none() {
                    bail!("embedding.model must be specified when provider is 'openai'");
                }
            }
            "hash" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or hash.",
                other
            ),
        }
        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.batch_size == 0 {
                bail!("embedding.batch_size must be > 0");
            }
        }

        for (id, persona) in &self.personas {
            if id.trim().is_empty() {
                bail!("personas: persona id must not be empty");
            }
            if persona.tags.iter().any(|t| t.trim().is_empty()) {
                bail!("personas.{}.tags must not contain empty tags", id);
            }
        }

        for (i, entry) in self.gazetteer.iter().enumerate() {
            if entry.term.trim().is_empty() || entry.canonical.trim().is_empty() {
                bail!("gazetteer[{}]: term and canonical must not be empty", i);
            }
        }

        Ok(())
    }
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = parse_config("[db]\npath = \"x.sqlite\"\n").unwrap();
        assert_eq!(config.retrieval.to_params(), RetrievalParams::default());
        assert_eq!(config.timeouts, TimeoutsConfig::default());
        assert_eq!(config.server.bind, "127.0.0.1:7341");
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.gazetteer(), Gazetteer::builtin());
    }

    #[test]
    fn test_personas_and_gazetteer() {
        let config = parse_config(
            r#"
            [db]
            path = "x.sqlite"

            [personas.david]
            tags = ["lightfield"]
            document_kinds = ["patent", "paper"]

            [[gazetteer]]
            term = "light field"
            canonical = "lightfield"
            "#,
        )
        .unwrap();
        let personas = config.personas();
        let david = &personas["david"];
        assert_eq!(david.id, "david");
        assert!(david.allows(DocumentKind::Patent));
        assert!(!david.allows(DocumentKind::Note));
        assert_eq!(config.gazetteer().entries().len(), 1);
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            ("[retrieval]\nmax_hops = 9\n", "max_hops"),
            ("[retrieval]\nrrf_k = 0.0\n", "rrf_k"),
            ("[retrieval.tier_weights]\nlexical = -1.0\n", "tier_weights.lexical"),
            ("[chunking]\nmax_tokens = 10\noverlap_tokens = 10\n", "overlap_tokens"),
            ("[timeouts]\nvector_ms = 0\n", "timeouts.vector_ms"),
            ("[embedding]\nprovider = \"magic\"\n", "Unknown embedding provider"),
            ("[embedding]\nprovider = \"hash\"\n", "embedding.dims"),
        ];
        for (section, needle) in cases {
            let toml = format!("[db]\npath = \"x.sqlite\"\n{}", section);
            let err = format!("{:#}", parse_config(&toml).unwrap_err());
            assert!(err.contains(needle), "expected '{}' in '{}'", needle, err);
        }
    }

    #[test]
    fn test_unknown_document_kind_is_parse_error() {
        let toml = "[db]\npath = \"x\"\n[personas.a]\ndocument_kinds = [\"pamphlet\"]\n";
        assert!(parse_config(toml).is_err());
    }
}
