//! Retrieval tuning parameters, decoupled from application config.
//!
//! The application maps its TOML `[retrieval]` section onto
//! [`RetrievalParams`] and calls [`RetrievalParams::validate`] once at
//! startup. Everything downstream reads these values directly; there are
//! no scattered fallbacks.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::models::{DocumentKind, Tier};

/// Per-tier weights applied during rank fusion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierWeights {
    #[serde(default = "default_lexical_weight")]
    pub lexical: f64,
    #[serde(default = "default_vector_weight")]
    pub vector: f64,
    #[serde(default = "default_graph_weight")]
    pub graph: f64,
}

fn default_lexical_weight() -> f64 {
    1.0
}
fn default_vector_weight() -> f64 {
    1.0
}
fn default_graph_weight() -> f64 {
    0.5
}

impl Default for TierWeights {
    fn default() -> Self {
        Self {
            lexical: default_lexical_weight(),
            vector: default_vector_weight(),
            graph: default_graph_weight(),
        }
    }
}

impl TierWeights {
    pub fn get(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Lexical => self.lexical,
            Tier::Vector => self.vector,
            Tier::Graph => self.graph,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for tier in Tier::ALL {
            let w = self.get(tier);
            if !w.is_finite() || w < 0.0 {
                bail!("tier_weights.{} must be a finite number >= 0", tier);
            }
        }
        if Tier::ALL.iter().all(|t| self.get(*t) == 0.0) {
            bail!("tier_weights must have at least one weight > 0");
        }
        Ok(())
    }
}

/// All retrieval knobs in one place.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// RRF smoothing constant `k` in `weight / (k + rank)`.
    pub rrf_k: f64,
    /// Expansion entity names shorter than this are dropped from the
    /// enhanced query.
    pub min_entity_name_length: usize,
    /// Default traversal depth.
    pub max_hops: usize,
    /// Hard ceiling for any requested depth.
    pub max_hops_limit: usize,
    /// Stop expanding once this many entities have been collected.
    pub max_expanded_entities: usize,
    /// Results returned when the caller does not pass a limit.
    pub final_limit: usize,
    pub candidate_k_lexical: usize,
    pub candidate_k_vector: usize,
    pub candidate_k_graph: usize,
    /// Vector candidates at or below this cosine similarity are dropped.
    pub vector_min_similarity: f64,
    /// Maximum boost as a fraction of the fused-score spread.
    pub boost_cap: f64,
    /// Relationship annotations kept per result.
    pub max_relationship_context: usize,
    pub tier_weights: TierWeights,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            min_entity_name_length: 3,
            max_hops: 1,
            max_hops_limit: 3,
            max_expanded_entities: 50,
            final_limit: 10,
            candidate_k_lexical: 50,
            candidate_k_vector: 50,
            candidate_k_graph: 50,
            vector_min_similarity: 0.2,
            boost_cap: 0.25,
            max_relationship_context: 3,
            tier_weights: TierWeights::default(),
        }
    }
}

impl RetrievalParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.rrf_k.is_finite() && self.rrf_k > 0.0) {
            bail!("retrieval.rrf_k must be > 0");
        }
        if self.min_entity_name_length == 0 {
            bail!("retrieval.min_entity_name_length must be >= 1");
        }
        if self.max_hops > self.max_hops_limit {
            bail!(
                "retrieval.max_hops ({}) must be <= retrieval.max_hops_limit ({})",
                self.max_hops,
                self.max_hops_limit
            );
        }
        if self.final_limit < 1 {
            bail!("retrieval.final_limit must be >= 1");
        }
        if self.candidate_k_lexical == 0 || self.candidate_k_vector == 0 {
            bail!("retrieval.candidate_k_lexical and candidate_k_vector must be >= 1");
        }
        if !(-1.0..=1.0).contains(&self.vector_min_similarity) {
            bail!("retrieval.vector_min_similarity must be in [-1.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&self.boost_cap) {
            bail!("retrieval.boost_cap must be in [0.0, 1.0]");
        }
        self.tier_weights.validate()
    }
}

/// A named retrieval configuration: tag affinities plus an optional
/// restriction on which document kinds are eligible.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Empty means every kind is eligible.
    #[serde(default)]
    pub document_kinds: Vec<DocumentKind>,
}

impl Persona {
    pub fn allows(&self, kind: DocumentKind) -> bool {
        self.document_kinds.is_empty() || self.document_kinds.contains(&kind)
    }
}
